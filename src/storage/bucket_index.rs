use crate::storage::codec::{
    encode_record, format_timestamp, parse_timestamp, read_records, write_atomic, RawRecord,
};
use crate::storage::{Bucket, StorageError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const BUCKET_INDEX_FILE: &str = "buckets.csv";

const HEADER: [&str; 4] = ["Name", "CreationTime", "LastModifiedTime", "Status"];

/// In-memory copy of `buckets.csv`, kept in file order.
///
/// Every mutation rewrites the whole file atomically and is rolled back in
/// memory when that write fails. Callers serialize access through the lock
/// that owns the index.
#[derive(Debug)]
pub struct BucketIndex {
    path: PathBuf,
    buckets: Vec<Bucket>,
}

impl BucketIndex {
    /// Loads the index under `root`. A missing file is an empty index.
    pub async fn load(root: &Path) -> Result<Self, StorageError> {
        let path = root.join(BUCKET_INDEX_FILE);
        let buckets = match read_records(&path).await? {
            Some(records) => parse_buckets(&path, records),
            None => Vec::new(),
        };
        Ok(Self { path, buckets })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn get(&self, name: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.name == name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Adds one record and persists. The file is created with its header on
    /// first use.
    pub async fn append(&mut self, bucket: Bucket) -> Result<(), StorageError> {
        self.buckets.push(bucket);
        if let Err(e) = self.persist().await {
            self.buckets.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Drops every record named `name`, keeping the order of the rest.
    /// Returns the first removed record.
    pub async fn remove_by_name(&mut self, name: &str) -> Result<Option<Bucket>, StorageError> {
        let before = self.buckets.clone();
        let removed = self.buckets.iter().find(|b| b.name == name).cloned();
        if removed.is_none() {
            return Ok(None);
        }
        self.buckets.retain(|b| b.name != name);
        if let Err(e) = self.persist().await {
            self.buckets = before;
            return Err(e);
        }
        Ok(removed)
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let mut out = encode_record(&HEADER);
        for b in &self.buckets {
            out.push_str(&encode_record(&[
                &b.name,
                &format_timestamp(&b.creation_time),
                &format_timestamp(&b.last_modified),
                &b.status,
            ]));
        }
        write_atomic(&self.path, out.as_bytes()).await
    }
}

fn parse_buckets(path: &Path, records: Vec<RawRecord>) -> Vec<Bucket> {
    let mut buckets = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();

    for (i, record) in records.into_iter().enumerate() {
        let fields = match record.fields {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(index = %path.display(), line = record.line, "skipping malformed bucket record: {e}");
                continue;
            }
        };
        if i == 0 && fields.first().map(String::as_str) == Some(HEADER[0]) {
            continue;
        }
        match parse_bucket(&fields) {
            Ok(bucket) => {
                if seen.insert(bucket.name.clone()) {
                    buckets.push(bucket);
                } else {
                    tracing::warn!(
                        index = %path.display(),
                        line = record.line,
                        bucket = %bucket.name,
                        "ignoring duplicate bucket record"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(index = %path.display(), line = record.line, "skipping malformed bucket record: {e}");
            }
        }
    }
    buckets
}

fn parse_bucket(fields: &[String]) -> Result<Bucket, String> {
    if fields.len() != HEADER.len() {
        return Err(format!(
            "expected {} fields, got {}",
            HEADER.len(),
            fields.len()
        ));
    }
    if fields[0].is_empty() {
        return Err("empty bucket name".to_string());
    }
    let creation_time =
        parse_timestamp(&fields[1]).map_err(|e| format!("bad CreationTime: {e}"))?;
    let last_modified =
        parse_timestamp(&fields[2]).map_err(|e| format!("bad LastModifiedTime: {e}"))?;
    Ok(Bucket {
        name: fields[0].clone(),
        creation_time,
        last_modified,
        status: fields[3].clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn bucket(name: &str) -> Bucket {
        Bucket::new_active(name, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let index = BucketIndex::load(dir.path()).await.unwrap();
        assert!(index.is_empty());
        assert!(!index.path().exists());
    }

    #[tokio::test]
    async fn test_append_writes_header_and_reloads() {
        let dir = tempdir().unwrap();
        let mut index = BucketIndex::load(dir.path()).await.unwrap();
        index.append(bucket("alpha")).await.unwrap();
        index.append(bucket("beta")).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join(BUCKET_INDEX_FILE)).unwrap();
        assert_eq!(
            text,
            "Name,CreationTime,LastModifiedTime,Status\n\
             alpha,2024-05-01T12:00:00Z,2024-05-01T12:00:00Z,active\n\
             beta,2024-05-01T12:00:00Z,2024-05-01T12:00:00Z,active\n"
        );

        let reloaded = BucketIndex::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.list(), index.list());
        assert!(reloaded.exists("alpha"));
        assert!(!reloaded.exists("Alpha"));
    }

    #[tokio::test]
    async fn test_remove_keeps_order() {
        let dir = tempdir().unwrap();
        let mut index = BucketIndex::load(dir.path()).await.unwrap();
        for name in ["one", "two", "three"] {
            index.append(bucket(name)).await.unwrap();
        }

        let removed = index.remove_by_name("two").await.unwrap();
        assert_eq!(removed.unwrap().name, "two");
        assert!(index.remove_by_name("two").await.unwrap().is_none());

        let reloaded = BucketIndex::load(dir.path()).await.unwrap();
        let names: Vec<_> = reloaded.list().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn test_malformed_and_duplicate_records_are_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(BUCKET_INDEX_FILE),
            "Name,CreationTime,LastModifiedTime,Status\n\
             good,2024-05-01T12:00:00Z,2024-05-01T12:00:00Z,active\n\
             short,2024-05-01T12:00:00Z\n\
             badtime,not-a-time,2024-05-01T12:00:00Z,active\n\
             good,2024-06-01T12:00:00Z,2024-06-01T12:00:00Z,active\n\
             other,2024-05-02T00:00:00Z,2024-05-02T00:00:00Z,active\n",
        )
        .unwrap();

        let index = BucketIndex::load(dir.path()).await.unwrap();
        let names: Vec<_> = index.list().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["good", "other"]);
        assert_eq!(
            format_timestamp(&index.get("good").unwrap().creation_time),
            "2024-05-01T12:00:00Z"
        );
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("gone");
        std::fs::create_dir(&root).unwrap();
        let mut index = BucketIndex::load(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();

        assert!(index.append(bucket("alpha")).await.is_err());
        assert!(index.is_empty());
    }
}
