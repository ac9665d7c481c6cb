use crate::storage::codec::{
    encode_record, format_timestamp, parse_timestamp, read_records, write_atomic, RawRecord,
};
use crate::storage::{ObjectMetadata, StorageError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const OBJECT_INDEX_FILE: &str = "objects.csv";

const HEADER: [&str; 4] = ["ObjectKey", "Size", "ContentType", "LastModified"];

/// In-memory copy of one bucket's `objects.csv`.
///
/// Keys are unique: `upsert` replaces in place, and on load the first record
/// for a key wins.
#[derive(Debug)]
pub struct ObjectIndex {
    path: PathBuf,
    objects: Vec<ObjectMetadata>,
}

impl ObjectIndex {
    /// Loads the index stored in `bucket_dir`. A missing file is an empty
    /// index.
    pub async fn load(bucket_dir: &Path) -> Result<Self, StorageError> {
        let path = bucket_dir.join(OBJECT_INDEX_FILE);
        let objects = match read_records(&path).await? {
            Some(records) => parse_objects(&path, records),
            None => Vec::new(),
        };
        Ok(Self { path, objects })
    }

    /// An index for a bucket created in this process; nothing on disk yet.
    pub fn empty(bucket_dir: &Path) -> Self {
        Self {
            path: bucket_dir.join(OBJECT_INDEX_FILE),
            objects: Vec::new(),
        }
    }

    pub fn list(&self) -> &[ObjectMetadata] {
        &self.objects
    }

    pub fn get(&self, key: &str) -> Option<&ObjectMetadata> {
        self.objects.iter().find(|o| o.key == key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }

    /// Publishes `object`, replacing the record with the same key if there
    /// is one. Returns the replaced record.
    pub async fn upsert(
        &mut self,
        object: ObjectMetadata,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        let previous = match self.objects.iter().position(|o| o.key == object.key) {
            Some(pos) => Some(std::mem::replace(&mut self.objects[pos], object)),
            None => {
                self.objects.push(object);
                None
            }
        };

        if let Err(e) = self.persist().await {
            match &previous {
                Some(prev) => {
                    if let Some(slot) = self.objects.iter_mut().find(|o| o.key == prev.key) {
                        *slot = prev.clone();
                    }
                }
                None => {
                    self.objects.pop();
                }
            }
            return Err(e);
        }
        Ok(previous)
    }

    /// Removes the record for `key`, if any.
    pub async fn remove_by_key(
        &mut self,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        let Some(pos) = self.objects.iter().position(|o| o.key == key) else {
            return Ok(None);
        };
        let removed = self.objects.remove(pos);
        if let Err(e) = self.persist().await {
            self.objects.insert(pos, removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let mut out = encode_record(&HEADER);
        for o in &self.objects {
            out.push_str(&encode_record(&[
                &o.key,
                &o.size.to_string(),
                &o.content_type,
                &format_timestamp(&o.last_modified),
            ]));
        }
        write_atomic(&self.path, out.as_bytes()).await
    }
}

fn parse_objects(path: &Path, records: Vec<RawRecord>) -> Vec<ObjectMetadata> {
    let mut objects = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();

    for (i, record) in records.into_iter().enumerate() {
        let fields = match record.fields {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(index = %path.display(), line = record.line, "skipping malformed object record: {e}");
                continue;
            }
        };
        if i == 0 && fields.first().map(String::as_str) == Some(HEADER[0]) {
            continue;
        }
        match parse_object(&fields) {
            Ok(object) if seen.contains(&object.key) => {
                tracing::warn!(
                    index = %path.display(),
                    line = record.line,
                    key = %object.key,
                    "ignoring duplicate object record"
                );
            }
            Ok(object) => {
                seen.insert(object.key.clone());
                objects.push(object);
            }
            Err(e) => {
                tracing::warn!(index = %path.display(), line = record.line, "skipping malformed object record: {e}");
            }
        }
    }
    objects
}

fn parse_object(fields: &[String]) -> Result<ObjectMetadata, String> {
    if fields.len() != HEADER.len() {
        return Err(format!(
            "expected {} fields, got {}",
            HEADER.len(),
            fields.len()
        ));
    }
    if fields[0].is_empty() {
        return Err("empty object key".to_string());
    }
    let size = fields[1]
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("bad Size {:?}: {e}", fields[1]))?;
    let last_modified =
        parse_timestamp(&fields[3]).map_err(|e| format!("bad LastModified: {e}"))?;
    Ok(ObjectMetadata {
        key: fields[0].clone(),
        size,
        content_type: fields[2].clone(),
        last_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn object(key: &str, size: u64, content_type: &str) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size,
            content_type: content_type.to_string(),
            last_modified: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let dir = tempdir().unwrap();
        let mut index = ObjectIndex::empty(dir.path());

        assert!(index.upsert(object("a", 1, "text/plain")).await.unwrap().is_none());
        assert!(index.upsert(object("b", 2, "text/plain")).await.unwrap().is_none());
        let previous = index
            .upsert(object("a", 10, "application/json"))
            .await
            .unwrap();
        assert_eq!(previous.unwrap().size, 1);

        let reloaded = ObjectIndex::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.list()[0].key, "a");
        assert_eq!(reloaded.get("a").unwrap().size, 10);
        assert_eq!(reloaded.get("a").unwrap().content_type, "application/json");
        assert_eq!(reloaded.total_bytes(), 12);
    }

    #[tokio::test]
    async fn test_remove_by_key() {
        let dir = tempdir().unwrap();
        let mut index = ObjectIndex::empty(dir.path());
        index.upsert(object("a", 1, "text/plain")).await.unwrap();

        assert!(index.remove_by_key("missing").await.unwrap().is_none());
        assert_eq!(index.remove_by_key("a").await.unwrap().unwrap().key, "a");
        assert!(index.is_empty());

        let text = std::fs::read_to_string(dir.path().join(OBJECT_INDEX_FILE)).unwrap();
        assert_eq!(text, "ObjectKey,Size,ContentType,LastModified\n");
    }

    #[tokio::test]
    async fn test_keys_with_commas_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let mut index = ObjectIndex::empty(dir.path());
        index
            .upsert(object("report, final \"v2\".txt", 3, "text/plain; charset=utf-8"))
            .await
            .unwrap();

        let reloaded = ObjectIndex::load(dir.path()).await.unwrap();
        let obj = reloaded.get("report, final \"v2\".txt").unwrap();
        assert_eq!(obj.content_type, "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn test_load_skips_bad_rows_and_keeps_first_duplicate() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(OBJECT_INDEX_FILE),
            "ObjectKey,Size,ContentType,LastModified\n\
             a,5,text/plain,2024-05-01T12:00:00Z\n\
             b,-1,text/plain,2024-05-01T12:00:00Z\n\
             c,7,text/plain\n\
             d,1,text/plain,garbage\n\
             a,9,image/png,2024-05-02T12:00:00Z\n",
        )
        .unwrap();

        let index = ObjectIndex::load(dir.path()).await.unwrap();
        assert_eq!(index.len(), 1);
        let a = index.get("a").unwrap();
        assert_eq!(a.size, 5);
        assert_eq!(a.content_type, "text/plain");
    }
}
