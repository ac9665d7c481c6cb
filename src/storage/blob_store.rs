use crate::storage::StorageError;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Staging area for blob writes, directly under the data directory.
pub const TEMP_DIR: &str = ".tmp";

/// Raw object bytes at `root/bucket/key`.
///
/// Writes land in `root/.tmp` first and are renamed into place, so a blob is
/// either fully old or fully new. Hidden names at the root never collide with
/// buckets because bucket names cannot start with a period.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    pub fn blob_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_dir(bucket);
        for comp in key.split('/') {
            path.push(comp);
        }
        path
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub async fn bucket_dir_exists(&self, bucket: &str) -> bool {
        fs::metadata(self.bucket_dir(bucket))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    pub async fn create_bucket_dir(&self, bucket: &str) -> Result<(), StorageError> {
        fs::create_dir(self.bucket_dir(bucket))
            .await
            .map_err(|e| StorageError::io(&format!("create bucket dir {bucket}"), e))
    }

    /// Stores `data`, creating intermediate directories for nested keys.
    pub async fn write(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(bucket, key);
        if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(StorageError::InvalidInput(format!(
                "key {key} conflicts with an existing key prefix"
            )));
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                if self.has_file_ancestor(bucket, &path).await {
                    return Err(StorageError::InvalidInput(format!(
                        "key {key} is nested under an existing object"
                    )));
                }
                return Err(StorageError::io("create blob parents", e));
            }
        }

        let temp_dir = self.temp_dir();
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| StorageError::io("create temp dir", e))?;
        let temp_path = temp_dir.join(Uuid::new_v4().to_string());

        let result = async {
            let mut file = fs::File::create(&temp_path)
                .await
                .map_err(|e| StorageError::io("create temp blob", e))?;
            file.write_all(data)
                .await
                .map_err(|e| StorageError::io("write temp blob", e))?;
            file.sync_all()
                .await
                .map_err(|e| StorageError::io("sync temp blob", e))?;
            drop(file);
            fs::rename(&temp_path, &path)
                .await
                .map_err(|e| StorageError::io("publish blob", e))
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    /// Keeps the current bytes of `key` in the temp area so an overwrite can
    /// be undone with [`BlobStore::restore`]. `None` when there is no blob.
    pub async fn backup(&self, bucket: &str, key: &str) -> Result<Option<PathBuf>, StorageError> {
        if !self.exists(bucket, key).await {
            return Ok(None);
        }
        let temp_dir = self.temp_dir();
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| StorageError::io("create temp dir", e))?;

        let path = self.blob_path(bucket, key);
        let saved = temp_dir.join(Uuid::new_v4().to_string());
        if fs::hard_link(&path, &saved).await.is_err() {
            fs::copy(&path, &saved)
                .await
                .map_err(|e| StorageError::io("back up blob", e))?;
        }
        Ok(Some(saved))
    }

    /// Puts a blob saved by [`BlobStore::backup`] back in place.
    pub async fn restore(&self, saved: &Path, bucket: &str, key: &str) -> Result<(), StorageError> {
        fs::rename(saved, self.blob_path(bucket, key))
            .await
            .map_err(|e| StorageError::io("restore blob", e))
    }

    pub async fn discard(&self, saved: &Path) {
        if let Err(e) = fs::remove_file(saved).await {
            tracing::warn!(path = %saved.display(), "failed to drop blob backup: {e}");
        }
    }

    pub async fn read(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        match fs::read(self.blob_path(bucket, key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => Err(StorageError::io("read blob", e)),
        }
    }

    pub async fn exists(&self, bucket: &str, key: &str) -> bool {
        fs::metadata(self.blob_path(bucket, key))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Removes one blob and any directories its key left empty. Returns
    /// whether a file was removed.
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.blob_path(bucket, key);
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::io("delete blob", e)),
        };

        let bucket_dir = self.bucket_dir(bucket);
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == bucket_dir || !d.starts_with(&bucket_dir) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(&d).await.is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(removed)
    }

    /// Removes the bucket directory and everything under it.
    pub async fn delete_all(&self, bucket: &str) -> Result<(), StorageError> {
        match fs::remove_dir_all(self.bucket_dir(bucket)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&format!("delete bucket dir {bucket}"), e)),
        }
    }

    /// Clears blobs left in the temp area by writes that never finished.
    pub async fn sweep_temp(&self) -> Result<usize, StorageError> {
        let temp_dir = self.temp_dir();
        let mut swept = 0;
        match fs::read_dir(&temp_dir).await {
            Ok(mut rd) => {
                while let Some(entry) = rd
                    .next_entry()
                    .await
                    .map_err(|e| StorageError::io("sweep temp", e))?
                {
                    if fs::remove_file(entry.path()).await.is_ok() {
                        swept += 1;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io("sweep temp", e)),
        }
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| StorageError::io("create temp dir", e))?;
        Ok(swept)
    }

    /// Names of the visible directories directly under the root.
    pub async fn list_bucket_dirs(&self) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        let mut rd = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io("list bucket dirs", e))?;
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| StorageError::io("list bucket dirs", e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| StorageError::io("bucket dir meta", e))?;
            if meta.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        out.push(name.to_string());
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn has_file_ancestor(&self, bucket: &str, path: &Path) -> bool {
        let bucket_dir = self.bucket_dir(bucket);
        for ancestor in path.ancestors().skip(1) {
            if ancestor == bucket_dir {
                break;
            }
            if let Ok(meta) = fs::metadata(ancestor).await {
                if meta.is_file() {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store_with_bucket(root: &Path) -> BlobStore {
        let store = BlobStore::new(root);
        store.create_bucket_dir("bucket").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_write_read_overwrite() {
        let dir = tempdir().unwrap();
        let store = store_with_bucket(dir.path()).await;

        store.write("bucket", "k", b"first").await.unwrap();
        store.write("bucket", "k", b"second!").await.unwrap();
        assert_eq!(store.read("bucket", "k").await.unwrap(), Bytes::from("second!"));
        assert!(store.exists("bucket", "k").await);
    }

    #[tokio::test]
    async fn test_nested_keys_create_and_prune_directories() {
        let dir = tempdir().unwrap();
        let store = store_with_bucket(dir.path()).await;

        store.write("bucket", "a/b/c.txt", b"x").await.unwrap();
        assert!(dir.path().join("bucket/a/b/c.txt").is_file());

        assert!(store.delete("bucket", "a/b/c.txt").await.unwrap());
        assert!(!dir.path().join("bucket/a").exists());
        assert!(dir.path().join("bucket").is_dir());
        assert!(!store.delete("bucket", "a/b/c.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store_with_bucket(dir.path()).await;
        let err = store.read("bucket", "nope").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
        assert!(!store.exists("bucket", "nope").await);
    }

    #[tokio::test]
    async fn test_prefix_conflicts_are_invalid_input() {
        let dir = tempdir().unwrap();
        let store = store_with_bucket(dir.path()).await;

        store.write("bucket", "a/b", b"x").await.unwrap();
        assert!(matches!(
            store.write("bucket", "a", b"y").await,
            Err(StorageError::InvalidInput(_))
        ));

        store.write("bucket", "file", b"x").await.unwrap();
        assert!(matches!(
            store.write("bucket", "file/child", b"y").await,
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_backup_survives_overwrite_and_restores() {
        let dir = tempdir().unwrap();
        let store = store_with_bucket(dir.path()).await;
        assert!(store.backup("bucket", "k").await.unwrap().is_none());

        store.write("bucket", "k", b"old").await.unwrap();
        let saved = store.backup("bucket", "k").await.unwrap().unwrap();
        store.write("bucket", "k", b"newer").await.unwrap();
        assert_eq!(store.read("bucket", "k").await.unwrap(), Bytes::from("newer"));

        store.restore(&saved, "bucket", "k").await.unwrap();
        assert_eq!(store.read("bucket", "k").await.unwrap(), Bytes::from("old"));
        assert!(!saved.exists());

        let saved = store.backup("bucket", "k").await.unwrap().unwrap();
        store.discard(&saved).await;
        assert!(!saved.exists());
        assert_eq!(store.read("bucket", "k").await.unwrap(), Bytes::from("old"));
    }

    #[tokio::test]
    async fn test_delete_all_and_sweep() {
        let dir = tempdir().unwrap();
        let store = store_with_bucket(dir.path()).await;
        store.write("bucket", "x/y", b"1").await.unwrap();

        std::fs::write(dir.path().join(".tmp").join("leftover"), b"partial").unwrap();
        assert_eq!(store.sweep_temp().await.unwrap(), 1);

        assert_eq!(store.list_bucket_dirs().await.unwrap(), vec!["bucket"]);
        store.delete_all("bucket").await.unwrap();
        assert!(!store.bucket_dir_exists("bucket").await);
        store.delete_all("bucket").await.unwrap();
    }
}
