use crate::observability::metrics;
use crate::storage::blob_store::BlobStore;
use crate::storage::bucket_index::BucketIndex;
use crate::storage::object_index::ObjectIndex;
use crate::storage::validation::{validate_bucket_name, validate_object_key};
use crate::storage::{
    effective_content_type, now_secs, Bucket, ObjectMetadata, StorageBackend, StorageError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

const BACKEND: &str = "file";

/// Bucket index plus one lock per bucket guarding its object index and blobs.
///
/// Object operations hold the catalog read guard only long enough to find
/// the bucket's lock. DeleteBucket takes the bucket lock first and the
/// catalog write lock second; nothing waits on a bucket lock while holding
/// the catalog, so the two orders cannot deadlock.
#[derive(Debug)]
struct Catalog {
    index: BucketIndex,
    objects: HashMap<String, Arc<RwLock<BucketSlot>>>,
}

#[derive(Debug)]
struct BucketSlot {
    index: ObjectIndex,
    /// Set when the bucket record is removed. A handle looked up before the
    /// delete then reports the bucket as missing.
    retired: bool,
}

impl BucketSlot {
    fn new(index: ObjectIndex) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self {
            index,
            retired: false,
        }))
    }
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    blobs: BlobStore,
    catalog: RwLock<Catalog>,
}

/// Filesystem-backed store.
///
/// Layout under the data directory:
/// - `buckets.csv`: the bucket index
/// - `<bucket>/objects.csv`: that bucket's object index
/// - `<bucket>/<key>`: object bytes, one directory level per `/` in the key
/// - `.tmp/`: blobs being written
///
/// Indexes live in memory and are rewritten atomically on every change. The
/// index is the commit point: blobs are written before their record is
/// published and records are unpublished before their blobs are removed.
#[derive(Debug, Clone)]
pub struct FileStorage {
    inner: Arc<Inner>,
}

impl FileStorage {
    /// Opens (or initializes) the store rooted at `root`.
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::Internal(format!("init data dir {:?}: {}", root, e)))?;

        let blobs = BlobStore::new(&root);
        let swept = blobs.sweep_temp().await?;
        if swept > 0 {
            tracing::info!(swept, "removed leftovers of interrupted blob writes");
        }

        let index = BucketIndex::load(&root).await?;
        let mut objects = HashMap::with_capacity(index.len());
        let mut total_objects = 0usize;
        let mut total_bytes = 0u64;

        for bucket in index.list() {
            if !blobs.bucket_dir_exists(&bucket.name).await {
                tracing::warn!(bucket = %bucket.name, "bucket record has no directory, recreating it");
                blobs.create_bucket_dir(&bucket.name).await?;
            }
            let object_index = ObjectIndex::load(&blobs.bucket_dir(&bucket.name)).await?;
            for object in object_index.list() {
                if !blobs.exists(&bucket.name, &object.key).await {
                    tracing::warn!(
                        bucket = %bucket.name,
                        key = %object.key,
                        "object record has no blob"
                    );
                }
            }
            total_objects += object_index.len();
            total_bytes += object_index.total_bytes();
            objects.insert(bucket.name.clone(), BucketSlot::new(object_index));
        }

        for dir in blobs.list_bucket_dirs().await? {
            if !index.exists(&dir) {
                tracing::warn!(dir = %dir, "directory in data dir has no bucket record");
            }
        }

        metrics::set_bucket_count(BACKEND, index.len());
        metrics::set_object_totals(BACKEND, total_objects, total_bytes);
        tracing::info!(
            root = %root.display(),
            buckets = index.len(),
            objects = total_objects,
            "file storage opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                blobs,
                catalog: RwLock::new(Catalog { index, objects }),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Snapshot of a bucket's object records in index order.
    pub async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectMetadata>, StorageError> {
        let slot = self.inner.bucket_for_read(bucket).await?;
        Ok(slot.index.list().to_vec())
    }
}

fn bucket_lock(catalog: &Catalog, bucket: &str) -> Result<Arc<RwLock<BucketSlot>>, StorageError> {
    catalog
        .objects
        .get(bucket)
        .cloned()
        .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
}

/// Runs a mutation on its own task so that dropping the caller (for example
/// a client disconnecting mid-request) cannot stop it between the blob and
/// index steps.
async fn run_to_completion<T, F>(fut: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, StorageError>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| StorageError::Internal(format!("storage task failed: {e}")))?
}

impl Inner {
    async fn lookup(&self, bucket: &str) -> Result<Arc<RwLock<BucketSlot>>, StorageError> {
        let catalog = self.catalog.read().await;
        bucket_lock(&catalog, bucket)
    }

    async fn bucket_for_read(
        &self,
        bucket: &str,
    ) -> Result<OwnedRwLockReadGuard<BucketSlot>, StorageError> {
        let slot = self.lookup(bucket).await?.read_owned().await;
        if slot.retired {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(slot)
    }

    async fn bucket_for_write(
        &self,
        bucket: &str,
    ) -> Result<OwnedRwLockWriteGuard<BucketSlot>, StorageError> {
        let lock = self.lookup(bucket).await?;
        let lock_start = std::time::Instant::now();
        let slot = lock.write_owned().await;
        metrics::record_lock_wait("bucket", lock_start.elapsed().as_secs_f64());
        if slot.retired {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(slot)
    }

    async fn create_bucket(&self, name: &str) -> Result<Bucket, StorageError> {
        let lock_start = std::time::Instant::now();
        let mut catalog = self.catalog.write().await;
        metrics::record_lock_wait("catalog", lock_start.elapsed().as_secs_f64());

        if catalog.index.exists(name) {
            return Err(StorageError::BucketAlreadyExists(name.to_string()));
        }
        if self.blobs.bucket_dir_exists(name).await {
            tracing::warn!(bucket = %name, "clearing stale directory before reuse");
            self.blobs.delete_all(name).await?;
        }
        self.blobs.create_bucket_dir(name).await?;

        let bucket = Bucket::new_active(name, now_secs());
        if let Err(e) = catalog.index.append(bucket.clone()).await {
            if let Err(cleanup) = self.blobs.delete_all(name).await {
                tracing::error!(bucket = %name, "failed to remove directory of unrecorded bucket: {cleanup}");
            }
            return Err(e);
        }

        let dir = self.blobs.bucket_dir(name);
        catalog
            .objects
            .insert(name.to_string(), BucketSlot::new(ObjectIndex::empty(&dir)));
        metrics::set_bucket_count(BACKEND, catalog.index.len());
        Ok(bucket)
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), StorageError> {
        let mut slot = self.bucket_for_write(name).await?;
        if !slot.index.is_empty() {
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }

        let lock_start = std::time::Instant::now();
        let mut catalog = self.catalog.write().await;
        metrics::record_lock_wait("catalog", lock_start.elapsed().as_secs_f64());

        catalog.index.remove_by_name(name).await?;
        catalog.objects.remove(name);
        slot.retired = true;
        metrics::set_bucket_count(BACKEND, catalog.index.len());

        if let Err(e) = self.blobs.delete_all(name).await {
            // The bucket is gone from the index; the directory is cleared on
            // the next create with this name.
            tracing::error!(bucket = %name, "bucket unrecorded but directory removal failed: {e}");
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: String,
    ) -> Result<ObjectMetadata, StorageError> {
        // Uploads only hold this bucket's lock, so a large body never stalls
        // operations on other buckets.
        let mut slot = self.bucket_for_write(bucket).await?;

        let backup = self.blobs.backup(bucket, key).await?;
        if let Err(e) = self.blobs.write(bucket, key, &data).await {
            if let Some(saved) = &backup {
                self.blobs.discard(saved).await;
            }
            return Err(e);
        }

        let meta = ObjectMetadata {
            key: key.to_string(),
            size: data.len() as u64,
            content_type,
            last_modified: now_secs(),
        };

        match slot.index.upsert(meta.clone()).await {
            Ok(previous) => {
                if let Some(saved) = &backup {
                    self.blobs.discard(saved).await;
                }
                let (old_count, old_bytes) = previous.map(|p| (1, p.size)).unwrap_or((0, 0));
                metrics::adjust_object_totals(
                    BACKEND,
                    1 - old_count,
                    meta.size as i64 - old_bytes as i64,
                );
                Ok(meta)
            }
            Err(e) => {
                let undo = match &backup {
                    Some(saved) => self.blobs.restore(saved, bucket, key).await,
                    None => self.blobs.delete(bucket, key).await.map(|_| ()),
                };
                if let Err(undo_err) = undo {
                    tracing::error!(
                        bucket = %bucket,
                        key = %key,
                        "failed to undo unpublished blob write: {undo_err}"
                    );
                }
                Err(e)
            }
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Bytes, ObjectMetadata), StorageError> {
        let slot = self.bucket_for_read(bucket).await?;

        let meta = slot
            .index
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        let data = self.blobs.read(bucket, key).await.map_err(|e| match e {
            StorageError::ObjectNotFound { .. } => {
                tracing::error!(bucket = %bucket, key = %key, "indexed object has no blob");
                StorageError::Internal(format!("blob missing for indexed object {bucket}/{key}"))
            }
            other => other,
        })?;

        if data.len() as u64 != meta.size {
            tracing::error!(
                bucket = %bucket,
                key = %key,
                indexed = meta.size,
                actual = data.len(),
                "blob size does not match index"
            );
            return Err(StorageError::Internal(format!(
                "size mismatch for {bucket}/{key}"
            )));
        }
        Ok((data, meta))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut slot = self.bucket_for_write(bucket).await?;

        let removed = slot
            .index
            .remove_by_key(key)
            .await?
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        metrics::adjust_object_totals(BACKEND, -1, -(removed.size as i64));

        match self.blobs.delete(bucket, key).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(bucket = %bucket, key = %key, "deleted object had no blob");
            }
            Err(e) => {
                tracing::error!(bucket = %bucket, key = %key, "object unrecorded but blob removal failed: {e}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, StorageError> {
        let catalog = self.inner.catalog.read().await;
        Ok(catalog.index.list().to_vec())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        let catalog = self.inner.catalog.read().await;
        Ok(catalog.index.exists(bucket))
    }

    #[tracing::instrument(skip(self), fields(bucket = %bucket))]
    async fn create_bucket(&self, bucket: &str) -> Result<Bucket, StorageError> {
        let start_time = std::time::Instant::now();
        validate_bucket_name(bucket)?;

        let inner = self.inner.clone();
        let name = bucket.to_string();
        let created = run_to_completion(async move { inner.create_bucket(&name).await }).await?;

        metrics::record_storage_op("create_bucket", BACKEND, start_time.elapsed().as_secs_f64());
        tracing::info!(bucket = %bucket, "bucket created");
        Ok(created)
    }

    #[tracing::instrument(skip(self), fields(bucket = %bucket))]
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let start_time = std::time::Instant::now();

        let inner = self.inner.clone();
        let name = bucket.to_string();
        run_to_completion(async move { inner.delete_bucket(&name).await }).await?;

        metrics::record_storage_op("delete_bucket", BACKEND, start_time.elapsed().as_secs_f64());
        tracing::info!(bucket = %bucket, "bucket deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self, data), fields(bucket = %bucket, key = %key, size = data.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<ObjectMetadata, StorageError> {
        let start_time = std::time::Instant::now();
        validate_object_key(key)?;

        let inner = self.inner.clone();
        let bucket_owned = bucket.to_string();
        let key_owned = key.to_string();
        let content_type = effective_content_type(content_type);
        let meta = run_to_completion(async move {
            inner
                .put_object(&bucket_owned, &key_owned, data, content_type)
                .await
        })
        .await?;

        let duration = start_time.elapsed().as_secs_f64();
        metrics::record_storage_op("put", BACKEND, duration);
        tracing::debug!(
            bucket = %bucket,
            key = %key,
            size = meta.size,
            duration_ms = duration * 1000.0,
            "FileStorage put object completed"
        );
        Ok(meta)
    }

    #[tracing::instrument(skip(self), fields(bucket = %bucket, key = %key))]
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Bytes, ObjectMetadata), StorageError> {
        let start_time = std::time::Instant::now();
        let result = self.inner.get_object(bucket, key).await?;

        let duration = start_time.elapsed().as_secs_f64();
        metrics::record_storage_op("get", BACKEND, duration);
        tracing::debug!(
            bucket = %bucket,
            key = %key,
            size = result.0.len(),
            duration_ms = duration * 1000.0,
            "FileStorage get object completed"
        );
        Ok(result)
    }

    #[tracing::instrument(skip(self), fields(bucket = %bucket, key = %key))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let start_time = std::time::Instant::now();

        let inner = self.inner.clone();
        let bucket_owned = bucket.to_string();
        let key_owned = key.to_string();
        run_to_completion(async move { inner.delete_object(&bucket_owned, &key_owned).await })
            .await?;

        metrics::record_storage_op("delete", BACKEND, start_time.elapsed().as_secs_f64());
        tracing::debug!(bucket = %bucket, key = %key, "delete object completed");
        Ok(())
    }
}
