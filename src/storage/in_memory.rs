use crate::observability::metrics;
use crate::storage::validation::{validate_bucket_name, validate_object_key};
use crate::storage::{
    effective_content_type, now_secs, Bucket, ObjectMetadata, StorageBackend, StorageError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    meta: ObjectMetadata,
}

/// In-memory storage implementation.
///
/// Data structures:
/// - `buckets`: bucket records in creation order, mirroring the bucket index
/// - `objects`: a BTreeMap keyed by (bucket, key) => StoredObject
///
/// Locks are always taken buckets first, then objects.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    buckets: Arc<RwLock<Vec<Bucket>>>,
    objects: Arc<RwLock<BTreeMap<(String, String), StoredObject>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn has_bucket(buckets: &[Bucket], name: &str) -> bool {
    buckets.iter().any(|b| b.name == name)
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, StorageError> {
        Ok(self.buckets.read().await.clone())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(has_bucket(&self.buckets.read().await, bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<Bucket, StorageError> {
        let start_time = std::time::Instant::now();
        validate_bucket_name(bucket)?;

        let mut b = self.buckets.write().await;
        if has_bucket(&b, bucket) {
            return Err(StorageError::BucketAlreadyExists(bucket.to_string()));
        }
        let created = Bucket::new_active(bucket, now_secs());
        b.push(created.clone());
        metrics::set_bucket_count(BACKEND, b.len());
        metrics::record_storage_op("create_bucket", BACKEND, start_time.elapsed().as_secs_f64());
        Ok(created)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let start_time = std::time::Instant::now();
        let mut b = self.buckets.write().await;
        if !has_bucket(&b, bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        {
            let objs = self.objects.read().await;
            if objs.keys().any(|(b, _k)| b == bucket) {
                return Err(StorageError::BucketNotEmpty(bucket.to_string()));
            }
        }
        b.retain(|existing| existing.name != bucket);
        metrics::set_bucket_count(BACKEND, b.len());
        metrics::record_storage_op("delete_bucket", BACKEND, start_time.elapsed().as_secs_f64());
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<ObjectMetadata, StorageError> {
        let start_time = std::time::Instant::now();
        validate_object_key(key)?;

        let b = self.buckets.read().await;
        if !has_bucket(&b, bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        let meta = ObjectMetadata {
            key: key.to_string(),
            size: data.len() as u64,
            content_type: effective_content_type(content_type),
            last_modified: now_secs(),
        };

        let mut objs = self.objects.write().await;
        let previous = objs.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                meta: meta.clone(),
            },
        );
        let (old_count, old_bytes) = previous.map(|p| (1, p.meta.size)).unwrap_or((0, 0));
        metrics::adjust_object_totals(BACKEND, 1 - old_count, meta.size as i64 - old_bytes as i64);
        metrics::record_storage_op("put", BACKEND, start_time.elapsed().as_secs_f64());
        Ok(meta)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Bytes, ObjectMetadata), StorageError> {
        let start_time = std::time::Instant::now();
        let b = self.buckets.read().await;
        if !has_bucket(&b, bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let objs = self.objects.read().await;
        let obj = objs
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        metrics::record_storage_op("get", BACKEND, start_time.elapsed().as_secs_f64());
        Ok((obj.data.clone(), obj.meta.clone()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let start_time = std::time::Instant::now();
        let b = self.buckets.read().await;
        if !has_bucket(&b, bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let mut objs = self.objects.write().await;
        let removed = objs
            .remove(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        metrics::adjust_object_totals(BACKEND, -1, -(removed.meta.size as i64));
        metrics::record_storage_op("delete", BACKEND, start_time.elapsed().as_secs_f64());
        Ok(())
    }
}
