use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod blob_store;
pub mod bucket_index;
pub mod codec;
pub mod file_storage;
pub mod in_memory;
pub mod object_index;
pub mod validation;

/// Content type recorded when the client does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// The only bucket status the store ever writes.
pub const BUCKET_STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub creation_time: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub status: String,
}

impl Bucket {
    pub fn new_active(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            creation_time: now,
            last_modified: now,
            status: BUCKET_STATUS_ACTIVE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    pub(crate) fn io(context: &str, e: std::io::Error) -> Self {
        StorageError::Internal(format!("{context}: {e}"))
    }

    /// Short label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::BucketNotFound(_) => "bucket_not_found",
            StorageError::BucketAlreadyExists(_) => "bucket_already_exists",
            StorageError::BucketNotEmpty(_) => "bucket_not_empty",
            StorageError::ObjectNotFound { .. } => "object_not_found",
            StorageError::InvalidInput(_) => "invalid_input",
            StorageError::Internal(_) => "internal",
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, StorageError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    async fn create_bucket(&self, bucket: &str) -> Result<Bucket, StorageError>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Stores `data` under `key`, replacing any previous object with that key.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<ObjectMetadata, StorageError>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Bytes, ObjectMetadata), StorageError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// Resolves the stored content type for a PUT.
pub(crate) fn effective_content_type(content_type: Option<&str>) -> String {
    match content_type.map(str::trim) {
        Some(ct) if !ct.is_empty() => ct.to_string(),
        _ => DEFAULT_CONTENT_TYPE.to_string(),
    }
}

/// Index timestamps carry whole seconds only.
pub(crate) fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}
