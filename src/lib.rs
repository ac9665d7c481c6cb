pub mod config;
pub mod handler;
pub mod observability;
pub mod s3_http;
pub mod server;
pub mod storage;

pub use handler::BaseHandler;
pub use s3_http::S3HttpHandler;
pub use storage::{Bucket, ObjectMetadata, StorageBackend, StorageError};
