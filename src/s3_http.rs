use crate::handler::BaseHandler;
use crate::observability::{health, metrics};
use crate::storage::{Bucket, StorageError};
use axum::{
    body::Body,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Instant;

/// Largest object body accepted when no other limit is configured.
pub const DEFAULT_MAX_OBJECT_SIZE: usize = 512 * 1024 * 1024;

/// S3 HTTP handler wrapping BaseHandler
#[derive(Clone)]
pub struct S3HttpHandler {
    handler: Arc<BaseHandler>,
    max_object_size: usize,
}

impl S3HttpHandler {
    pub fn new(handler: BaseHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
        }
    }

    pub fn with_max_object_size(mut self, max_object_size: usize) -> Self {
        self.max_object_size = max_object_size;
        self
    }

    /// Create the router for S3 HTTP API
    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(list_buckets))
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_export))
            .route("/:bucket", put(create_bucket).delete(delete_bucket))
            .route(
                "/:bucket/*key",
                put(put_object).get(get_object).delete(delete_object),
            )
            .layer(DefaultBodyLimit::max(self.max_object_size))
            .with_state(self.handler)
    }
}

#[derive(Debug)]
enum S3Error {
    InvalidBucketName(String),
    InvalidArgument(String),
    InvalidContentLength(String),
    BodyRejected(BytesRejection),
    BucketAlreadyExists(String),
    BucketNotEmpty(String),
    NoSuchBucket(String),
    NoSuchKey { bucket: String, key: String },
    Internal(String),
}

impl From<StorageError> for S3Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::BucketNotFound(b) => S3Error::NoSuchBucket(b),
            StorageError::BucketAlreadyExists(b) => S3Error::BucketAlreadyExists(b),
            StorageError::BucketNotEmpty(b) => S3Error::BucketNotEmpty(b),
            StorageError::ObjectNotFound { bucket, key } => S3Error::NoSuchKey { bucket, key },
            StorageError::InvalidInput(msg) => S3Error::InvalidArgument(msg),
            StorageError::Internal(msg) => S3Error::Internal(msg),
        }
    }
}

impl S3Error {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            S3Error::InvalidBucketName(_) => (StatusCode::BAD_REQUEST, "InvalidBucketName"),
            S3Error::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "InvalidArgument"),
            S3Error::InvalidContentLength(_) => (StatusCode::BAD_REQUEST, "InvalidContentLength"),
            S3Error::BodyRejected(r) if r.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                (StatusCode::PAYLOAD_TOO_LARGE, "EntityTooLarge")
            }
            S3Error::BodyRejected(r) => (r.status(), "IncompleteBody"),
            S3Error::BucketAlreadyExists(_) => (StatusCode::CONFLICT, "BucketAlreadyExists"),
            S3Error::BucketNotEmpty(_) => (StatusCode::CONFLICT, "BucketNotEmpty"),
            S3Error::NoSuchBucket(_) => (StatusCode::NOT_FOUND, "NoSuchBucket"),
            S3Error::NoSuchKey { .. } => (StatusCode::NOT_FOUND, "NoSuchKey"),
            S3Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        }
    }

    fn message(&self) -> String {
        match self {
            S3Error::InvalidBucketName(msg)
            | S3Error::InvalidArgument(msg)
            | S3Error::InvalidContentLength(msg) => msg.clone(),
            S3Error::BodyRejected(r) => r.body_text(),
            S3Error::BucketAlreadyExists(b) => format!("The bucket {b} already exists"),
            S3Error::BucketNotEmpty(b) => format!("The bucket {b} is not empty"),
            S3Error::NoSuchBucket(b) => format!("The bucket {b} does not exist"),
            S3Error::NoSuchKey { bucket, key } => {
                format!("The key {key} does not exist in bucket {bucket}")
            }
            S3Error::Internal(_) => "We encountered an internal error. Please try again.".into(),
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if let S3Error::Internal(detail) = &self {
            tracing::error!(code, "request failed: {detail}");
        } else {
            tracing::debug!(code, status = status.as_u16(), "request rejected");
        }
        metrics::increment_error(code, "http");

        let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error>");
        push_xml_field(&mut body, "Code", code);
        push_xml_field(&mut body, "Message", &self.message());
        body.push_str("</Error>");
        (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn push_xml_field(body: &mut String, tag: &str, value: &str) {
    body.push_str(&format!("<{}>{}</{}>", tag, xml_escape(value), tag));
}

fn xml_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn list_buckets_xml(buckets: &[Bucket]) -> String {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    body.push_str("<ListAllBucketsResult>");
    body.push_str("<Owner><ID></ID><DisplayName></DisplayName></Owner>");
    body.push_str("<Buckets>");
    for bucket in buckets {
        body.push_str("<Bucket>");
        push_xml_field(&mut body, "Name", &bucket.name);
        push_xml_field(&mut body, "CreationTime", &xml_timestamp(&bucket.creation_time));
        push_xml_field(&mut body, "LastModified", &xml_timestamp(&bucket.last_modified));
        push_xml_field(&mut body, "Status", &bucket.status);
        body.push_str("</Bucket>");
    }
    body.push_str("</Buckets></ListAllBucketsResult>");
    body
}

/// IMF-fixdate, as used by the Last-Modified header.
fn http_date(ts: &DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Rejects a declared Content-Length that is malformed or does not match
/// the body that actually arrived.
fn check_content_length(headers: &HeaderMap, received: usize) -> Result<(), S3Error> {
    let Some(value) = headers.get(header::CONTENT_LENGTH) else {
        return Ok(());
    };
    let declared = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            S3Error::InvalidContentLength("Content-Length must be a non-negative integer".into())
        })?;
    if declared != received as u64 {
        return Err(S3Error::InvalidContentLength(format!(
            "Content-Length {declared} does not match the {received} bytes received"
        )));
    }
    Ok(())
}

/// Records request metrics and renders the error, if any.
fn finish(
    method: &str,
    endpoint: &str,
    start: Instant,
    result: Result<Response, S3Error>,
) -> Response {
    let response = result.unwrap_or_else(IntoResponse::into_response);
    let status = response.status().as_u16().to_string();
    metrics::increment_http_request(method, endpoint, &status);
    metrics::record_http_duration(method, endpoint, &status, start.elapsed().as_secs_f64());
    response
}

/// GET / - List buckets
async fn list_buckets(State(handler): State<Arc<BaseHandler>>) -> Response {
    let start = Instant::now();
    let result = async {
        let buckets = handler.storage.list_buckets().await?;
        Ok::<_, S3Error>((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/xml")],
            list_buckets_xml(&buckets),
        )
            .into_response())
    }
    .await;
    finish("GET", "/", start, result)
}

/// PUT /{bucket} - Create bucket
async fn create_bucket(
    State(handler): State<Arc<BaseHandler>>,
    Path(bucket): Path<String>,
) -> Response {
    let start = Instant::now();
    let result = async {
        let created = handler
            .storage
            .create_bucket(&bucket)
            .await
            .map_err(|e| match e {
                StorageError::InvalidInput(msg) => S3Error::InvalidBucketName(msg),
                other => other.into(),
            })?;
        Ok::<_, S3Error>((StatusCode::OK, [(header::LOCATION, format!("/{}", created.name))]).into_response())
    }
    .await;
    finish("PUT", "/{bucket}", start, result)
}

/// DELETE /{bucket} - Delete bucket
async fn delete_bucket(
    State(handler): State<Arc<BaseHandler>>,
    Path(bucket): Path<String>,
) -> Response {
    let start = Instant::now();
    let result = async {
        handler.storage.delete_bucket(&bucket).await?;
        Ok::<_, S3Error>(StatusCode::NO_CONTENT.into_response())
    }
    .await;
    finish("DELETE", "/{bucket}", start, result)
}

/// PUT /{bucket}/{key} - Put object
async fn put_object(
    State(handler): State<Arc<BaseHandler>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let start = Instant::now();
    let result = async {
        let body = body.map_err(S3Error::BodyRejected)?;
        check_content_length(&headers, body.len())?;

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        let meta = handler
            .storage
            .put_object(&bucket, &key, body, content_type)
            .await?;

        Ok::<_, S3Error>((
            StatusCode::OK,
            [(header::LAST_MODIFIED, http_date(&meta.last_modified))],
        )
            .into_response())
    }
    .await;
    finish("PUT", "/{bucket}/{key}", start, result)
}

/// GET /{bucket}/{key} - Get object
async fn get_object(
    State(handler): State<Arc<BaseHandler>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let start = Instant::now();
    let result = async {
        let (data, meta) = handler.storage.get_object(&bucket, &key).await?;
        Ok::<_, S3Error>((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, meta.content_type.clone()),
                (header::CONTENT_LENGTH, meta.size.to_string()),
                (header::LAST_MODIFIED, http_date(&meta.last_modified)),
            ],
            Body::from(data),
        )
            .into_response())
    }
    .await;
    finish("GET", "/{bucket}/{key}", start, result)
}

/// DELETE /{bucket}/{key} - Delete object
async fn delete_object(
    State(handler): State<Arc<BaseHandler>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let start = Instant::now();
    let result = async {
        handler.storage.delete_object(&bucket, &key).await?;
        Ok::<_, S3Error>(StatusCode::NO_CONTENT.into_response())
    }
    .await;
    finish("DELETE", "/{bucket}/{key}", start, result)
}

/// GET /health - JSON health report
async fn health_check(State(handler): State<Arc<BaseHandler>>) -> Response {
    let status = health::get_health_status(&handler.storage).await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

/// GET /metrics - Prometheus text exposition
async fn metrics_export() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
        .into_response()
}
