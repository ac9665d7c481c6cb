// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

/// Prometheus metrics definitions for s3lite
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint", "status"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    ).unwrap();

    /// HTTP request count
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Storage Metrics
    // ============================================================================

    /// Storage operation duration in seconds
    pub static ref STORAGE_OP_DURATION: HistogramVec = register_histogram_vec!(
        "storage_operation_duration_seconds",
        "Storage operation duration in seconds",
        &["operation", "backend"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Storage lock wait duration in seconds
    pub static ref STORAGE_LOCK_WAIT: HistogramVec = register_histogram_vec!(
        "storage_lock_wait_duration_seconds",
        "Storage lock wait duration in seconds",
        &["lock_type"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.500, 1.0]
    ).unwrap();

    /// Number of buckets in the bucket index
    pub static ref STORAGE_BUCKETS_TOTAL: GaugeVec = register_gauge_vec!(
        "storage_buckets_total",
        "Number of buckets in storage",
        &["backend"]
    ).unwrap();

    /// Total number of objects in storage
    pub static ref STORAGE_OBJECTS_TOTAL: GaugeVec = register_gauge_vec!(
        "storage_objects_total",
        "Total number of objects in storage",
        &["backend"]
    ).unwrap();

    /// Total bytes in storage
    pub static ref STORAGE_BYTES_TOTAL: GaugeVec = register_gauge_vec!(
        "storage_bytes_total",
        "Total bytes in storage",
        &["backend"]
    ).unwrap();

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Error count by type and component
    pub static ref ERROR_TOTAL: CounterVec = register_counter_vec!(
        "error_total",
        "Total number of errors",
        &["error_type", "component"]
    ).unwrap();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Record storage operation duration
pub fn record_storage_op(operation: &str, backend: &str, duration: f64) {
    STORAGE_OP_DURATION
        .with_label_values(&[operation, backend])
        .observe(duration);
}

/// Record lock wait duration
pub fn record_lock_wait(lock_type: &str, duration: f64) {
    STORAGE_LOCK_WAIT
        .with_label_values(&[lock_type])
        .observe(duration);
}

pub fn set_bucket_count(backend: &str, count: usize) {
    STORAGE_BUCKETS_TOTAL
        .with_label_values(&[backend])
        .set(count as f64);
}

/// Reset object and byte totals, used after loading indexes at startup
pub fn set_object_totals(backend: &str, objects: usize, bytes: u64) {
    STORAGE_OBJECTS_TOTAL
        .with_label_values(&[backend])
        .set(objects as f64);
    STORAGE_BYTES_TOTAL
        .with_label_values(&[backend])
        .set(bytes as f64);
}

/// Apply the change made by a single put or delete
pub fn adjust_object_totals(backend: &str, objects_delta: i64, bytes_delta: i64) {
    STORAGE_OBJECTS_TOTAL
        .with_label_values(&[backend])
        .add(objects_delta as f64);
    STORAGE_BYTES_TOTAL
        .with_label_values(&[backend])
        .add(bytes_delta as f64);
}

/// Increment error counter
pub fn increment_error(error_type: &str, component: &str) {
    ERROR_TOTAL
        .with_label_values(&[error_type, component])
        .inc();
}

/// Increment HTTP request counter
pub fn increment_http_request(method: &str, endpoint: &str, status: &str) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, status])
        .inc();
}

/// Record HTTP request duration
pub fn record_http_duration(method: &str, endpoint: &str, status: &str, duration: f64) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, endpoint, status])
        .observe(duration);
}

/// Gather all metrics for Prometheus exposition
pub fn gather_metrics() -> Vec<u8> {
    use prometheus::Encoder;
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {e}");
    }
    buffer
}
