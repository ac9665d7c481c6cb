/// Health report served at `/health`
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::storage::StorageBackend;

const HEALTHY: &str = "healthy";
const UNHEALTHY: &str = "unhealthy";

/// Overall health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub checks: Vec<HealthCheck>,
}

impl HealthStatus {
    fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let healthy = checks.iter().all(HealthCheck::is_healthy);
        Self {
            status: if healthy { HEALTHY } else { UNHEALTHY }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            checks,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY
    }
}

/// Individual health check result
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub duration_ms: f64,
}

impl HealthCheck {
    fn finished(name: &str, started: Instant, outcome: Result<String, String>) -> Self {
        let (status, message) = match outcome {
            Ok(msg) => (HEALTHY, msg),
            Err(msg) => (UNHEALTHY, msg),
        };
        Self {
            name: name.to_string(),
            status: status.to_string(),
            message: Some(message),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY
    }
}

/// Reads the whole bucket index; a backend that cannot list is unhealthy.
pub async fn check_storage_health(storage: &Arc<dyn StorageBackend>) -> HealthCheck {
    let started = Instant::now();
    let outcome = storage
        .list_buckets()
        .await
        .map(|buckets| format!("{} buckets", buckets.len()))
        .map_err(|e| format!("Storage check failed: {}", e));
    HealthCheck::finished("storage", started, outcome)
}

pub async fn get_health_status(storage: &Arc<dyn StorageBackend>) -> HealthStatus {
    HealthStatus::from_checks(vec![check_storage_health(storage).await])
}
