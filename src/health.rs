use std::sync::Arc;
use std::time::{Instant, SystemTime};
use serde::{Deserialize, Serialize};

use crate::storage::Storage;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub storage: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

pub struct HealthChecker {
    storage: Arc<dyn Storage>,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            started_at: Instant::now(),
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let storage_status = self.check_storage().await;

        let overall_status = if storage_status.status == "healthy" {
            "healthy"
        } else {
            "unhealthy"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            dependencies: DependencyStatus {
                storage: storage_status,
            },
        }
    }

    async fn check_storage(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.storage.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                backend: self.storage.backend().to_string(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => ServiceStatus {
                backend: self.storage.backend().to_string(),
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}
