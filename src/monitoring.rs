use crate::services::registry::ExtensionRegistry;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub extensions: CheckResult,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: String,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

pub struct HealthChecker {
    started: Instant,
    database_pool: Option<SqlitePool>,
    registry: Arc<ExtensionRegistry>,
}

impl HealthChecker {
    pub fn new(database_pool: Option<SqlitePool>, registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            started: Instant::now(),
            database_pool,
            registry,
        }
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let checks = HealthChecks {
            database: self.check_database().await,
            extensions: self.check_extensions(),
        };

        let critical = [&checks.database, &checks.extensions]
            .iter()
            .any(|check| check.status == "critical");
        let overall_status = if critical { "critical" } else { "healthy" };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            checks,
        }
    }

    async fn check_database(&self) -> CheckResult {
        let Some(pool) = &self.database_pool else {
            return CheckResult {
                status: "healthy".to_string(),
                message: Some("In-memory job store".to_string()),
                response_time_ms: None,
            };
        };

        let start = Instant::now();
        match sqlx::query("SELECT 1").fetch_one(pool).await {
            Ok(_) => CheckResult {
                status: "healthy".to_string(),
                message: Some("Database connection successful".to_string()),
                response_time_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => CheckResult {
                status: "critical".to_string(),
                message: Some(format!("Database connection failed: {e}")),
                response_time_ms: None,
            },
        }
    }

    fn check_extensions(&self) -> CheckResult {
        let services = self.registry.service_ids();
        if services.is_empty() {
            return CheckResult {
                status: "critical".to_string(),
                message: Some("No transfer extensions installed".to_string()),
                response_time_ms: None,
            };
        }

        CheckResult {
            status: "healthy".to_string(),
            message: Some(format!("Services: {}", services.join(", "))),
            response_time_ms: None,
        }
    }
}
