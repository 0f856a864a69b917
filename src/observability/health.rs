use crate::rate_limit::{ConnectionState, RedisCounterStore};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: ComponentStatus,
    pub rate_limit_backend: ComponentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    pub message: Option<String>,
}

pub struct HealthChecker {
    db_pool: PgPool,
    redis: Option<Arc<RedisCounterStore>>,
}

impl HealthChecker {
    pub fn new(db_pool: PgPool, redis: Option<Arc<RedisCounterStore>>) -> Self {
        Self { db_pool, redis }
    }

    /// Liveness check - is the service running?
    pub async fn liveness(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                database: ComponentStatus {
                    status: "unknown".to_string(),
                    message: None,
                },
                rate_limit_backend: ComponentStatus {
                    status: "unknown".to_string(),
                    message: None,
                },
            },
        }
    }

    /// Readiness check - can the service handle requests?
    ///
    /// The distributed counter backend is reported but never gates
    /// readiness: the service runs fully on the in-memory store when
    /// Redis is down or absent.
    pub async fn readiness(&self) -> HealthStatus {
        let db_status = self.check_database().await;
        let backend_status = self.check_rate_limit_backend();

        let overall_status = if db_status.status == "ok" {
            "ok"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                database: db_status,
                rate_limit_backend: backend_status,
            },
        }
    }

    async fn check_database(&self) -> ComponentStatus {
        match crate::db::health_check(&self.db_pool).await {
            Ok(_) => ComponentStatus {
                status: "ok".to_string(),
                message: None,
            },
            Err(e) => ComponentStatus {
                status: "error".to_string(),
                message: Some(format!("Database check failed: {}", e)),
            },
        }
    }

    fn check_rate_limit_backend(&self) -> ComponentStatus {
        let Some(redis) = &self.redis else {
            return ComponentStatus {
                status: "disabled".to_string(),
                message: Some("Distributed counter store not configured".to_string()),
            };
        };

        let status = match redis.state() {
            ConnectionState::Connected => "ok",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Errored => "error",
            ConnectionState::Disconnected => "closed",
        };
        ComponentStatus {
            status: status.to_string(),
            message: None,
        }
    }
}
