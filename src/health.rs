//! Liveness and readiness reporting for the ledger store and the processor.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

const LEDGER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `Degraded` still serves traffic; only `Unhealthy` fails readiness.
#[derive(Debug, Serialize, Clone)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    /// Worst component state wins.
    fn from_checks(checks: HashMap<String, ComponentHealth>) -> Self {
        let status = if checks.values().any(|c| c.status == ComponentState::Down) {
            HealthState::Unhealthy
        } else if checks.values().any(|c| c.status == ComponentState::Warning) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details: Some(details.into()),
        }
    }

    pub fn warning(details: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms: None,
            details: Some(details.into()),
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    /// `None` when running on in-memory stores.
    db_pool: Option<sqlx::PgPool>,
    processor_configured: bool,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, processor_configured: bool) -> Self {
        Self {
            db_pool,
            processor_configured,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("ledger".to_string(), self.check_ledger().await);
        checks.insert("processor".to_string(), self.check_processor());
        HealthStatus::from_checks(checks)
    }

    async fn check_ledger(&self) -> ComponentHealth {
        let Some(pool) = &self.db_pool else {
            return ComponentHealth::warning("in-memory stores; payments are not durable");
        };

        let started = Instant::now();
        match timeout(LEDGER_PROBE_TIMEOUT, crate::database::health_check(pool)).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed().as_millis();
                info!(response_time_ms = elapsed, "ledger health check ok");
                ComponentHealth::up(Some(elapsed))
            }
            Ok(Err(e)) => {
                error!(error = %e, "ledger health check failed");
                ComponentHealth::down(e.to_string())
            }
            Err(_) => {
                error!("ledger health check timed out");
                ComponentHealth::down("timeout")
            }
        }
    }

    /// Credentials only; the processor is never called from a probe.
    fn check_processor(&self) -> ComponentHealth {
        if self.processor_configured {
            ComponentHealth::up(None)
        } else {
            ComponentHealth::warning("processor credentials not set")
        }
    }
}
