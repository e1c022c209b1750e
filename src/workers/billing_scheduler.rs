use chrono::{Datelike, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::BillingConfig;
use crate::payments::types::BillingPeriod;
use crate::services::billing_runner::BillingRunner;

#[derive(Debug, Clone)]
pub struct BillingSchedulerConfig {
    /// How often the worker wakes up to check whether a run is due.
    pub interval: Duration,
    /// Day of month on or after which the current month is billed.
    pub run_day: u32,
}

impl Default for BillingSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            run_day: 1,
        }
    }
}

impl From<&BillingConfig> for BillingSchedulerConfig {
    fn from(config: &BillingConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.scheduler_interval_secs),
            run_day: config.run_day,
        }
    }
}

/// Runs the monthly autopay batch once per month per process. A restart may
/// run the month again; the runner skips periods that are already billed.
pub struct BillingSchedulerWorker {
    runner: Arc<BillingRunner>,
    config: BillingSchedulerConfig,
    last_run: Option<NaiveDate>,
}

impl BillingSchedulerWorker {
    pub fn new(runner: Arc<BillingRunner>, config: BillingSchedulerConfig) -> Self {
        Self {
            runner,
            config,
            last_run: None,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            run_day = self.config.run_day,
            "billing scheduler worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("billing scheduler worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.tick(Utc::now().date_naive()).await;
                }
            }
        }

        info!("billing scheduler worker stopped");
    }

    async fn tick(&mut self, today: NaiveDate) {
        let Some(period) = self.due_period(today) else {
            return;
        };

        match self.runner.run(period).await {
            Ok(summary) => {
                self.last_run = Some(period.start);
                info!(
                    period = %period,
                    successful = summary.successful,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "scheduled billing run complete"
                );
            }
            // Retried on the next tick.
            Err(e) => error!(period = %period, error = %e, "scheduled billing run failed"),
        }
    }

    fn due_period(&self, today: NaiveDate) -> Option<BillingPeriod> {
        if today.day() < self.config.run_day {
            return None;
        }
        let period = BillingPeriod::month_of(today);
        if self.last_run == Some(period.start) {
            return None;
        }
        Some(period)
    }
}
