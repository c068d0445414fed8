use std::time::{Duration, Instant};

use common_observability::TerminalMetrics;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::CheckoutError;
use crate::orchestrator::CheckoutOrchestrator;
use crate::square::CheckoutStatus;
use crate::store::CheckoutRecord;

#[derive(Debug)]
pub enum PollOutcome {
    Completed(CheckoutRecord),
    Canceled(CheckoutRecord),
    TimedOut(CheckoutRecord),
}

impl PollOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Completed(_) => "completed",
            PollOutcome::Canceled(_) => "canceled",
            PollOutcome::TimedOut(_) => "timed_out",
        }
    }

    pub fn record(&self) -> &CheckoutRecord {
        match self {
            PollOutcome::Completed(record)
            | PollOutcome::Canceled(record)
            | PollOutcome::TimedOut(record) => record,
        }
    }

    pub fn into_record(self) -> CheckoutRecord {
        match self {
            PollOutcome::Completed(record)
            | PollOutcome::Canceled(record)
            | PollOutcome::TimedOut(record) => record,
        }
    }
}

/// Re-queries a checkout on a fixed cadence until it reaches a terminal
/// status or the attempt budget runs out. Transient processor errors
/// consume an attempt instead of aborting, so a flaky network cannot end
/// the wait early while the buyer is still at the terminal.
pub struct StatusPoller {
    interval: Duration,
    max_attempts: u32,
    metrics: TerminalMetrics,
}

impl StatusPoller {
    pub fn new(config: &ServiceConfig, metrics: TerminalMetrics) -> Self {
        Self {
            interval: config.poll_interval,
            max_attempts: config.poll_max_attempts,
            metrics,
        }
    }

    pub async fn run(
        &self,
        orchestrator: &CheckoutOrchestrator,
        tenant_id: Uuid,
        checkout_id: &str,
    ) -> Result<PollOutcome, CheckoutError> {
        let started = Instant::now();
        let mut last_seen: Option<CheckoutRecord> = None;
        for attempt in 1..=self.max_attempts {
            match orchestrator.checkout_status(tenant_id, checkout_id).await {
                Ok(record) => match CheckoutStatus::from_wire(&record.status) {
                    CheckoutStatus::Completed => {
                        self.metrics.record_poll_attempt("completed");
                        self.metrics
                            .observe_poll_duration(started.elapsed().as_secs_f64());
                        return Ok(PollOutcome::Completed(record));
                    }
                    CheckoutStatus::Canceled => {
                        self.metrics.record_poll_attempt("canceled");
                        self.metrics
                            .observe_poll_duration(started.elapsed().as_secs_f64());
                        return Ok(PollOutcome::Canceled(record));
                    }
                    _ => {
                        self.metrics.record_poll_attempt("pending");
                        last_seen = Some(record);
                    }
                },
                Err(CheckoutError::NotFound) => return Err(CheckoutError::NotFound),
                Err(err) => {
                    warn!(
                        checkout_id,
                        attempt,
                        error = %err,
                        "status poll attempt failed"
                    );
                    self.metrics.record_poll_attempt("error");
                }
            }
            if attempt < self.max_attempts {
                sleep(self.interval).await;
            }
        }

        warn!(
            checkout_id,
            attempts = self.max_attempts,
            "checkout still unfinished after polling window"
        );
        self.metrics
            .observe_poll_duration(started.elapsed().as_secs_f64());
        let record = match last_seen {
            Some(record) => record,
            None => orchestrator.find_checkout(tenant_id, checkout_id).await?,
        };
        Ok(PollOutcome::TimedOut(record))
    }
}
