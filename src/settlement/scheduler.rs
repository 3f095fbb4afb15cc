// Settlement Scheduler - fires the semester settlement once a day
//
// - Wakes at the configured local hour (school timezone)
// - Computes today's local date and hands it to the engine
// - Non-anchor days are a cheap no-op inside the engine
// - Errors and panics are logged, the loop keeps going

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone, Utc};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

use super::engine::{SettlementEngine, SettlementOutcome};
use crate::error::AppResult;
use crate::sync::pool;

/// Fallback wait when the next run cannot be computed
const RETRY_AFTER: Duration = Duration::from_secs(3600);

pub struct SettlementScheduler {
    engine: Arc<SettlementEngine>,
    execution_hour: u32,
}

impl SettlementScheduler {
    pub fn new(engine: Arc<SettlementEngine>, execution_hour: u32) -> Self {
        Self { engine, execution_hour }
    }

    /// Start the settlement scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let hour = self.execution_hour;
        tokio::spawn(async move { Self::run_daily_scheduler(engine, hour).await })
    }

    async fn run_daily_scheduler(engine: Arc<SettlementEngine>, execution_hour: u32) {
        let offset = engine.calendar().offset();
        loop {
            let now = Utc::now();
            let Some(next_execution) = Self::calculate_next_daily_execution(now, execution_hour, offset) else {
                error!(execution_hour, "❌ Cannot schedule settlement, retrying in an hour");
                tokio::time::sleep(RETRY_AFTER).await;
                continue;
            };

            let wait = next_execution.signed_duration_since(now);
            info!(
                "⏰ Next settlement check scheduled for: {}",
                next_execution.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S %:z")
            );
            if let Ok(wait) = wait.to_std() {
                tokio::time::sleep(wait).await;
            }

            let today = engine.calendar().today(Utc::now());
            info!(%today, "🔄 Starting daily settlement check");
            Self::run_cycle(today, engine.settle_semester_points(today)).await;
        }
    }

    /// One daily run. Returns false when it panicked.
    async fn run_cycle<F>(today: NaiveDate, cycle: F) -> bool
    where
        F: Future<Output = AppResult<SettlementOutcome>>,
    {
        match AssertUnwindSafe(cycle).catch_unwind().await {
            Ok(Ok(SettlementOutcome::Skipped { .. })) => info!("✓ Not a settlement day"),
            Ok(Ok(outcome)) => info!(?outcome, "✓ Settlement cycle completed"),
            Ok(Err(e)) => error!(%today, "❌ Semester settlement failed: {}", e),
            Err(payload) => {
                error!(%today, "❌ Semester settlement panicked: {}", pool::panic_message(payload));
                return false;
            }
        }
        true
    }

    /// Next `execution_hour:00` local time strictly after `now`
    fn calculate_next_daily_execution(
        now: DateTime<Utc>,
        execution_hour: u32,
        offset: FixedOffset,
    ) -> Option<DateTime<Utc>> {
        let local_today = now.with_timezone(&offset).date_naive();
        let at = |date: chrono::NaiveDate| {
            date.and_hms_opt(execution_hour, 0, 0)
                .and_then(|naive| offset.from_local_datetime(&naive).single())
                .map(|local| local.with_timezone(&Utc))
        };

        let today = at(local_today)?;
        if today > now {
            Some(today)
        } else {
            at(local_today + ChronoDuration::days(1))
        }
    }
}
