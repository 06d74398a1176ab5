//! One simulated user: a loop of timed transaction iterations.
use crate::collector::{ResultRecord, ResultSender};
use crate::script::{CustomTimers, ScriptContext, ScriptError, TransactionFactory};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Placeholder for script failures that carry no message. Error rows must
/// hold a non-empty string to be counted downstream.
pub(crate) const UNDEFINED_ERROR: &str = "undefined error";

/// Timestamps shared by every agent in a group, taken once when the pool
/// thread begins. The monotonic clock drives deadlines and durations; the
/// wall clock feeds the persisted `elapsed`/`epoch` fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupStart {
    pub instant: Instant,
    pub wall: SystemTime,
}

impl GroupStart {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: SystemTime::now(),
        }
    }
}

pub(crate) struct Agent {
    pub cx: ScriptContext,
    pub group_name: Arc<str>,
    pub start_delay: Duration,
    pub run_time: Duration,
    pub group_start: GroupStart,
    pub factory: Arc<dyn TransactionFactory>,
    pub results: ResultSender,
}

impl Agent {
    /// Runs iterations until the group deadline passes. The deadline is
    /// checked only between iterations, so an in-flight iteration always
    /// completes and total observed run time is never less than configured.
    pub async fn run(self) {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        let mut transaction = match self.factory.construct(&self.cx) {
            Ok(transaction) => transaction,
            Err(err) => {
                error!(
                    "failed initializing transaction for user group {}: {err}",
                    self.group_name
                );
                error!(
                    "aborting agent {} of user group {}",
                    self.cx.thread_num, self.group_name
                );
                return;
            }
        };
        let mut timers = CustomTimers::new();

        while self.group_start.instant.elapsed() < self.run_time {
            let start = Instant::now();
            let error = match transaction.run(&mut timers).await {
                Ok(()) => String::new(),
                Err(err) => describe(err.as_ref()),
            };
            let duration = start.elapsed().as_secs_f64();

            let elapsed = SystemTime::now()
                .duration_since(self.group_start.wall)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();

            let record = ResultRecord {
                elapsed,
                epoch,
                group_name: Arc::clone(&self.group_name),
                duration,
                error,
                custom_timers: timers.clone(),
            };
            if self.results.send(record).await.is_err() {
                debug!(
                    "results channel closed; agent {} of user group {} stopping",
                    self.cx.thread_num, self.group_name
                );
                return;
            }
        }
    }
}

fn describe(err: &(dyn std::error::Error + Send + Sync)) -> String {
    let message = err.to_string();
    if message.is_empty() {
        UNDEFINED_ERROR.to_string()
    } else {
        message
    }
}
