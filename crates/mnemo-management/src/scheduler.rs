//! # Forgetting Scheduler
//!
//! Fires the forgetting sweep on a cron expression (six fields, seconds
//! first; the default `"0 0 2 * * *"` runs daily at 02:00 UTC). The loop
//! wakes on a fixed interval and fires when a scheduled instant has passed
//! since the last run, so a sweep missed while the process was busy runs
//! on the next wake-up rather than being skipped.

use chrono::{DateTime, Utc};
use cron::Schedule;
use mnemo_core::{MnemoError, Result};
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::forgetting::Forgetter;

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub struct ForgettingScheduler {
    schedule: Schedule,
    expression: String,
    forgetter: Forgetter,
    check_interval: Duration,
}

impl ForgettingScheduler {
    pub fn new(expression: &str, forgetter: Forgetter) -> Result<Self> {
        let schedule = parse_schedule(expression)?;
        Ok(Self {
            schedule,
            expression: expression.to_string(),
            forgetter,
            check_interval: DEFAULT_CHECK_INTERVAL,
        })
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Next time the sweep will fire.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }

    /// Run the scheduler loop. This should be spawned as a background task.
    pub async fn run(self) {
        info!(cron = %self.expression, next = ?self.next_run(), "forgetting scheduler started");
        let mut last_run = Utc::now();

        loop {
            tokio::time::sleep(self.check_interval).await;

            let now = Utc::now();
            if !is_due(&self.schedule, last_run, now) {
                continue;
            }
            last_run = now;

            debug!("forgetting sweep due");
            match self.forgetter.run_sweep().await {
                Ok(total) => info!(total, "scheduled forgetting sweep completed"),
                Err(e) => error!(error = %e, "scheduled forgetting sweep failed"),
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| MnemoError::Config(format!("invalid cron expression '{expression}': {e}")))
}

/// Whether a scheduled instant falls in `(since, now]`.
fn is_due(schedule: &Schedule, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    schedule.after(&since).next().is_some_and(|next| next <= now)
}
