//! Refresh pipeline (fetch, parse, store) and its daily scheduler

use super::error::Result;
use super::rate::RateSource;
use super::store::RateStore;
use crate::providers::cbr::parse_rates;
use anyhow::Context;
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated { entries: usize },
    /// Another refresh was still running
    Skipped,
}

pub struct Refresher {
    source: Arc<dyn RateSource>,
    store: Arc<dyn RateStore>,
    base_currency: String,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Refresher {
    pub fn new(
        source: Arc<dyn RateSource>,
        store: Arc<dyn RateStore>,
        base_currency: &str,
    ) -> Self {
        Self {
            source,
            store,
            base_currency: base_currency.to_string(),
            running: AtomicBool::new(false),
        }
    }

    /// Runs fetch → parse → store once. The document is fully parsed before
    /// the first write, so a bad document never touches the store.
    #[instrument(name = "RatesRefresh", skip(self))]
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Refresh already running, skipping");
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let document = self.source.fetch().await?;
        let snapshot = parse_rates(&document, &self.base_currency)?;

        for (code, value) in snapshot.iter() {
            self.store.set(code, value).await?;
        }

        info!(
            entries = snapshot.len(),
            date = snapshot.date.as_deref().unwrap_or("unknown"),
            "Rates updated"
        );
        Ok(RefreshOutcome::Updated {
            entries: snapshot.len(),
        })
    }
}

/// Fires once a day at a fixed local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32) -> anyhow::Result<Self> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0)
            .with_context(|| format!("Invalid refresh time {hour:02}:{minute:02}"))?;
        Ok(Self { at })
    }

    /// First firing strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.at);
        if today > now {
            today
        } else {
            today + TimeDelta::days(1)
        }
    }

    pub fn until_next(&self, now: NaiveDateTime) -> Duration {
        (self.next_after(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Source of the local wall-clock time the schedule is evaluated against.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct Scheduler {
    refresher: Arc<Refresher>,
    schedule: DailySchedule,
    clock: Clock,
}

impl Scheduler {
    pub fn new(refresher: Arc<Refresher>, schedule: DailySchedule) -> Self {
        Self {
            refresher,
            schedule,
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs one refresh and logs the outcome. Errors never escape.
    pub async fn refresh_now(&self) {
        match self.refresher.refresh().await {
            Ok(RefreshOutcome::Updated { entries }) => {
                info!(entries, "Scheduled refresh finished")
            }
            Ok(RefreshOutcome::Skipped) => {}
            Err(e) => error!(error = %e, "Refresh failed, keeping previous rates"),
        }
    }

    pub async fn run_forever(self) {
        loop {
            let now = (self.clock)();
            let wait = self.schedule.until_next(now);
            info!(
                next = %self.schedule.next_after(now),
                "Next rates refresh scheduled"
            );
            tokio::time::sleep(wait).await;
            self.refresh_now().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run_forever())
    }
}
