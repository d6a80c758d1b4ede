//! In-process job scheduler anchored to a named time zone.
//!
//! Every job carries a [`Cadence`]. The dispatch loop keeps the jobs sorted
//! by their next fire time, sleeps until the earliest one, runs whatever is
//! due and then derives each fired job's next time afresh from the wall
//! clock, so clock and DST changes correct themselves on the next tick.

mod cron;

pub use cron::CronPattern;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of recurring background work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Local midnight.
    Daily,
    /// Start of every local minute.
    Minutely,
    /// A fixed delay after the previous run.
    Every(Duration),
    Cron(CronPattern),
}

impl Cadence {
    /// Next fire time strictly after `now`, or `None` if there is none.
    pub fn next_after(&self, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let local = now.naive_local();

        match self {
            Cadence::Daily => {
                let midnight = local.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                resolve_local(&tz, midnight, &now)
            }
            Cadence::Minutely => {
                let minute = local.with_second(0)?.with_nanosecond(0)? + TimeDelta::minutes(1);
                resolve_local(&tz, minute, &now)
            }
            Cadence::Every(period) => Some(now + TimeDelta::from_std(*period).ok()?),
            Cadence::Cron(pattern) => {
                let mut after = local;
                loop {
                    let next = pattern.next_after(after)?;
                    if let Some(resolved) = resolve_local(&tz, next, &now) {
                        return Some(resolved);
                    }
                    after = next;
                }
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily => f.write_str("daily"),
            Cadence::Minutely => f.write_str("minutely"),
            Cadence::Every(period) => write!(f, "every {}", humantime::format_duration(*period)),
            Cadence::Cron(pattern) => write!(f, "cron '{}'", pattern),
        }
    }
}

/// Map a local wall-clock time to the earliest instant after `now`.
/// Nonexistent times move forward to the end of the DST gap.
fn resolve_local(tz: &Tz, local: NaiveDateTime, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let mut candidate = local;
    // DST gaps are at most a few hours.
    for _ in 0..=(24 * 60) {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(t) => return (t > *now).then_some(t),
            LocalResult::Ambiguous(a, b) => {
                return [a, b].into_iter().find(|t| t > now);
            }
            LocalResult::None => candidate += TimeDelta::minutes(1),
        }
    }
    None
}

struct Entry {
    job: Arc<dyn Job>,
    cadence: Cadence,
    next: Option<DateTime<Utc>>,
}

impl Entry {
    fn schedule(&mut self, tz: &Tz) {
        let now = Utc::now().with_timezone(tz);
        self.next = self
            .cadence
            .next_after(now)
            .map(|next| next.with_timezone(&Utc));

        match self.next {
            Some(next) => debug!(job = self.job.name(), next = %next.with_timezone(tz), "job armed"),
            None => warn!(job = self.job.name(), cadence = %self.cadence, "job has no future run, disabling"),
        }
    }

    /// Run the job on its own task so a panic is contained and logged.
    async fn fire(&self) {
        let job = self.job.clone();
        let started = std::time::Instant::now();

        match tokio::spawn(async move { job.run().await }).await {
            Ok(Ok(())) => debug!(
                job = self.job.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job completed"
            ),
            Ok(Err(e)) => error!(job = self.job.name(), error = %e, "job failed"),
            Err(e) => error!(job = self.job.name(), error = %e, "job panicked"),
        }
    }
}

/// Registry of named jobs driven by a single dispatch loop.
pub struct Scheduler {
    tz: Tz,
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, cadence: Cadence, job: Arc<dyn Job>) -> &mut Self {
        info!(job = job.name(), cadence = %cadence, location = %self.tz, "job registered");
        self.entries.push(Entry {
            job,
            cadence,
            next: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run jobs until `cancel` fires. Cancellation is observed only while
    /// waiting, a job that already started runs to completion.
    pub async fn run(mut self, cancel: CancellationToken) {
        let tz = self.tz;
        for entry in &mut self.entries {
            entry.schedule(&tz);
        }

        loop {
            self.entries.retain(|entry| entry.next.is_some());
            self.entries.sort_by_key(|entry| entry.next);

            let Some(next) = self.entries.first().and_then(|entry| entry.next) else {
                info!("no jobs left to run, scheduler exiting");
                return;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler cancelled");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let now = Utc::now();
            for entry in &mut self.entries {
                if entry.next.is_some_and(|next| next <= now) {
                    entry.fire().await;
                    entry.schedule(&tz);
                }
            }
        }
    }
}
