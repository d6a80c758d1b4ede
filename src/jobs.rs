//! Background jobs that keep the limiter's peak rate and the persisted
//! analytics in step.

use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::scheduler::Job;
use crate::stats::StatsAggregator;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, warn};

/// Starts a new peak-rate epoch: clears the in-memory peak, then the stored one.
pub struct PeakRateResetJob {
    limiter: Arc<RateLimiter>,
    storage: Arc<dyn Storage>,
}

impl PeakRateResetJob {
    pub fn new(limiter: Arc<RateLimiter>, storage: Arc<dyn Storage>) -> Self {
        Self { limiter, storage }
    }
}

#[async_trait]
impl Job for PeakRateResetJob {
    fn name(&self) -> &str {
        "jobs/reset-peak-rate"
    }

    async fn run(&self) -> Result<()> {
        let last_peak_rate = self.limiter.reset_peak_rate();
        info!(last_peak_rate, "in-memory peak rate reset");

        self.storage.reset_peak_rate().await?;
        info!(last_peak_rate, "peak rate reset completed");
        Ok(())
    }
}

/// Persists a statistics snapshot.
pub struct AnalyticsJob {
    aggregator: StatsAggregator,
}

impl AnalyticsJob {
    pub fn new(aggregator: StatsAggregator) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl Job for AnalyticsJob {
    fn name(&self) -> &str {
        "jobs/analytics"
    }

    async fn run(&self) -> Result<()> {
        let statistic = self.aggregator.publish().await?;
        info!(
            total_url_count = statistic.total_url_count,
            url_per_min = statistic.url_per_min,
            day_peak = statistic.day_peak,
            "analytics updated"
        );
        Ok(())
    }
}

/// Restore the peak rate persisted earlier today, so a restart does not lose
/// the day's high-water mark. Returns the seeded value, if any.
pub async fn seed_peak_rate(
    storage: &dyn Storage,
    limiter: &RateLimiter,
    tz: Tz,
) -> Option<usize> {
    seed_peak_rate_at(storage, limiter, tz, Utc::now()).await
}

async fn seed_peak_rate_at(
    storage: &dyn Storage,
    limiter: &RateLimiter,
    tz: Tz,
    now: DateTime<Utc>,
) -> Option<usize> {
    let record = match storage.last_peak_rate().await {
        Ok(record) => record,
        Err(Error::NotFound) => {
            info!("no persisted peak rate, starting from zero");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "failed getting last peak rate");
            return None;
        }
    };

    let same_day = record.last_update.with_timezone(&tz).date_naive()
        == now.with_timezone(&tz).date_naive();

    info!(
        day_peak = record.day_peak,
        last_update = %record.last_update,
        same_day,
        "last peak rate loaded"
    );

    if !same_day || record.day_peak == 0 {
        return None;
    }

    limiter.set_peak_rate(record.day_peak);
    Some(record.day_peak)
}
