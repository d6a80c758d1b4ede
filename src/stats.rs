//! Usage statistics: the snapshot pushed to storage on every analytics tick.

use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// URL count for one resource (the host part of the stored URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub resource: String,
    pub url_count: usize,
}

/// Last persisted peak rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPeakRecord {
    pub day_peak: usize,
    pub last_update: DateTime<Utc>,
}

/// Point-in-time statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistic {
    pub total_url_count: usize,
    /// Write events in the limiter's current window. The window is one minute
    /// by default; with another `TIME_FRAME` this is the count per that window.
    pub url_per_min: usize,
    pub day_peak: usize,
    pub leaders: Vec<ResourceInfo>,
}

/// A statistic as it was persisted by the last analytics tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStats {
    pub total_url_count: usize,
    pub day_peak: usize,
    pub leaders: Vec<ResourceInfo>,
    pub updated_at: DateTime<Utc>,
}

impl StoredStats {
    /// Combine persisted figures with the live rate.
    pub fn with_rate(self, url_per_min: usize) -> Statistic {
        Statistic {
            total_url_count: self.total_url_count,
            url_per_min,
            day_peak: self.day_peak,
            leaders: self.leaders,
        }
    }
}

/// Gathers a [`Statistic`] from storage and the limiter and persists it.
#[derive(Clone)]
pub struct StatsAggregator {
    storage: Arc<dyn Storage>,
    limiter: Arc<RateLimiter>,
}

impl StatsAggregator {
    pub fn new(storage: Arc<dyn Storage>, limiter: Arc<RateLimiter>) -> Self {
        Self { storage, limiter }
    }

    pub async fn snapshot(&self) -> Result<Statistic> {
        let total_url_count = self.storage.url_count().await?;
        let leaders = self.storage.resource_leaders().await?;

        Ok(Statistic {
            total_url_count,
            url_per_min: self.limiter.current_rate(),
            day_peak: self.limiter.peak_rate(),
            leaders,
        })
    }

    /// Take a snapshot and upsert it. Nothing is written if any read fails.
    pub async fn publish(&self) -> Result<Statistic> {
        let statistic = self.snapshot().await?;
        self.storage.update_stats(&statistic).await?;
        Ok(statistic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::LimiterConfig;
    use crate::storage::failing::{FailingStorage, Op};
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    fn aggregator() -> (Arc<MemoryStorage>, Arc<RateLimiter>, StatsAggregator) {
        let storage = Arc::new(MemoryStorage::new());
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new(
            10,
            0,
            Duration::from_secs(60),
        )));
        let aggregator = StatsAggregator::new(storage.clone(), limiter.clone());
        (storage, limiter, aggregator)
    }

    #[tokio::test]
    async fn test_snapshot_combines_storage_and_limiter() {
        let (storage, limiter, aggregator) = aggregator();
        storage.save_url("example.com/a", "a").await.unwrap();
        storage.save_url("example.com/b", "b").await.unwrap();
        storage.save_url("rust-lang.org", "c").await.unwrap();
        limiter.add();
        limiter.add();
        limiter.set_peak_rate(7);

        let statistic = aggregator.snapshot().await.unwrap();

        assert_eq!(statistic.total_url_count, 3);
        assert_eq!(statistic.url_per_min, 2);
        assert_eq!(statistic.day_peak, 7);
        assert_eq!(
            statistic.leaders[0],
            ResourceInfo {
                resource: "example.com".to_string(),
                url_count: 2
            }
        );
    }

    #[tokio::test]
    async fn test_publish_persists_snapshot() {
        let (storage, limiter, aggregator) = aggregator();
        limiter.add();

        let published = aggregator.publish().await.unwrap();
        let stored = storage.stats().await.unwrap().unwrap();

        assert_eq!(stored.day_peak, published.day_peak);
        assert_eq!(stored.total_url_count, 0);
        assert_eq!(storage.last_peak_rate().await.unwrap().day_peak, 1);
    }

    async fn publish_with_failing(op: Op) -> (Arc<FailingStorage>, Result<Statistic>) {
        let storage = Arc::new(FailingStorage::failing(&[op]));
        storage.save_url("example.com/a", "a").await.unwrap();
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new(
            10,
            0,
            Duration::from_secs(60),
        )));
        limiter.add();

        let result = StatsAggregator::new(storage.clone(), limiter).publish().await;
        (storage, result)
    }

    #[tokio::test]
    async fn test_failed_count_skips_update() {
        let (storage, result) = publish_with_failing(Op::UrlCount).await;

        assert!(result.is_err());
        assert_eq!(storage.update_calls(), 0);
        assert!(storage.inner().stats().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_leaders_skips_update() {
        let (storage, result) = publish_with_failing(Op::ResourceLeaders).await;

        assert!(result.is_err());
        assert_eq!(storage.update_calls(), 0);
        assert!(storage.inner().stats().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_update_is_reported() {
        let (storage, result) = publish_with_failing(Op::UpdateStats).await;

        assert!(result.is_err());
        assert_eq!(storage.update_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_counts_events_in_configured_window() {
        let storage = Arc::new(MemoryStorage::new());
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new(
            10,
            0,
            Duration::from_secs(10),
        )));
        let aggregator = StatsAggregator::new(storage, limiter.clone());

        limiter.add();
        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.add();
        limiter.add();

        let statistic = aggregator.snapshot().await.unwrap();
        assert_eq!(statistic.url_per_min, 2);
        assert_eq!(statistic.day_peak, 2);
    }
}
