//! Persistence for short URLs and analytics.

#[cfg(test)]
pub(crate) mod failing;
mod memory;
mod redis;

pub use self::memory::MemoryStorage;
pub use self::redis::RedisStorage;

use crate::error::Result;
use crate::stats::{DayPeakRecord, ResourceInfo, Statistic, StoredStats};
use async_trait::async_trait;

/// How many resources the leaderboard keeps.
pub const LEADERS_LIMIT: usize = 3;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Fails with `Error::AlreadyExists` if the alias is taken.
    async fn save_url(&self, url: &str, alias: &str) -> Result<()>;

    /// Fails with `Error::NotFound` for unknown aliases.
    async fn get_url(&self, alias: &str) -> Result<String>;

    /// Fails with `Error::NotFound` for unknown aliases.
    async fn delete_url(&self, alias: &str) -> Result<()>;

    async fn url_count(&self) -> Result<usize>;

    /// Resources with the most URLs, busiest first.
    async fn resource_leaders(&self) -> Result<Vec<ResourceInfo>>;

    /// Fails with `Error::NotFound` if no statistic was ever persisted.
    async fn last_peak_rate(&self) -> Result<DayPeakRecord>;

    async fn update_stats(&self, statistic: &Statistic) -> Result<()>;

    async fn reset_peak_rate(&self) -> Result<()>;

    async fn stats(&self) -> Result<Option<StoredStats>>;

    async fn ping(&self) -> Result<()>;

    fn backend(&self) -> &'static str;
}

/// The resource a stored URL belongs to: everything before the first `/`.
pub fn resource_of(url: &str) -> &str {
    url.split('/').next().unwrap_or(url)
}
