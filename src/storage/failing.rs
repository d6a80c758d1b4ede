use super::{MemoryStorage, Storage};
use crate::error::{Error, Result};
use crate::stats::{DayPeakRecord, ResourceInfo, Statistic, StoredStats};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Storage operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    UrlCount,
    ResourceLeaders,
    LastPeakRate,
    UpdateStats,
    ResetPeakRate,
}

/// In-memory storage whose selected operations return `Error::Storage`.
#[derive(Default)]
pub(crate) struct FailingStorage {
    inner: MemoryStorage,
    failing: Mutex<HashSet<Op>>,
    update_calls: AtomicUsize,
}

impl FailingStorage {
    pub(crate) fn failing(ops: &[Op]) -> Self {
        let storage = Self::default();
        storage.failing.lock().extend(ops.iter().copied());
        storage
    }

    pub(crate) fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    pub(crate) fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: Op) -> Result<()> {
        if self.failing.lock().contains(&op) {
            return Err(Error::Storage(format!("{:?} unavailable", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn save_url(&self, url: &str, alias: &str) -> Result<()> {
        self.inner.save_url(url, alias).await
    }

    async fn get_url(&self, alias: &str) -> Result<String> {
        self.inner.get_url(alias).await
    }

    async fn delete_url(&self, alias: &str) -> Result<()> {
        self.inner.delete_url(alias).await
    }

    async fn url_count(&self) -> Result<usize> {
        self.check(Op::UrlCount)?;
        self.inner.url_count().await
    }

    async fn resource_leaders(&self) -> Result<Vec<ResourceInfo>> {
        self.check(Op::ResourceLeaders)?;
        self.inner.resource_leaders().await
    }

    async fn last_peak_rate(&self) -> Result<DayPeakRecord> {
        self.check(Op::LastPeakRate)?;
        self.inner.last_peak_rate().await
    }

    async fn update_stats(&self, statistic: &Statistic) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Op::UpdateStats)?;
        self.inner.update_stats(statistic).await
    }

    async fn reset_peak_rate(&self) -> Result<()> {
        self.check(Op::ResetPeakRate)?;
        self.inner.reset_peak_rate().await
    }

    async fn stats(&self) -> Result<Option<StoredStats>> {
        self.inner.stats().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}
