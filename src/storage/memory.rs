use super::{resource_of, Storage, LEADERS_LIMIT};
use crate::error::{Error, Result};
use crate::stats::{DayPeakRecord, ResourceInfo, Statistic, StoredStats};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-local storage, used when no Redis URL is configured.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    urls: HashMap<String, String>,
    analytics: Option<StoredStats>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn set_peak_record(&self, record: DayPeakRecord) {
        let mut inner = self.inner.write();
        let analytics = inner.analytics.get_or_insert_with(|| StoredStats {
            total_url_count: 0,
            day_peak: 0,
            leaders: Vec::new(),
            updated_at: record.last_update,
        });
        analytics.day_peak = record.day_peak;
        analytics.updated_at = record.last_update;
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_url(&self, url: &str, alias: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.urls.contains_key(alias) {
            return Err(Error::AlreadyExists);
        }
        inner.urls.insert(alias.to_string(), url.to_string());
        Ok(())
    }

    async fn get_url(&self, alias: &str) -> Result<String> {
        self.inner
            .read()
            .urls
            .get(alias)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn delete_url(&self, alias: &str) -> Result<()> {
        self.inner
            .write()
            .urls
            .remove(alias)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    async fn url_count(&self) -> Result<usize> {
        Ok(self.inner.read().urls.len())
    }

    async fn resource_leaders(&self) -> Result<Vec<ResourceInfo>> {
        let inner = self.inner.read();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for url in inner.urls.values() {
            *counts.entry(resource_of(url)).or_default() += 1;
        }

        let mut leaders: Vec<ResourceInfo> = counts
            .into_iter()
            .map(|(resource, url_count)| ResourceInfo {
                resource: resource.to_string(),
                url_count,
            })
            .collect();
        leaders.sort_by(|a, b| {
            b.url_count
                .cmp(&a.url_count)
                .then_with(|| a.resource.cmp(&b.resource))
        });
        leaders.truncate(LEADERS_LIMIT);

        Ok(leaders)
    }

    async fn last_peak_rate(&self) -> Result<DayPeakRecord> {
        self.inner
            .read()
            .analytics
            .as_ref()
            .map(|stats| DayPeakRecord {
                day_peak: stats.day_peak,
                last_update: stats.updated_at,
            })
            .ok_or(Error::NotFound)
    }

    async fn update_stats(&self, statistic: &Statistic) -> Result<()> {
        self.inner.write().analytics = Some(StoredStats {
            total_url_count: statistic.total_url_count,
            day_peak: statistic.day_peak,
            leaders: statistic.leaders.clone(),
            updated_at: Utc::now(),
        });
        Ok(())
    }

    async fn reset_peak_rate(&self) -> Result<()> {
        if let Some(stats) = self.inner.write().analytics.as_mut() {
            stats.day_peak = 0;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<Option<StoredStats>> {
        Ok(self.inner.read().analytics.clone())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
