use super::{resource_of, Storage, LEADERS_LIMIT};
use crate::error::{Error, Result};
use crate::stats::{DayPeakRecord, ResourceInfo, Statistic, StoredStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::collections::HashMap;
use std::sync::LazyLock;

const URL_KEY_PREFIX: &str = "shortener:url:";
const ALIASES_KEY: &str = "shortener:aliases";
const RESOURCES_KEY: &str = "shortener:resources";
const ANALYTICS_KEY: &str = "shortener:analytics";

// KEYS: url key, alias set, resource zset. ARGV: url, alias, resource.
static SAVE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if not redis.call('SET', KEYS[1], ARGV[1], 'NX') then
            return 0
        end
        redis.call('SADD', KEYS[2], ARGV[2])
        redis.call('ZINCRBY', KEYS[3], 1, ARGV[3])
        return 1
        ",
    )
});

// KEYS: url key, alias set, resource zset. ARGV: alias. Returns the removed
// URL, or nil if the alias was unknown. The resource is everything before the
// first '/', matching `resource_of`.
static DELETE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local url = redis.call('GET', KEYS[1])
        if not url then
            return false
        end
        redis.call('DEL', KEYS[1])
        redis.call('SREM', KEYS[2], ARGV[1])
        redis.call('ZINCRBY', KEYS[3], -1, string.match(url, '^[^/]*'))
        return url
        ",
    )
});

fn url_key(alias: &str) -> String {
    format!("{}{}", URL_KEY_PREFIX, alias)
}

/// Redis-backed storage.
///
/// Each alias maps to a string key, the alias set backs the URL count and a
/// sorted set keeps per-resource URL counts for the leaderboard. Saves and
/// deletes touch all three in one script so the indexes never drift from the
/// URL keys. Analytics live in a single hash so every update is one `HSET`.
pub struct RedisStorage {
    conn: MultiplexedConnection,
}

impl RedisStorage {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| Error::Storage(format!("Failed to create Redis client: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn save_url(&self, url: &str, alias: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        let created: i32 = SAVE_SCRIPT
            .key(url_key(alias))
            .key(ALIASES_KEY)
            .key(RESOURCES_KEY)
            .arg(url)
            .arg(alias)
            .arg(resource_of(url))
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(Error::AlreadyExists);
        }
        Ok(())
    }

    async fn get_url(&self, alias: &str) -> Result<String> {
        let mut conn = self.conn.clone();

        let url: Option<String> = redis::cmd("GET")
            .arg(url_key(alias))
            .query_async(&mut conn)
            .await?;

        url.ok_or(Error::NotFound)
    }

    async fn delete_url(&self, alias: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        let deleted: Option<String> = DELETE_SCRIPT
            .key(url_key(alias))
            .key(ALIASES_KEY)
            .key(RESOURCES_KEY)
            .arg(alias)
            .invoke_async(&mut conn)
            .await?;

        deleted.map(|_| ()).ok_or(Error::NotFound)
    }

    async fn url_count(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = redis::cmd("SCARD")
            .arg(ALIASES_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn resource_leaders(&self) -> Result<Vec<ResourceInfo>> {
        let mut conn = self.conn.clone();

        let entries: Vec<(String, i64)> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(RESOURCES_KEY)
            .arg("+inf")
            .arg(1)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(LEADERS_LIMIT)
            .query_async(&mut conn)
            .await?;

        Ok(entries
            .into_iter()
            .map(|(resource, count)| ResourceInfo {
                resource,
                url_count: count.max(0) as usize,
            })
            .collect())
    }

    async fn last_peak_rate(&self) -> Result<DayPeakRecord> {
        let mut conn = self.conn.clone();

        let (day_peak, updated_at): (Option<usize>, Option<String>) = redis::cmd("HMGET")
            .arg(ANALYTICS_KEY)
            .arg("day_peak")
            .arg("updated_at")
            .query_async(&mut conn)
            .await?;

        match (day_peak, updated_at) {
            (Some(day_peak), Some(updated_at)) => Ok(DayPeakRecord {
                day_peak,
                last_update: parse_timestamp(&updated_at)?,
            }),
            _ => Err(Error::NotFound),
        }
    }

    async fn update_stats(&self, statistic: &Statistic) -> Result<()> {
        let mut conn = self.conn.clone();
        let leaders = serde_json::to_string(&statistic.leaders)?;

        redis::cmd("HSET")
            .arg(ANALYTICS_KEY)
            .arg("total_url_count")
            .arg(statistic.total_url_count)
            .arg("day_peak")
            .arg(statistic.day_peak)
            .arg("leaders")
            .arg(leaders)
            .arg("updated_at")
            .arg(Utc::now().to_rfc3339())
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn reset_peak_rate(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(ANALYTICS_KEY)
            .arg("day_peak")
            .arg(0)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Option<StoredStats>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(ANALYTICS_KEY)
            .query_async(&mut conn)
            .await?;

        let Some(updated_at) = fields.get("updated_at") else {
            return Ok(None);
        };

        Ok(Some(StoredStats {
            total_url_count: parse_field(&fields, "total_url_count")?,
            day_peak: parse_field(&fields, "day_peak")?,
            leaders: match fields.get("leaders") {
                Some(leaders) => serde_json::from_str(leaders)?,
                None => Vec::new(),
            },
            updated_at: parse_timestamp(updated_at)?,
        }))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn parse_field(fields: &HashMap<String, String>, name: &str) -> Result<usize> {
    fields
        .get(name)
        .map(|value| value.parse::<usize>())
        .transpose()
        .map_err(|e| Error::Storage(format!("invalid '{}' in analytics: {}", name, e)))
        .map(Option::unwrap_or_default)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("invalid analytics timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_key() {
        assert_eq!(url_key("abc"), "shortener:url:abc");
    }

    #[test]
    fn test_parse_field() {
        let mut fields = HashMap::new();
        fields.insert("day_peak".to_string(), "12".to_string());
        fields.insert("broken".to_string(), "x".to_string());

        assert_eq!(parse_field(&fields, "day_peak").unwrap(), 12);
        assert_eq!(parse_field(&fields, "total_url_count").unwrap(), 0);
        assert!(parse_field(&fields, "broken").is_err());
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn test_save_and_delete_keep_indexes_in_step() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let storage = RedisStorage::connect(&url).await.unwrap();
        let alias = format!("it-{}", uuid::Uuid::new_v4());
        let before = storage.url_count().await.unwrap();

        storage.save_url("example.org/a", &alias).await.unwrap();
        assert!(matches!(
            storage.save_url("example.org/b", &alias).await,
            Err(Error::AlreadyExists)
        ));
        assert_eq!(storage.url_count().await.unwrap(), before + 1);
        assert_eq!(storage.get_url(&alias).await.unwrap(), "example.org/a");

        storage.delete_url(&alias).await.unwrap();
        assert!(matches!(storage.delete_url(&alias).await, Err(Error::NotFound)));
        assert_eq!(storage.url_count().await.unwrap(), before);
        assert!(matches!(storage.get_url(&alias).await, Err(Error::NotFound)));
    }

    #[test]
    fn test_parse_timestamp() {
        let parsed = parse_timestamp("2024-05-10T21:00:00+03:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-10T18:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
