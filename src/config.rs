use crate::error::{Error, Result};
use crate::rate_limiter::LimiterConfig;
use crate::scheduler::{Cadence, CronPattern};
use chrono_tz::Tz;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// Deployment environment, selects the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

/// Which admitted requests are recorded in the limiter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordPolicy {
    /// Every admitted request, whatever the handler returned.
    Attempts,
    /// Only admitted requests answered with a 2xx or 3xx status.
    Successes,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "shortener", version, about = "URL shortening service")]
pub struct Config {
    /// Deployment environment
    #[arg(long, env = "APP_ENV", value_enum, default_value_t = Environment::Local)]
    pub env: Environment,

    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL, in-memory storage when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Basic auth user for the write endpoints
    #[arg(long, env = "HTTP_SERVER_USER")]
    pub auth_user: String,

    /// Basic auth password for the write endpoints
    #[arg(long, env = "HTTP_SERVER_PASSWORD", hide_env_values = true)]
    pub auth_password: String,

    /// Admitted write requests per time frame
    #[arg(long, env = "RATE_LIMIT", default_value_t = 100)]
    pub rate_limit: usize,

    /// Burst allowance above the rate limit before lockout
    #[arg(long, env = "RATE_BUFFER", default_value_t = 10)]
    pub rate_buffer: usize,

    /// Rolling window of the rate limiter
    #[arg(long, env = "TIME_FRAME", default_value = "1m", value_parser = humantime::parse_duration)]
    pub time_frame: Duration,

    /// IANA time zone the scheduled jobs follow
    #[arg(long, env = "LOCATION", default_value = "UTC")]
    pub location: String,

    /// Cron pattern for the peak rate reset, local midnight when unset
    #[arg(long, env = "RESET_CRON")]
    pub reset_cron: Option<String>,

    /// Cron pattern for the analytics snapshot, every minute when unset
    #[arg(long, env = "ANALYTICS_CRON")]
    pub analytics_cron: Option<String>,

    /// Which admitted requests count towards the rate
    #[arg(long, env = "RECORD_POLICY", value_enum, default_value_t = RecordPolicy::Attempts)]
    pub record_policy: RecordPolicy,

    /// Per-request timeout
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "4s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from command line arguments and environment variables
    pub fn from_env() -> Result<Self> {
        Config::try_parse().map_err(|e| Error::Config(e.to_string()))
    }

    pub fn limiter(&self) -> LimiterConfig {
        LimiterConfig::new(self.rate_limit, self.rate_buffer, self.time_frame)
    }

    pub fn time_zone(&self) -> Result<Tz> {
        self.location
            .parse::<Tz>()
            .map_err(|e| Error::Config(format!("unknown location '{}': {}", self.location, e)))
    }

    pub fn reset_cadence(&self) -> Result<Cadence> {
        cadence_or(self.reset_cron.as_deref(), Cadence::Daily)
    }

    pub fn analytics_cadence(&self) -> Result<Cadence> {
        cadence_or(self.analytics_cron.as_deref(), Cadence::Minutely)
    }

    /// Reject settings the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit == 0 {
            return Err(Error::Config("rate limit must be greater than 0".to_string()));
        }
        if self.time_frame.is_zero() {
            return Err(Error::Config("time frame must be greater than 0".to_string()));
        }
        if self.auth_user.trim().is_empty() || self.auth_password.is_empty() {
            return Err(Error::Config("basic auth credentials cannot be empty".to_string()));
        }
        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(Error::Config(
                    "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
                ));
            }
        }

        self.time_zone()?;
        self.reset_cadence()?;
        self.analytics_cadence()?;

        Ok(())
    }
}

fn cadence_or(pattern: Option<&str>, default: Cadence) -> Result<Cadence> {
    match pattern {
        Some(pattern) => Ok(Cadence::Cron(pattern.parse::<CronPattern>()?)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec!["shortener", "--auth-user", "admin", "--auth-password", "secret"];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.rate_limit, 100);
        assert_eq!(config.rate_buffer, 10);
        assert_eq!(config.time_frame, Duration::from_secs(60));
        assert_eq!(config.record_policy, RecordPolicy::Attempts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_humantime_durations() {
        let config = parse(&["--time-frame", "300ms", "--request-timeout", "2s"]);
        assert_eq!(config.time_frame, Duration::from_millis(300));
        assert_eq!(config.limiter().time_frame, Duration::from_millis(300));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_location_is_rejected() {
        let config = parse(&["--location", "Mars/Olympus_Mons"]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_named_location_resolves() {
        let config = parse(&["--location", "Europe/Moscow"]);
        assert_eq!(config.time_zone().unwrap(), chrono_tz::Europe::Moscow);
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let config = parse(&["--rate-limit", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url_scheme() {
        assert!(parse(&["--redis-url", "http://localhost"]).validate().is_err());
        assert!(parse(&["--redis-url", "redis://127.0.0.1:6379"]).validate().is_ok());
    }

    #[test]
    fn test_cron_overrides() {
        let config = parse(&["--reset-cron", "0 3 * * *"]);
        assert!(matches!(config.reset_cadence().unwrap(), Cadence::Cron(_)));
        assert!(matches!(config.analytics_cadence().unwrap(), Cadence::Minutely));

        let config = parse(&["--analytics-cron", "not a cron"]);
        assert!(config.validate().is_err());
    }
}
