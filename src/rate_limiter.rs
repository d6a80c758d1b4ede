//! Sliding-window admission control with hysteresis and peak-rate tracking.
//!
//! The limiter keeps the timestamps of recorded events inside a rolling
//! window. Admission locks once the window reaches `rate_limit + rate_buffer`
//! events and unlocks only after it drains below `rate_limit`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Limiter parameters, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub rate_limit: usize,
    pub rate_buffer: usize,
    #[serde(with = "humantime_serde")]
    pub time_frame: Duration,
}

impl LimiterConfig {
    pub fn new(rate_limit: usize, rate_buffer: usize, time_frame: Duration) -> Self {
        Self {
            rate_limit,
            rate_buffer,
            time_frame,
        }
    }

    /// Window size at which admission locks.
    pub fn lock_threshold(&self) -> usize {
        self.rate_limit + self.rate_buffer
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Events in the window at the time of the check.
    pub rate: usize,
    pub allowed: bool,
}

struct WindowState {
    requests: VecDeque<Instant>,
    locked: bool,
    peak_rate: usize,
}

pub struct RateLimiter {
    config: LimiterConfig,
    state: RwLock<WindowState>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            state: RwLock::new(WindowState {
                requests: VecDeque::with_capacity(config.lock_threshold()),
                locked: false,
                peak_rate: 0,
            }),
        }
    }

    /// Decide whether a new unit of work may proceed. Does not record it.
    pub fn allow(&self) -> Admission {
        let mut state = self.state.write();
        let rate = state.prune(Instant::now(), self.config.time_frame);

        if !state.locked && rate >= self.config.lock_threshold() {
            state.locked = true;
        }
        if state.locked && rate < self.config.rate_limit {
            state.locked = false;
        }

        Admission {
            rate,
            allowed: !state.locked,
        }
    }

    /// Record one event at the current instant and update the peak.
    pub fn add(&self) {
        let now = Instant::now();
        let mut state = self.state.write();

        state.requests.push_back(now);
        let rate = state.prune(now, self.config.time_frame);
        state.peak_rate = state.peak_rate.max(rate);
    }

    /// Events currently inside the window.
    pub fn current_rate(&self) -> usize {
        self.state
            .write()
            .prune(Instant::now(), self.config.time_frame)
    }

    pub fn peak_rate(&self) -> usize {
        self.state.read().peak_rate
    }

    /// Clear the peak, returning the value that was cleared.
    pub fn reset_peak_rate(&self) -> usize {
        std::mem::take(&mut self.state.write().peak_rate)
    }

    /// Seed the peak from persisted state.
    pub fn set_peak_rate(&self, rate: usize) {
        self.state.write().peak_rate = rate;
    }

    /// The configured window, used for retry hints.
    pub fn limit(&self) -> Duration {
        self.config.time_frame
    }

    pub fn is_locked(&self) -> bool {
        self.state.read().locked
    }
}

impl WindowState {
    // Entries are chronological, so expiry only ever trims the front.
    fn prune(&mut self, now: Instant, time_frame: Duration) -> usize {
        while let Some(oldest) = self.requests.front() {
            if now.saturating_duration_since(*oldest) > time_frame {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        self.requests.len()
    }
}
