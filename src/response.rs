use crate::stats::Statistic;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: &'static str,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self { status: "OK" }
    }
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub status: &'static str,
    pub alias: String,
}

impl SaveResponse {
    pub fn new(alias: String) -> Self {
        Self { status: "OK", alias }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub status: &'static str,
    pub stats: Statistic,
}

impl StatsResponse {
    pub fn new(stats: Statistic) -> Self {
        Self { status: "OK", stats }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub storage: &'static str,
    pub timestamp: u64,
}

impl ReadyResponse {
    pub fn ready(storage: &'static str) -> Self {
        Self {
            status: "ready",
            storage,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}
