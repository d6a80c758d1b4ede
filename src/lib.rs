pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod jobs;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod scheduler;
pub mod server;
pub mod stats;
pub mod storage;
pub mod validation;

pub use config::Config;
pub use error::{ApiError, Error, Result};
pub use rate_limiter::{LimiterConfig, RateLimiter};
pub use response::ApiResponse;
pub use server::create_app;
