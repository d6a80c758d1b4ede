use anyhow::{Context, Result};
use shortener::config::{Config, Environment};
use shortener::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;

    // Human-readable logs locally, JSON elsewhere
    let json = config.env != Environment::Local;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("shortener={},tower_http=debug", config.log_level).into()
            }),
        )
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    tracing::info!("Starting shortener service");
    tracing::info!(
        bind_addr = %config.bind_addr,
        env = ?config.env,
        rate_limit = config.rate_limit,
        rate_buffer = config.rate_buffer,
        time_frame = %humantime::format_duration(config.time_frame),
        location = %config.location,
        record_policy = ?config.record_policy,
        "Configuration loaded"
    );

    let server = Server::new(config)
        .await
        .context("Failed to create server")?;

    server.run().await.context("Server error")?;

    Ok(())
}
