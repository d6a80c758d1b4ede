use crate::auth::{basic_auth, Credentials};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handlers::{
    delete_url, health_check, readiness_check, redirect, save_url, stats, AppState,
};
use crate::jobs::{seed_peak_rate, AnalyticsJob, PeakRateResetJob};
use crate::middleware::{
    admission_middleware, logging_middleware, request_id_middleware, AdmissionControl,
};
use crate::rate_limiter::RateLimiter;
use crate::scheduler::Scheduler;
use crate::storage::{MemoryStorage, RedisStorage, Storage};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the HTTP application. Write routes sit behind Basic auth and then
/// admission control; redirects and read-only routes are open.
pub fn create_app(state: AppState, config: &Config) -> Router {
    let credentials = Arc::new(Credentials::new(&config.auth_user, &config.auth_password));
    let admission = AdmissionControl::new(state.limiter.clone(), config.record_policy);

    let write_routes = Router::new()
        .route("/url", post(save_url))
        .route("/url/:alias", delete(delete_url))
        // The last layer added runs first: authenticate, then admit.
        .route_layer(middleware::from_fn_with_state(admission, admission_middleware))
        .route_layer(middleware::from_fn_with_state(credentials, basic_auth));

    Router::new()
        .merge(write_routes)
        .route("/stats", get(stats))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/:alias", get(redirect))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(config.request_timeout))
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let storage: Arc<dyn Storage> = match &config.redis_url {
            Some(url) => Arc::new(RedisStorage::connect(url).await?),
            None => {
                tracing::warn!("REDIS_URL not set, running with in-memory storage");
                Arc::new(MemoryStorage::new())
            }
        };
        let limiter = Arc::new(RateLimiter::new(config.limiter()));

        Ok(Self {
            state: AppState::new(storage, limiter),
            config,
        })
    }

    /// Register the peak-rate reset and analytics jobs.
    fn scheduler(&self) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new(self.config.time_zone()?);
        scheduler
            .add(
                self.config.reset_cadence()?,
                Arc::new(PeakRateResetJob::new(
                    self.state.limiter.clone(),
                    self.state.storage.clone(),
                )),
            )
            .add(
                self.config.analytics_cadence()?,
                Arc::new(AnalyticsJob::new(self.state.aggregator())),
            );
        Ok(scheduler)
    }

    pub async fn run(self) -> Result<()> {
        let tz = self.config.time_zone()?;
        let scheduler = self.scheduler()?;

        seed_peak_rate(self.state.storage.as_ref(), &self.state.limiter, tz).await;
        if let Err(e) = self.state.aggregator().publish().await {
            tracing::error!(error = %e, "initial analytics update failed");
        }

        let cancel = CancellationToken::new();
        tracing::info!(jobs = scheduler.len(), "starting scheduler");
        let jobs = scheduler.spawn(cancel.clone());

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| Error::Config(format!("cannot bind {}: {}", self.config.bind_addr, e)))?;

        tracing::info!(
            address = %self.config.bind_addr,
            storage = self.state.storage.backend(),
            location = %tz,
            "Shortener server starting"
        );

        let app = create_app(self.state, &self.config);

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(format!("server error: {}", e)));

        cancel.cancel();
        if let Err(e) = jobs.await {
            tracing::error!(error = %e, "scheduler task failed");
        }
        tracing::info!("Shortener server stopped");

        served
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
