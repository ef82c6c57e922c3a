//! Application startup and lifecycle management.

use crate::config::SettlementConfig;
use crate::handlers;
use crate::services::{
    init_metrics, CardProcessor, Database, DisabledCardProcessor, HttpCardProcessor,
    SettlementService, SystemClock,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: SettlementConfig,
    pub db: Arc<Database>,
    pub settlement: Arc<SettlementService>,
}

/// HTTP routes for the invoice surface plus health and metrics.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/invoices", post(handlers::create_invoice))
        .route("/invoices/:id", get(handlers::get_invoice))
        .route("/invoices/:id/finalize", post(handlers::finalize_invoice))
        .route("/invoices/:id/void", post(handlers::void_invoice))
        .route("/invoices/:id/payments", post(handlers::attempt_payment))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

fn card_processor(config: &SettlementConfig) -> Result<Arc<dyn CardProcessor>, AppError> {
    match &config.card_processor.url {
        Some(url) => {
            tracing::info!(url = %url, "Card processor configured");
            Ok(Arc::new(HttpCardProcessor::new(
                url,
                config.card_processor.api_key.clone(),
                Duration::from_millis(config.card_processor.timeout_ms),
            )?))
        }
        None => {
            tracing::warn!("CARD_PROCESSOR_URL not set - card payments are unavailable");
            Ok(Arc::new(DisabledCardProcessor))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SettlementConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: SettlementConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: SettlementConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);
        let settlement = Arc::new(SettlementService::new(
            db.clone(),
            db.clone(),
            db.clone(),
            card_processor(&config)?,
            Arc::new(SystemClock),
            config.settlement_options(),
        ));

        let state = AppState {
            config: config.clone(),
            db,
            settlement,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Settlement service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        tracing::info!(
            service = "settlement-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
