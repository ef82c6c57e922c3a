//! settlement-service binary.
//!
//! Metrics are registered by `Application::build`; this file only wires
//! configuration, tracing and shutdown.

use service_core::observability::init_tracing;
use settlement_service::config::SettlementConfig;
use settlement_service::startup::Application;
use std::fmt::Display;
use std::io;
use tokio::signal;

fn startup_error(stage: &str, e: impl Display) -> io::Error {
    io::Error::other(format!("{} failed: {}", stage, e))
}

/// Resolves with the name of the signal that stopped the service.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}

fn log_settings(config: &SettlementConfig) {
    tracing::info!(
        version = %config.service_version,
        port = %config.common.port,
        trace_export = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        db_max_connections = config.database.max_connections,
        db_min_connections = config.database.min_connections,
        card_processor_configured = config.card_processor.url.is_some(),
        card_timeout_ms = config.card_processor.timeout_ms,
        max_wallets = config.settlement.max_wallets,
        max_retries = config.settlement.max_retries,
        wallet_strategy = config.settlement.strategy.as_str(),
        "Starting settlement-service"
    );
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = SettlementConfig::from_env().map_err(|e| {
        eprintln!("settlement-service: {}", e);
        startup_error("configuration", e)
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    log_settings(&config);

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        startup_error("startup", e)
    })?;

    let outcome = tokio::select! {
        result = app.run_until_stopped() => result,
        received = shutdown_signal() => {
            tracing::info!(signal = received, "Shutdown signal received, draining");
            Ok(())
        }
    };

    match &outcome {
        Ok(()) => tracing::info!("settlement-service stopped"),
        Err(e) => tracing::error!(error = %e, "Server stopped with an error"),
    }
    outcome
}
