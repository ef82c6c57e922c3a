//! Configuration module for settlement-service.

use crate::engine::{AllocationOptions, WalletPaymentStrategy};
use crate::services::SettlementOptions;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub card_processor: CardProcessorConfig,
    pub settlement: SettlementSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CardProcessorConfig {
    /// Unset means the card is never available.
    pub url: Option<String>,
    pub api_key: Secret<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SettlementSettings {
    /// 0 means no limit.
    pub max_wallets: usize,
    pub max_retries: u32,
    pub strategy: WalletPaymentStrategy,
}

impl SettlementSettings {
    pub fn options(&self, card_timeout_ms: u64) -> SettlementOptions {
        SettlementOptions {
            allocation: AllocationOptions {
                max_wallets: (self.max_wallets > 0).then_some(self.max_wallets),
                strategy: self.strategy,
            },
            card_timeout: Duration::from_millis(card_timeout_ms),
            retry: RetryConfig::with_max_retries(self.max_retries),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn wallet_strategy() -> Result<WalletPaymentStrategy, AppError> {
    match env::var("SETTLEMENT_WALLET_STRATEGY") {
        Ok(value) if !value.is_empty() => WalletPaymentStrategy::from_string(&value).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!(
                "SETTLEMENT_WALLET_STRATEGY must be promotional_first, prepaid_first or balance_optimized, got '{}'",
                value
            ))
        }),
        _ => Ok(WalletPaymentStrategy::default()),
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "settlement-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            card_processor: CardProcessorConfig {
                url: env::var("CARD_PROCESSOR_URL").ok().filter(|s| !s.is_empty()),
                api_key: Secret::new(env::var("CARD_PROCESSOR_API_KEY").unwrap_or_default()),
                timeout_ms: env_or("CARD_PROCESSOR_TIMEOUT_MS", 5000),
            },
            settlement: SettlementSettings {
                max_wallets: env_or("SETTLEMENT_MAX_WALLETS", 0),
                max_retries: env_or("SETTLEMENT_MAX_RETRIES", 3),
                strategy: wallet_strategy()?,
            },
        })
    }

    pub fn settlement_options(&self) -> SettlementOptions {
        self.settlement.options(self.card_processor.timeout_ms)
    }
}
