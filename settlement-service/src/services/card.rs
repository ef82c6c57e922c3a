//! Card processor client.
//!
//! The processor is the only external call made while a settlement
//! transaction is open. Its answer is folded into the same transaction.

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::observability::inject_trace_context;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A request to charge a customer's card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardChargeRequest {
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    /// Stable across retries of the same attempt.
    pub idempotency_key: String,
}

/// What happened to the card side of a settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CardOutcome {
    /// Wallets covered everything.
    NotRequired,
    Charged { reference: String },
    Declined { reason: String },
    /// No answer from the processor: disabled, timed out or failed.
    Unavailable { reason: String },
}

impl CardOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardOutcome::NotRequired => "not_required",
            CardOutcome::Charged { .. } => "charged",
            CardOutcome::Declined { .. } => "declined",
            CardOutcome::Unavailable { .. } => "unavailable",
        }
    }

    pub fn is_charged(&self) -> bool {
        matches!(self, CardOutcome::Charged { .. })
    }

    pub fn is_declined(&self) -> bool {
        matches!(self, CardOutcome::Declined { .. })
    }

    /// The processor gave a final answer for this idempotency key.
    pub fn is_definitive(&self) -> bool {
        matches!(self, CardOutcome::Charged { .. } | CardOutcome::Declined { .. })
    }
}

#[async_trait]
pub trait CardProcessor: Send + Sync {
    /// Charge the card. `Ok` carries `Charged` or `Declined`; transport
    /// failures are errors.
    async fn charge(&self, request: &CardChargeRequest) -> Result<CardOutcome, AppError>;
}

/// Processor used when no card processor is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCardProcessor;

#[async_trait]
impl CardProcessor for DisabledCardProcessor {
    async fn charge(&self, _request: &CardChargeRequest) -> Result<CardOutcome, AppError> {
        Err(AppError::ServiceUnavailable)
    }
}

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    customer_id: Uuid,
    amount: String,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

/// JSON-over-HTTP card processor client.
pub struct HttpCardProcessor {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
}

impl HttpCardProcessor {
    pub fn new(base_url: &str, api_key: Secret<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CardProcessor for HttpCardProcessor {
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, amount = %request.amount))]
    async fn charge(&self, request: &CardChargeRequest) -> Result<CardOutcome, AppError> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);

        let body = ChargeBody {
            customer_id: request.customer_id,
            amount: request.amount.to_string(),
            currency: &request.currency,
        };

        let response = self
            .client
            .post(format!("{}/charges", self.base_url))
            .headers(headers)
            .bearer_auth(self.api_key.expose_secret())
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("Card processor unreachable: {}", e)))?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            let reason = response.text().await.unwrap_or_default();
            warn!(status = %status, "Card declined");
            return Ok(CardOutcome::Declined { reason });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::BadGateway(format!(
                "Card processor returned error status {}: {}",
                status, body
            )));
        }

        let charge: ChargeResponse = response.json().await.map_err(|e| {
            AppError::BadGateway(format!("Failed to parse card processor response: {}", e))
        })?;

        match charge.status.as_str() {
            "succeeded" => {
                info!(reference = %charge.id, "Card charged");
                Ok(CardOutcome::Charged { reference: charge.id })
            }
            "declined" | "failed" => Ok(CardOutcome::Declined {
                reason: charge.failure_reason.unwrap_or(charge.status),
            }),
            other => Err(AppError::BadGateway(format!(
                "Card processor returned unknown status: {}",
                other
            ))),
        }
    }
}
