use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Error category used for propagation and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::System => "system",
        }
    }
}

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid price configuration: {0}")]
    InvalidPriceConfig(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invoice has no charges to invoice")]
    NoChargesToInvoice,

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    #[error("Price not found: {0}")]
    PriceNotFound(Uuid),

    #[error("Invoice is not a draft: {0}")]
    InvoiceNotDraft(Uuid),

    #[error("Invoice is not finalized: {0}")]
    InvoiceNotFinalized(Uuid),

    #[error("Invoice is voided: {0}")]
    InvoiceVoided(Uuid),

    #[error("Invoice already paid: {0}")]
    AlreadyPaid(Uuid),

    #[error("Invoice has no remaining amount: {0}")]
    NoRemainingAmount(Uuid),

    #[error("Invoice {invoice_id} has collected {amount_paid} and cannot be voided")]
    InvoicePartiallyPaid { invoice_id: Uuid, amount_paid: Decimal },

    #[error("Invalid payment status transition from {from} to {to}")]
    InvalidPaymentTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Wallet {wallet_id} balance is below {amount}")]
    InsufficientWalletBalance { wallet_id: Uuid, amount: Decimal },

    #[error("Concurrent update: {0}")]
    ConcurrentUpdate(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("System error: {0}")]
    System(#[from] anyhow::Error),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InvalidPriceConfig(_)
            | SettlementError::InvalidQuantity(_)
            | SettlementError::InvalidRequest(_)
            | SettlementError::NoChargesToInvoice => ErrorKind::Validation,
            SettlementError::InvoiceNotFound(_) | SettlementError::PriceNotFound(_) => {
                ErrorKind::NotFound
            }
            SettlementError::InvoiceNotDraft(_)
            | SettlementError::InvoiceNotFinalized(_)
            | SettlementError::InvoiceVoided(_)
            | SettlementError::AlreadyPaid(_)
            | SettlementError::NoRemainingAmount(_)
            | SettlementError::InvoicePartiallyPaid { .. }
            | SettlementError::InvalidPaymentTransition { .. }
            | SettlementError::InsufficientWalletBalance { .. }
            | SettlementError::ConcurrentUpdate(_) => ErrorKind::Conflict,
            SettlementError::InvariantViolation(_) | SettlementError::System(_) => {
                ErrorKind::System
            }
        }
    }

    /// Only serialization conflicts are retried, with a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::ConcurrentUpdate(_))
    }
}

/// Store failures. Lock conflicts become retryable, everything else is a
/// system failure.
impl From<AppError> for SettlementError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Conflict(e) => SettlementError::ConcurrentUpdate(e.to_string()),
            other => SettlementError::System(anyhow::anyhow!(other.to_string())),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err.kind() {
            ErrorKind::Validation => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            ErrorKind::NotFound => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            ErrorKind::Conflict => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            ErrorKind::System => match err {
                SettlementError::System(e) => AppError::InternalError(e),
                other => AppError::InternalError(anyhow::anyhow!(other.to_string())),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
