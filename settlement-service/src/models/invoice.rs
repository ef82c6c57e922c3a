//! Invoice model for settlement-service.

use super::{ChargeBuckets, LineItem};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Finalized,
    Voided,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Finalized => "finalized",
            InvoiceStatus::Voided => "voided",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "finalized" => Some(InvoiceStatus::Finalized),
            "voided" => Some(InvoiceStatus::Voided),
            _ => None,
        }
    }
}

/// Payment status, tracked independently of the invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Succeeded is terminal; Pending and Failed may move anywhere.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        !matches!((self, next), (PaymentStatus::Succeeded, _))
    }
}

/// Invoice with its line items.
///
/// `amount_due == amount_paid + amount_remaining` holds after every
/// lifecycle operation, and `remaining_by_type` always sums to
/// `amount_remaining` once the invoice is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub currency: String,
    pub amount_due: Decimal,
    pub amount_paid: Decimal,
    pub amount_remaining: Decimal,
    pub invoice_status: InvoiceStatus,
    pub payment_status: PaymentStatus,
    pub remaining_by_type: ChargeBuckets,
    /// Card attempts that reached a definitive verdict. Part of the card
    /// idempotency key.
    pub payment_attempts: i32,
    pub line_items: Vec<LineItem>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub finalized_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub voided_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    /// A new draft. Amounts track the line items until finalization.
    pub fn draft(
        customer_id: Uuid,
        subscription_id: Option<Uuid>,
        currency: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            invoice_id: Uuid::new_v4(),
            customer_id,
            subscription_id,
            currency: currency.to_uppercase(),
            amount_due: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            amount_remaining: Decimal::ZERO,
            invoice_status: InvoiceStatus::Draft,
            payment_status: PaymentStatus::Pending,
            remaining_by_type: ChargeBuckets::new(),
            payment_attempts: 0,
            line_items: Vec::new(),
            period_start,
            period_end,
            created_utc: now,
            updated_utc: now,
            finalized_utc: None,
            paid_utc: None,
            voided_utc: None,
        }
    }

    /// Attach line items to a draft and refresh its totals. `None` if the
    /// amounts do not fit in a decimal.
    pub fn with_line_items(mut self, line_items: Vec<LineItem>) -> Option<Self> {
        self.line_items = line_items;
        self.amount_due = self.line_item_total()?;
        self.amount_remaining = self.amount_due.checked_sub(self.amount_paid)?;
        Some(self)
    }

    pub fn line_item_total(&self) -> Option<Decimal> {
        self.line_items
            .iter()
            .try_fold(Decimal::ZERO, |total, item| total.checked_add(item.amount))
    }

    pub fn is_balanced(&self) -> bool {
        self.amount_due == self.amount_paid + self.amount_remaining
    }

    /// Idempotency key for the next card charge on this invoice.
    pub fn card_idempotency_key(&self) -> String {
        format!("{}:{}", self.invoice_id, self.payment_attempts)
    }
}

/// One charge to bill on a draft invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub price_id: Uuid,
    /// Omitted for metered prices, whose quantity comes from usage.
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateDraftInvoice {
    pub customer_id: Uuid,
    #[serde(default)]
    pub subscription_id: Option<Uuid>,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub period_start: DateTime<Utc>,
    /// Defaults to the current time.
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
    #[validate(length(min = 1))]
    pub charges: Vec<ChargeRequest>,
}
