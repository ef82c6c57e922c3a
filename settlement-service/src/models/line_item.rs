//! Line item model for settlement-service.

use super::ChargeType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Line item status. Published items are frozen with their invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    Draft,
    Published,
}

impl LineItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemStatus::Draft => "draft",
            LineItemStatus::Published => "published",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(LineItemStatus::Draft),
            "published" => Some(LineItemStatus::Published),
            _ => None,
        }
    }
}

/// Line item on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub price_id: Uuid,
    pub charge_type: ChargeType,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub status: LineItemStatus,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl LineItem {
    pub fn new(
        invoice_id: Uuid,
        price_id: Uuid,
        charge_type: ChargeType,
        quantity: Decimal,
        amount: Decimal,
        created_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            line_item_id: Uuid::new_v4(),
            invoice_id,
            price_id,
            charge_type,
            quantity,
            amount,
            status: LineItemStatus::Draft,
            description: None,
            created_utc,
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == LineItemStatus::Published
    }
}
