//! Wallet model: customer-owned prepaid or promotional credit.

use super::ChargeTypeRestriction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wallet type. Breaks `priority` ties under the type-based payment strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    #[default]
    Prepaid,
    Promotional,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Prepaid => "prepaid",
            WalletType::Promotional => "promotional",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "prepaid" => Some(WalletType::Prepaid),
            "promotional" => Some(WalletType::Promotional),
            _ => None,
        }
    }
}

/// Wallet status. Only active wallets take part in settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    #[default]
    Active,
    Frozen,
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Closed => "closed",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(WalletStatus::Active),
            "frozen" => Some(WalletStatus::Frozen),
            "closed" => Some(WalletStatus::Closed),
            _ => None,
        }
    }
}

/// A customer wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: Uuid,
    pub customer_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
    pub wallet_type: WalletType,
    pub status: WalletStatus,
    pub allowed_charge_types: ChargeTypeRestriction,
    /// Lower values are drawn first.
    pub priority: i32,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Wallet {
    pub fn new(
        customer_id: Uuid,
        currency: &str,
        balance: Decimal,
        allowed_charge_types: ChargeTypeRestriction,
        priority: i32,
        created_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            wallet_id: Uuid::new_v4(),
            customer_id,
            currency: currency.to_string(),
            balance,
            wallet_type: WalletType::Prepaid,
            status: WalletStatus::Active,
            allowed_charge_types,
            priority,
            created_utc,
            updated_utc: created_utc,
        }
    }

    /// Whether this wallet may take part in settling an invoice in `currency`.
    pub fn is_eligible_for(&self, currency: &str) -> bool {
        self.status == WalletStatus::Active
            && self.currency.eq_ignore_ascii_case(currency)
            && self.balance > Decimal::ZERO
    }
}
