//! Price definitions consumed by the price calculator.

use super::ChargeType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a price turns a quantity into an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    FlatFee,
    Package,
    Tiered,
}

impl BillingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingModel::FlatFee => "flat_fee",
            BillingModel::Package => "package",
            BillingModel::Tiered => "tiered",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "flat_fee" => Some(BillingModel::FlatFee),
            "package" => Some(BillingModel::Package),
            "tiered" => Some(BillingModel::Tiered),
            _ => None,
        }
    }
}

/// Tier evaluation mode for tiered prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierMode {
    /// Each slice of the quantity is billed at the rate of the tier it falls in.
    #[default]
    Slab,
    /// The whole quantity is billed at the rate of the tier it reaches.
    Volume,
}

impl TierMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierMode::Slab => "slab",
            TierMode::Volume => "volume",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "slab" => Some(TierMode::Slab),
            "volume" => Some(TierMode::Volume),
            _ => None,
        }
    }
}

/// One pricing tier. `up_to` is the cumulative upper bound (inclusive);
/// `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTier {
    pub up_to: Option<Decimal>,
    pub unit_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flat_amount: Option<Decimal>,
}

impl PriceTier {
    pub fn bounded(up_to: Decimal, unit_amount: Decimal) -> Self {
        Self {
            up_to: Some(up_to),
            unit_amount,
            flat_amount: None,
        }
    }

    pub fn unbounded(unit_amount: Decimal) -> Self {
        Self {
            up_to: None,
            unit_amount,
            flat_amount: None,
        }
    }

    pub fn with_flat_amount(mut self, flat_amount: Decimal) -> Self {
        self.flat_amount = Some(flat_amount);
        self
    }
}

/// Rounding applied to `quantity / divide_by` for package prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageRounding {
    #[default]
    Up,
    Down,
}

/// Quantity transform for package prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageTransform {
    pub divide_by: Decimal,
    #[serde(default)]
    pub round: PackageRounding,
}

/// A price definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub price_id: Uuid,
    pub currency: String,
    /// Charge type of every line item produced from this price.
    pub price_type: ChargeType,
    pub billing_model: BillingModel,
    /// Flat fee, or the price of one package.
    pub amount: Decimal,
    #[serde(default)]
    pub tier_mode: TierMode,
    #[serde(default)]
    pub tiers: Vec<PriceTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<PackageTransform>,
    pub created_utc: DateTime<Utc>,
}

impl Price {
    pub fn flat_fee(price_type: ChargeType, currency: &str, amount: Decimal) -> Self {
        Self {
            price_id: Uuid::new_v4(),
            currency: currency.to_string(),
            price_type,
            billing_model: BillingModel::FlatFee,
            amount,
            tier_mode: TierMode::Slab,
            tiers: Vec::new(),
            transform: None,
            created_utc: Utc::now(),
        }
    }

    pub fn tiered(currency: &str, tier_mode: TierMode, tiers: Vec<PriceTier>) -> Self {
        Self {
            billing_model: BillingModel::Tiered,
            amount: Decimal::ZERO,
            tier_mode,
            tiers,
            ..Self::flat_fee(ChargeType::Usage, currency, Decimal::ZERO)
        }
    }

    pub fn package(currency: &str, package_amount: Decimal, transform: PackageTransform) -> Self {
        Self {
            billing_model: BillingModel::Package,
            transform: Some(transform),
            ..Self::flat_fee(ChargeType::Usage, currency, package_amount)
        }
    }
}
