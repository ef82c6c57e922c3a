//! Charge types and wallet charge-type restrictions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Charge type of an invoice line item.
///
/// The derived ordering (`Fixed` before `Usage`) is the order in which
/// unrestricted wallets drain buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeType {
    Fixed,
    Usage,
}

impl ChargeType {
    pub const ALL: [ChargeType; 2] = [ChargeType::Fixed, ChargeType::Usage];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeType::Fixed => "fixed",
            ChargeType::Usage => "usage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Some(ChargeType::Fixed),
            "usage" => Some(ChargeType::Usage),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChargeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which charge types a wallet may pay for.
///
/// `OneOf` with an empty set is a wallet that can pay for nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "types", rename_all = "snake_case")]
pub enum ChargeTypeRestriction {
    All,
    OneOf(BTreeSet<ChargeType>),
}

impl ChargeTypeRestriction {
    pub fn only(charge_type: ChargeType) -> Self {
        ChargeTypeRestriction::OneOf(BTreeSet::from([charge_type]))
    }

    pub fn none() -> Self {
        ChargeTypeRestriction::OneOf(BTreeSet::new())
    }

    pub fn covers(&self, charge_type: ChargeType) -> bool {
        match self {
            ChargeTypeRestriction::All => true,
            ChargeTypeRestriction::OneOf(types) => types.contains(&charge_type),
        }
    }

    /// Covered charge types in bucket drain order.
    pub fn covered_types(&self) -> Vec<ChargeType> {
        ChargeType::ALL
            .into_iter()
            .filter(|ct| self.covers(*ct))
            .collect()
    }

    /// The single charge type this restriction narrows to, if it is that narrow.
    pub fn single_type(&self) -> Option<ChargeType> {
        match self {
            ChargeTypeRestriction::OneOf(types) if types.len() == 1 => types.iter().next().copied(),
            _ => None,
        }
    }

    /// Storage form: `None` means all types.
    pub fn to_db(&self) -> Option<Vec<String>> {
        match self {
            ChargeTypeRestriction::All => None,
            ChargeTypeRestriction::OneOf(types) => {
                Some(types.iter().map(|t| t.as_str().to_string()).collect())
            }
        }
    }

    /// Inverse of [`ChargeTypeRestriction::to_db`]. `None` if any type name is unknown.
    pub fn from_db(value: Option<Vec<String>>) -> Option<Self> {
        match value {
            None => Some(ChargeTypeRestriction::All),
            Some(names) => names
                .iter()
                .map(|n| ChargeType::parse(n))
                .collect::<Option<_>>()
                .map(ChargeTypeRestriction::OneOf),
        }
    }
}
