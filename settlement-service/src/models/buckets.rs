//! Per-charge-type running amounts.

use super::{ChargeType, ChargeTypeRestriction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Remaining amount owed per charge type.
///
/// Iteration follows `ChargeType` ordering, which is also the drain order for
/// wallets that cover more than one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChargeBuckets(BTreeMap<ChargeType, Decimal>);

impl ChargeBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, charge_type: ChargeType) -> Decimal {
        self.0.get(&charge_type).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn add(&mut self, charge_type: ChargeType, amount: Decimal) {
        *self.0.entry(charge_type).or_insert(Decimal::ZERO) += amount;
    }

    pub fn total(&self) -> Decimal {
        self.0.values().copied().sum()
    }

    /// Sum of the buckets a restriction may pay for.
    pub fn covered_total(&self, restriction: &ChargeTypeRestriction) -> Decimal {
        self.iter()
            .filter(|(ct, _)| restriction.covers(*ct))
            .map(|(_, amount)| amount)
            .sum()
    }

    pub fn is_settled(&self) -> bool {
        self.0.values().all(|amount| amount.is_zero())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChargeType, Decimal)> + '_ {
        self.0.iter().map(|(ct, amount)| (*ct, *amount))
    }

    /// Take up to `max` from one bucket. Returns the amount taken.
    pub fn drain(&mut self, charge_type: ChargeType, max: Decimal) -> Decimal {
        let Some(remaining) = self.0.get_mut(&charge_type) else {
            return Decimal::ZERO;
        };
        let taken = max.min(*remaining).max(Decimal::ZERO);
        *remaining -= taken;
        taken
    }

    /// Take up to `max` across the covered buckets, emptying them one at a
    /// time in drain order. Returns the amount taken.
    pub fn drain_covered(&mut self, restriction: &ChargeTypeRestriction, max: Decimal) -> Decimal {
        let mut left = max;
        for charge_type in restriction.covered_types() {
            if left <= Decimal::ZERO {
                break;
            }
            left -= self.drain(charge_type, left);
        }
        max - left
    }

    /// Zero every bucket, keeping the keys.
    pub fn clear(&mut self) {
        for amount in self.0.values_mut() {
            *amount = Decimal::ZERO;
        }
    }
}

impl FromIterator<(ChargeType, Decimal)> for ChargeBuckets {
    fn from_iter<I: IntoIterator<Item = (ChargeType, Decimal)>>(iter: I) -> Self {
        let mut buckets = ChargeBuckets::new();
        for (charge_type, amount) in iter {
            buckets.add(charge_type, amount);
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn drain_never_exceeds_bucket() {
        let mut buckets: ChargeBuckets = [(ChargeType::Usage, dec("30"))].into_iter().collect();
        assert_eq!(buckets.drain(ChargeType::Usage, dec("35")), dec("30"));
        assert_eq!(buckets.get(ChargeType::Usage), Decimal::ZERO);
        assert_eq!(buckets.drain(ChargeType::Fixed, dec("10")), Decimal::ZERO);
    }

    #[test]
    fn drain_covered_empties_fixed_first() {
        let mut buckets: ChargeBuckets = [
            (ChargeType::Usage, dec("30")),
            (ChargeType::Fixed, dec("20")),
        ]
        .into_iter()
        .collect();

        let taken = buckets.drain_covered(&ChargeTypeRestriction::All, dec("25"));
        assert_eq!(taken, dec("25"));
        assert_eq!(buckets.get(ChargeType::Fixed), Decimal::ZERO);
        assert_eq!(buckets.get(ChargeType::Usage), dec("25"));
    }
}
