//! Price calculator: turns a price definition and a quantity into an amount.
//!
//! All arithmetic is decimal. The result is rounded once, to the price
//! currency's minor unit, after the whole price has been evaluated.

use super::money::round_to_currency;
use crate::error::{Result, SettlementError};
use crate::models::{BillingModel, PackageRounding, PackageTransform, Price, PriceTier, TierMode};
use rust_decimal::Decimal;

/// Compute the amount billed for `quantity` units of `price`.
///
/// A quantity whose amount does not fit in a decimal is rejected as
/// `InvalidQuantity`.
pub fn calculate_amount(price: &Price, quantity: Decimal) -> Result<Decimal> {
    if quantity < Decimal::ZERO {
        return Err(SettlementError::InvalidQuantity(quantity));
    }
    validate_price(price)?;

    let raw = match price.billing_model {
        BillingModel::FlatFee => Some(price.amount),
        BillingModel::Package => match &price.transform {
            Some(transform) => package_amount(price.amount, transform, quantity),
            None => {
                return Err(SettlementError::InvalidPriceConfig(
                    "package price requires a transform".to_string(),
                ));
            }
        },
        BillingModel::Tiered => match price.tier_mode {
            TierMode::Slab => slab_amount(&price.tiers, quantity),
            TierMode::Volume => volume_amount(&price.tiers, quantity),
        },
    };

    let raw = raw.ok_or(SettlementError::InvalidQuantity(quantity))?;
    Ok(round_to_currency(raw, &price.currency))
}

/// Reject price definitions the calculator cannot evaluate.
pub fn validate_price(price: &Price) -> Result<()> {
    if price.amount < Decimal::ZERO {
        return Err(SettlementError::InvalidPriceConfig(format!(
            "price {} has a negative amount",
            price.price_id
        )));
    }

    match price.billing_model {
        BillingModel::FlatFee => Ok(()),
        BillingModel::Package => match &price.transform {
            Some(transform) if transform.divide_by > Decimal::ZERO => Ok(()),
            Some(_) => Err(SettlementError::InvalidPriceConfig(
                "package divide_by must be positive".to_string(),
            )),
            None => Err(SettlementError::InvalidPriceConfig(
                "package price requires a transform".to_string(),
            )),
        },
        BillingModel::Tiered => validate_tiers(&price.tiers),
    }
}

fn validate_tiers(tiers: &[PriceTier]) -> Result<()> {
    if tiers.is_empty() {
        return Err(SettlementError::InvalidPriceConfig(
            "tiered price has no tiers".to_string(),
        ));
    }

    let last = tiers.len() - 1;
    let mut previous = Decimal::ZERO;
    for (index, tier) in tiers.iter().enumerate() {
        if tier.unit_amount < Decimal::ZERO || tier.flat_amount.is_some_and(|f| f < Decimal::ZERO) {
            return Err(SettlementError::InvalidPriceConfig(format!(
                "tier {} has a negative amount",
                index
            )));
        }
        match tier.up_to {
            Some(up_to) if up_to <= previous => {
                return Err(SettlementError::InvalidPriceConfig(format!(
                    "tier {} up_to must be greater than {}",
                    index, previous
                )));
            }
            Some(up_to) => previous = up_to,
            None if index != last => {
                return Err(SettlementError::InvalidPriceConfig(format!(
                    "tier {} is unbounded but is not the last tier",
                    index
                )));
            }
            None => {}
        }
    }
    Ok(())
}

fn tier_charge(tier: &PriceTier, units: Decimal) -> Option<Decimal> {
    units
        .checked_mul(tier.unit_amount)?
        .checked_add(tier.flat_amount.unwrap_or(Decimal::ZERO))
}

/// Each slice of the quantity is billed in the tier it falls into. The last
/// tier absorbs whatever is left, bounded or not.
fn slab_amount(tiers: &[PriceTier], quantity: Decimal) -> Option<Decimal> {
    let last = tiers.len() - 1;
    let mut remaining = quantity;
    let mut lower_bound = Decimal::ZERO;
    let mut total = Decimal::ZERO;

    for (index, tier) in tiers.iter().enumerate() {
        if remaining <= Decimal::ZERO {
            break;
        }

        let in_tier = match tier.up_to {
            Some(up_to) if index != last => remaining.min(up_to - lower_bound),
            _ => remaining,
        };

        total = total.checked_add(tier_charge(tier, in_tier)?)?;
        remaining -= in_tier;
        if let Some(up_to) = tier.up_to {
            lower_bound = up_to;
        }
    }

    Some(total)
}

/// The whole quantity is billed at the first tier that contains it.
fn volume_amount(tiers: &[PriceTier], quantity: Decimal) -> Option<Decimal> {
    if quantity.is_zero() {
        return Some(Decimal::ZERO);
    }

    let tier = tiers
        .iter()
        .find(|tier| tier.up_to.map_or(true, |up_to| quantity <= up_to))
        .or_else(|| tiers.last());

    match tier {
        Some(tier) => tier_charge(tier, quantity),
        None => Some(Decimal::ZERO),
    }
}

fn package_amount(
    package_price: Decimal,
    transform: &PackageTransform,
    quantity: Decimal,
) -> Option<Decimal> {
    let packages = quantity.checked_div(transform.divide_by)?;
    let packages = match transform.round {
        PackageRounding::Up => packages.ceil(),
        PackageRounding::Down => packages.floor(),
    };
    packages.checked_mul(package_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChargeType;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn usage_tiers() -> Vec<PriceTier> {
        vec![
            PriceTier::bounded(d("1000"), d("0.02")),
            PriceTier::bounded(d("5000"), d("0.005")),
            PriceTier::unbounded(d("0.01")),
        ]
    }

    #[test]
    fn slab_partitions_quantity_across_tiers() {
        let price = Price::tiered("USD", TierMode::Slab, usage_tiers());
        assert_eq!(calculate_amount(&price, d("1500")).unwrap(), d("22.50"));
        assert_eq!(calculate_amount(&price, d("1000")).unwrap(), d("20.00"));
        // 1000 * 0.02 + 4000 * 0.005 + 1000 * 0.01
        assert_eq!(calculate_amount(&price, d("6000")).unwrap(), d("50.00"));
    }

    #[test]
    fn slab_adds_flat_amount_once_per_touched_tier() {
        let tiers = vec![
            PriceTier::bounded(d("10"), d("1")).with_flat_amount(d("5")),
            PriceTier::unbounded(d("0.5")).with_flat_amount(d("2")),
        ];
        let price = Price::tiered("USD", TierMode::Slab, tiers);
        assert_eq!(calculate_amount(&price, d("4")).unwrap(), d("9"));
        assert_eq!(calculate_amount(&price, d("12")).unwrap(), d("18"));
    }

    #[test]
    fn volume_rates_whole_quantity() {
        let price = Price::tiered("USD", TierMode::Volume, usage_tiers());
        assert_eq!(calculate_amount(&price, d("1500")).unwrap(), d("7.50"));
        assert_eq!(calculate_amount(&price, d("0")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn rounds_once_at_the_end() {
        // 3 * 0.333 = 0.999, rounded once to 1.00
        let tiers = vec![PriceTier::unbounded(d("0.333"))];
        let price = Price::tiered("USD", TierMode::Slab, tiers);
        assert_eq!(calculate_amount(&price, d("3")).unwrap(), d("1.00"));
    }

    #[test]
    fn flat_fee_ignores_quantity() {
        let price = Price::flat_fee(ChargeType::Fixed, "USD", d("49.99"));
        assert_eq!(calculate_amount(&price, d("0")).unwrap(), d("49.99"));
        assert_eq!(calculate_amount(&price, d("7")).unwrap(), d("49.99"));
    }

    #[test]
    fn package_rounds_up_by_default() {
        let transform = PackageTransform {
            divide_by: d("100"),
            round: PackageRounding::Up,
        };
        let price = Price::package("USD", d("5"), transform);
        assert_eq!(calculate_amount(&price, d("250")).unwrap(), d("15"));
        assert_eq!(calculate_amount(&price, d("200")).unwrap(), d("10"));
    }

    #[test]
    fn rejects_negative_quantity() {
        let price = Price::flat_fee(ChargeType::Fixed, "USD", d("10"));
        assert!(matches!(
            calculate_amount(&price, d("-1")),
            Err(SettlementError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn overflowing_amounts_are_invalid_quantities() {
        let unbounded = vec![PriceTier::unbounded(d("2"))];
        let slab = Price::tiered("USD", TierMode::Slab, unbounded.clone());
        let volume = Price::tiered("USD", TierMode::Volume, unbounded);
        for price in [&slab, &volume] {
            assert!(matches!(
                calculate_amount(price, Decimal::MAX),
                Err(SettlementError::InvalidQuantity(q)) if q == Decimal::MAX
            ));
        }

        let tiny_packages = Price::package(
            "USD",
            d("5"),
            PackageTransform {
                divide_by: d("0.0000000001"),
                round: PackageRounding::Up,
            },
        );
        assert!(matches!(
            calculate_amount(&tiny_packages, d("50000000000000000000000000000")),
            Err(SettlementError::InvalidQuantity(_))
        ));
        assert_eq!(calculate_amount(&tiny_packages, d("1")).unwrap(), d("50000000000"));
    }

    #[test]
    fn flat_amount_overflow_in_a_touched_tier_is_rejected() {
        let tiers = vec![
            PriceTier::bounded(d("10"), d("1")),
            PriceTier::unbounded(d("0")).with_flat_amount(Decimal::MAX),
        ];
        let price = Price::tiered("USD", TierMode::Slab, tiers);
        assert_eq!(calculate_amount(&price, d("10")).unwrap(), d("10"));
        assert!(matches!(
            calculate_amount(&price, d("11")),
            Err(SettlementError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn rejects_unbounded_middle_tier() {
        let tiers = vec![
            PriceTier::unbounded(d("1")),
            PriceTier::bounded(d("10"), d("1")),
        ];
        let price = Price::tiered("USD", TierMode::Slab, tiers);
        assert!(matches!(
            calculate_amount(&price, d("1")),
            Err(SettlementError::InvalidPriceConfig(_))
        ));
    }
}
