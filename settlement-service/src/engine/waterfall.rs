//! Payment waterfall allocator.
//!
//! Wallets are drawn in two passes. Wallets restricted to a single charge
//! type go first, each against its own bucket. Then wallets covering several
//! types (or all of them) drain whatever their types still owe, emptying
//! buckets in `ChargeType` order. Within a pass wallets are ordered by
//! `priority`, then by the configured [`WalletPaymentStrategy`], then by
//! creation time. The card, if available, absorbs the rest.
//!
//! Everything here works on copies; nothing is persisted.

use crate::error::{Result, SettlementError};
use crate::models::{ChargeBuckets, Wallet, WalletType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// How wallets of equal priority are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletPaymentStrategy {
    /// Promotional credit is spent before prepaid credit.
    #[default]
    PromotionalFirst,
    PrepaidFirst,
    /// Smallest balances first, so fewer wallets are left with small remainders.
    BalanceOptimized,
}

impl WalletPaymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletPaymentStrategy::PromotionalFirst => "promotional_first",
            WalletPaymentStrategy::PrepaidFirst => "prepaid_first",
            WalletPaymentStrategy::BalanceOptimized => "balance_optimized",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "promotional_first" => Some(WalletPaymentStrategy::PromotionalFirst),
            "prepaid_first" => Some(WalletPaymentStrategy::PrepaidFirst),
            "balance_optimized" => Some(WalletPaymentStrategy::BalanceOptimized),
            _ => None,
        }
    }

    fn tie_break(&self, a: &Wallet, b: &Wallet) -> Ordering {
        let preferred_first = |preferred: WalletType| {
            (a.wallet_type != preferred).cmp(&(b.wallet_type != preferred))
        };
        match self {
            WalletPaymentStrategy::PromotionalFirst => preferred_first(WalletType::Promotional),
            WalletPaymentStrategy::PrepaidFirst => preferred_first(WalletType::Prepaid),
            WalletPaymentStrategy::BalanceOptimized => a.balance.cmp(&b.balance),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationOptions {
    /// Maximum number of wallets that may contribute a non-zero amount.
    pub max_wallets: Option<usize>,
    pub strategy: WalletPaymentStrategy,
}

/// Amount drawn from one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletPayment {
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
}

/// Wallet side of an allocation, before the card is considered.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletAllocation {
    /// Eligible wallets in processing order, including zero payments.
    pub payments: Vec<WalletPayment>,
    pub remaining: ChargeBuckets,
}

impl WalletAllocation {
    pub fn wallet_total(&self) -> Decimal {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// Amount the card would have to cover.
    pub fn shortfall(&self) -> Decimal {
        self.remaining.total()
    }

    /// Fold in the card. `card_charged` is whether the processor actually
    /// took the shortfall.
    pub fn settle_card(self, card_charged: bool) -> AllocationResult {
        let card_amount = self.shortfall();
        let mut remaining = self.remaining;
        let card_charged = card_charged && card_amount > Decimal::ZERO;
        if card_charged {
            remaining.clear();
        }

        AllocationResult {
            succeeded: remaining.is_settled(),
            wallet_payments: self.payments,
            card_amount,
            card_charged,
            remaining,
        }
    }
}

/// Outcome of one allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    pub wallet_payments: Vec<WalletPayment>,
    /// Shortfall presented to the card, whether or not it was charged.
    pub card_amount: Decimal,
    pub card_charged: bool,
    pub succeeded: bool,
    /// Per-type amounts still owed after this allocation.
    pub remaining: ChargeBuckets,
}

impl AllocationResult {
    pub fn amount_for(&self, wallet_id: Uuid) -> Decimal {
        self.wallet_payments
            .iter()
            .find(|p| p.wallet_id == wallet_id)
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn wallet_total(&self) -> Decimal {
        self.wallet_payments.iter().map(|p| p.amount).sum()
    }

    /// Wallet payments plus the card amount when it was charged.
    pub fn total_paid(&self) -> Decimal {
        if self.card_charged {
            self.wallet_total() + self.card_amount
        } else {
            self.wallet_total()
        }
    }
}

/// Draw from wallets against the buckets. `currency` filters wallets.
pub fn allocate_wallets(
    buckets: &ChargeBuckets,
    wallets: &[Wallet],
    currency: &str,
    options: &AllocationOptions,
) -> Result<WalletAllocation> {
    if let Some((charge_type, amount)) = buckets.iter().find(|(_, amount)| *amount < Decimal::ZERO) {
        return Err(SettlementError::InvalidRequest(format!(
            "{} bucket is negative: {}",
            charge_type, amount
        )));
    }

    let mut ordered: Vec<&Wallet> = wallets
        .iter()
        .filter(|wallet| wallet.is_eligible_for(currency))
        .collect();
    ordered.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| options.strategy.tie_break(a, b))
            .then_with(|| a.created_utc.cmp(&b.created_utc))
    });

    let (restricted, general): (Vec<&Wallet>, Vec<&Wallet>) = ordered
        .into_iter()
        .partition(|wallet| wallet.allowed_charge_types.single_type().is_some());

    let mut remaining = buckets.clone();
    let mut payments = Vec::new();
    let mut contributors = 0usize;

    for wallet in restricted.into_iter().chain(general) {
        if options.max_wallets.is_some_and(|max| contributors >= max) {
            break;
        }

        let amount = match wallet.allowed_charge_types.single_type() {
            Some(charge_type) => remaining.drain(charge_type, wallet.balance),
            None => remaining.drain_covered(&wallet.allowed_charge_types, wallet.balance),
        };
        if amount > Decimal::ZERO {
            contributors += 1;
        }

        payments.push(WalletPayment {
            wallet_id: wallet.wallet_id,
            amount,
            balance_after: wallet.balance - amount,
        });
    }

    Ok(WalletAllocation {
        payments,
        remaining,
    })
}

/// Full waterfall with a card that succeeds whenever it is available.
pub fn allocate(
    buckets: &ChargeBuckets,
    wallets: &[Wallet],
    currency: &str,
    card_available: bool,
    options: &AllocationOptions,
) -> Result<AllocationResult> {
    Ok(allocate_wallets(buckets, wallets, currency, options)?.settle_card(card_available))
}
