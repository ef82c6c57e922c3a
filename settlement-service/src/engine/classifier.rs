//! Line item classifier: groups line item amounts into per-charge-type buckets.

use crate::error::{Result, SettlementError};
use crate::models::{ChargeBuckets, Invoice, LineItem};

/// Sum line item amounts by charge type.
pub fn classify(line_items: &[LineItem]) -> ChargeBuckets {
    line_items
        .iter()
        .map(|item| (item.charge_type, item.amount))
        .collect()
}

/// Buckets still owed on an invoice.
///
/// Uses the persisted per-type remainder when it agrees with
/// `amount_remaining`, otherwise re-derives the buckets from the line items
/// for an invoice that has not collected anything yet.
pub fn remaining_buckets(invoice: &Invoice) -> Result<ChargeBuckets> {
    if invoice.remaining_by_type.total() == invoice.amount_remaining {
        return Ok(invoice.remaining_by_type.clone());
    }

    let buckets = classify(&invoice.line_items);
    if invoice.amount_paid.is_zero() && buckets.total() == invoice.amount_remaining {
        return Ok(buckets);
    }

    Err(SettlementError::InvariantViolation(format!(
        "invoice {} has {} remaining but its buckets total {}",
        invoice.invoice_id,
        invoice.amount_remaining,
        invoice.remaining_by_type.total()
    )))
}
