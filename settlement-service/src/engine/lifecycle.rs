//! Invoice lifecycle: status transitions and amount bookkeeping.
//!
//! Invoice status moves Draft -> Finalized, and either of those may move to
//! Voided. Payment status moves independently once the invoice is finalized.

use super::classifier::classify;
use super::waterfall::AllocationResult;
use crate::error::{Result, SettlementError};
use crate::models::{Invoice, InvoiceStatus, LineItemStatus, PaymentStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Freeze a draft: publish its line items and fix the amount due.
pub fn finalize(invoice: &mut Invoice, now: DateTime<Utc>) -> Result<()> {
    if invoice.invoice_status != InvoiceStatus::Draft {
        return Err(SettlementError::InvoiceNotDraft(invoice.invoice_id));
    }

    let total = invoice.line_item_total().ok_or_else(|| {
        SettlementError::InvalidRequest("invoice total does not fit in a decimal".to_string())
    })?;
    if total <= Decimal::ZERO {
        return Err(SettlementError::NoChargesToInvoice);
    }

    for item in &mut invoice.line_items {
        item.status = LineItemStatus::Published;
    }
    invoice.amount_due = total;
    invoice.amount_paid = Decimal::ZERO;
    invoice.amount_remaining = total;
    invoice.remaining_by_type = classify(&invoice.line_items);
    invoice.invoice_status = InvoiceStatus::Finalized;
    invoice.payment_status = PaymentStatus::Pending;
    invoice.finalized_utc = Some(now);
    invoice.updated_utc = now;

    ensure_balanced(invoice)
}

/// Check that a payment may be attempted. Failed invoices remain payable.
pub fn ensure_payable(invoice: &Invoice) -> Result<()> {
    match invoice.invoice_status {
        InvoiceStatus::Finalized => {}
        InvoiceStatus::Voided => return Err(SettlementError::InvoiceVoided(invoice.invoice_id)),
        InvoiceStatus::Draft => {
            return Err(SettlementError::InvoiceNotFinalized(invoice.invoice_id));
        }
    }

    if invoice.payment_status == PaymentStatus::Succeeded {
        return Err(SettlementError::AlreadyPaid(invoice.invoice_id));
    }

    if invoice.amount_remaining <= Decimal::ZERO {
        return Err(SettlementError::NoRemainingAmount(invoice.invoice_id));
    }

    Ok(())
}

/// Apply an allocation to the invoice and return the new payment status.
///
/// `card_declined` marks a definitive refusal by the processor; an
/// unavailable card leaves the invoice pending.
pub fn apply_payment(
    invoice: &mut Invoice,
    allocation: &AllocationResult,
    card_declined: bool,
    now: DateTime<Utc>,
) -> Result<PaymentStatus> {
    let paid = allocation.total_paid();
    if paid > invoice.amount_remaining {
        return Err(SettlementError::InvariantViolation(format!(
            "invoice {} cannot collect {} with {} remaining",
            invoice.invoice_id, paid, invoice.amount_remaining
        )));
    }

    let next = if invoice.amount_remaining == paid {
        PaymentStatus::Succeeded
    } else if card_declined {
        PaymentStatus::Failed
    } else {
        PaymentStatus::Pending
    };
    transition_payment(invoice, next)?;

    invoice.amount_paid += paid;
    invoice.amount_remaining -= paid;
    invoice.remaining_by_type = allocation.remaining.clone();
    if next == PaymentStatus::Succeeded {
        invoice.paid_utc = Some(now);
    }
    invoice.updated_utc = now;

    if invoice.remaining_by_type.total() != invoice.amount_remaining {
        return Err(SettlementError::InvariantViolation(format!(
            "invoice {} buckets total {} but {} remains",
            invoice.invoice_id,
            invoice.remaining_by_type.total(),
            invoice.amount_remaining
        )));
    }
    ensure_balanced(invoice)?;

    Ok(next)
}

/// Void a draft or finalized invoice that has not collected anything.
pub fn void(invoice: &mut Invoice, now: DateTime<Utc>) -> Result<()> {
    match invoice.invoice_status {
        InvoiceStatus::Draft | InvoiceStatus::Finalized => {}
        InvoiceStatus::Voided => return Err(SettlementError::InvoiceVoided(invoice.invoice_id)),
    }

    if invoice.payment_status == PaymentStatus::Succeeded {
        return Err(SettlementError::AlreadyPaid(invoice.invoice_id));
    }
    if invoice.amount_paid > Decimal::ZERO {
        return Err(SettlementError::InvoicePartiallyPaid {
            invoice_id: invoice.invoice_id,
            amount_paid: invoice.amount_paid,
        });
    }

    invoice.invoice_status = InvoiceStatus::Voided;
    invoice.voided_utc = Some(now);
    invoice.updated_utc = now;
    Ok(())
}

/// Move the payment status, rejecting moves out of a terminal state.
pub fn transition_payment(invoice: &mut Invoice, next: PaymentStatus) -> Result<()> {
    if !invoice.payment_status.can_transition_to(next) {
        return Err(SettlementError::InvalidPaymentTransition {
            from: invoice.payment_status.as_str(),
            to: next.as_str(),
        });
    }
    invoice.payment_status = next;
    Ok(())
}

fn ensure_balanced(invoice: &Invoice) -> Result<()> {
    if !invoice.is_balanced() {
        return Err(SettlementError::InvariantViolation(format!(
            "invoice {} due {} != paid {} + remaining {}",
            invoice.invoice_id, invoice.amount_due, invoice.amount_paid, invoice.amount_remaining
        )));
    }
    Ok(())
}
