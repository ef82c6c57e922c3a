//! Settlement orchestrator.
//!
//! Each operation runs in one store transaction. A payment attempt locks the
//! invoice and the customer's wallets, allocates, debits wallets, resolves
//! the card and writes the invoice before committing, so wallet debits and
//! the invoice update land together or not at all.

use crate::engine::{allocate_wallets, calculate_amount, lifecycle, remaining_buckets};
use crate::engine::{AllocationOptions, WalletPayment};
use crate::error::{Result, SettlementError};
use crate::models::{ChargeType, CreateDraftInvoice, Invoice, LineItem, PaymentStatus};
use crate::services::card::{CardChargeRequest, CardOutcome, CardProcessor};
use crate::services::metrics::{
    CARD_CHARGES_TOTAL, ERRORS_TOTAL, INVOICE_TRANSITIONS_TOTAL, SETTLEMENT_ATTEMPTS_TOTAL,
    WALLET_DEBITS_TOTAL,
};
use crate::services::stores::{
    Clock, MeterUsageReader, PriceRepo, SettlementRepository, SettlementTransaction,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone)]
pub struct SettlementOptions {
    pub allocation: AllocationOptions,
    /// Upper bound on one card processor call.
    pub card_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for SettlementOptions {
    fn default() -> Self {
        Self {
            allocation: AllocationOptions::default(),
            card_timeout: Duration::from_millis(5000),
            retry: RetryConfig::default(),
        }
    }
}

/// Result of one payment attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub invoice_id: Uuid,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub succeeded: bool,
    pub wallet_payments: Vec<WalletPayment>,
    /// Shortfall presented to the card, charged or not.
    pub card_amount: Decimal,
    pub card: CardOutcome,
    /// Collected by this attempt.
    pub amount_paid: Decimal,
    pub amount_remaining: Decimal,
}

impl SettlementOutcome {
    pub fn amount_for(&self, wallet_id: Uuid) -> Decimal {
        self.wallet_payments
            .iter()
            .find(|p| p.wallet_id == wallet_id)
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO)
    }
}

pub struct SettlementService {
    repository: Arc<dyn SettlementRepository>,
    prices: Arc<dyn PriceRepo>,
    usage: Arc<dyn MeterUsageReader>,
    card: Arc<dyn CardProcessor>,
    clock: Arc<dyn Clock>,
    options: SettlementOptions,
}

impl SettlementService {
    pub fn new(
        repository: Arc<dyn SettlementRepository>,
        prices: Arc<dyn PriceRepo>,
        usage: Arc<dyn MeterUsageReader>,
        card: Arc<dyn CardProcessor>,
        clock: Arc<dyn Clock>,
        options: SettlementOptions,
    ) -> Self {
        Self {
            repository,
            prices,
            usage,
            card,
            clock,
            options,
        }
    }

    /// Price every charge and store a draft invoice with its line items.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_draft_invoice(&self, input: CreateDraftInvoice) -> Result<Invoice> {
        input
            .validate()
            .map_err(|e| SettlementError::InvalidRequest(e.to_string()))?;

        let now = self.clock.now();
        let period_end = input.period_end.unwrap_or(now);
        if input.period_start > period_end {
            return Err(SettlementError::InvalidRequest(format!(
                "period start {} is after period end {}",
                input.period_start, period_end
            )));
        }

        let draft = Invoice::draft(
            input.customer_id,
            input.subscription_id,
            &input.currency,
            input.period_start,
            period_end,
            now,
        );

        let mut line_items = Vec::with_capacity(input.charges.len());
        for charge in &input.charges {
            let price = self
                .prices
                .get_price(charge.price_id)
                .await?
                .ok_or(SettlementError::PriceNotFound(charge.price_id))?;

            if !price.currency.eq_ignore_ascii_case(&draft.currency) {
                return Err(SettlementError::InvalidRequest(format!(
                    "price {} is in {} but the invoice is in {}",
                    price.price_id, price.currency, draft.currency
                )));
            }

            let quantity = match (charge.quantity, price.price_type) {
                (Some(quantity), _) => quantity,
                (None, ChargeType::Usage) => {
                    self.usage
                        .usage_quantity(
                            draft.customer_id,
                            draft.subscription_id,
                            price.price_id,
                            draft.period_start,
                            draft.period_end,
                        )
                        .await?
                }
                (None, ChargeType::Fixed) => Decimal::ONE,
            };

            let amount = calculate_amount(&price, quantity)?;
            let mut item = LineItem::new(
                draft.invoice_id,
                price.price_id,
                price.price_type,
                quantity,
                amount,
                now,
            );
            item.description = charge.description.clone();
            line_items.push(item);
        }

        let invoice = draft.with_line_items(line_items).ok_or_else(|| {
            SettlementError::InvalidRequest("invoice total does not fit in a decimal".to_string())
        })?;

        let mut tx = self.repository.begin().await?;
        let result = tx
            .create_with_line_items(&invoice)
            .await
            .map_err(SettlementError::from);
        finish(tx, result).await?;

        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&["created"])
            .inc();
        info!(
            invoice_id = %invoice.invoice_id,
            amount_due = %invoice.amount_due,
            line_items = invoice.line_items.len(),
            "Draft invoice created"
        );

        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.repository
            .get_invoice(invoice_id)
            .await?
            .ok_or(SettlementError::InvoiceNotFound(invoice_id))
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn finalize_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        let invoice = self
            .with_retry("finalize_invoice", move || self.finalize_once(invoice_id))
            .await?;

        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&["finalized"])
            .inc();
        info!(
            invoice_id = %invoice.invoice_id,
            amount_due = %invoice.amount_due,
            "Invoice finalized"
        );
        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn void_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        let invoice = self
            .with_retry("void_invoice", move || self.void_once(invoice_id))
            .await?;

        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&["voided"])
            .inc();
        info!(invoice_id = %invoice.invoice_id, "Invoice voided");
        Ok(invoice)
    }

    /// Settle as much of the invoice as wallets and the card allow.
    ///
    /// A card that is unavailable or declines is a normal outcome: wallet
    /// payments are still committed and the invoice stays payable.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn attempt_payment(&self, invoice_id: Uuid) -> Result<SettlementOutcome> {
        let result = self
            .with_retry("attempt_payment", move || self.attempt_once(invoice_id))
            .await;

        match &result {
            Ok(outcome) => {
                SETTLEMENT_ATTEMPTS_TOTAL
                    .with_label_values(&[outcome.payment_status.as_str()])
                    .inc();
                for payment in outcome.wallet_payments.iter().filter(|p| p.amount > Decimal::ZERO) {
                    WALLET_DEBITS_TOTAL
                        .with_label_values(&[outcome.currency.as_str()])
                        .inc_by(payment.amount.to_f64().unwrap_or(0.0));
                }
                if outcome.payment_status == PaymentStatus::Succeeded {
                    INVOICE_TRANSITIONS_TOTAL
                        .with_label_values(&["paid"])
                        .inc();
                }
                info!(
                    invoice_id = %invoice_id,
                    payment_status = outcome.payment_status.as_str(),
                    amount_paid = %outcome.amount_paid,
                    amount_remaining = %outcome.amount_remaining,
                    card = outcome.card.as_str(),
                    "Payment attempt settled"
                );
            }
            Err(e) => {
                SETTLEMENT_ATTEMPTS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                ERRORS_TOTAL.with_label_values(&[e.kind().as_str()]).inc();
            }
        }

        result
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        retry_with_backoff(
            &self.options.retry,
            operation,
            |e: &SettlementError| e.is_retryable(),
            f,
        )
        .await
    }

    async fn finalize_once(&self, invoice_id: Uuid) -> Result<Invoice> {
        let mut tx = self.repository.begin().await?;
        let result = self.finalize_in(tx.as_mut(), invoice_id).await;
        finish(tx, result).await
    }

    async fn finalize_in(
        &self,
        tx: &mut dyn SettlementTransaction,
        invoice_id: Uuid,
    ) -> Result<Invoice> {
        let mut invoice = tx
            .get_invoice_for_update(invoice_id)
            .await?
            .ok_or(SettlementError::InvoiceNotFound(invoice_id))?;

        lifecycle::finalize(&mut invoice, self.clock.now())?;
        tx.update_invoice(&invoice).await?;
        Ok(invoice)
    }

    async fn void_once(&self, invoice_id: Uuid) -> Result<Invoice> {
        let mut tx = self.repository.begin().await?;
        let result = self.void_in(tx.as_mut(), invoice_id).await;
        finish(tx, result).await
    }

    async fn void_in(&self, tx: &mut dyn SettlementTransaction, invoice_id: Uuid) -> Result<Invoice> {
        let mut invoice = tx
            .get_invoice_for_update(invoice_id)
            .await?
            .ok_or(SettlementError::InvoiceNotFound(invoice_id))?;

        lifecycle::void(&mut invoice, self.clock.now())?;
        tx.update_invoice(&invoice).await?;
        Ok(invoice)
    }

    async fn attempt_once(&self, invoice_id: Uuid) -> Result<SettlementOutcome> {
        let mut tx = self.repository.begin().await?;
        let result = self.settle_in(tx.as_mut(), invoice_id).await;
        finish(tx, result).await
    }

    async fn settle_in(
        &self,
        tx: &mut dyn SettlementTransaction,
        invoice_id: Uuid,
    ) -> Result<SettlementOutcome> {
        let now = self.clock.now();

        let mut invoice = tx
            .get_invoice_for_update(invoice_id)
            .await?
            .ok_or(SettlementError::InvoiceNotFound(invoice_id))?;
        lifecycle::ensure_payable(&invoice)?;

        let buckets = remaining_buckets(&invoice)?;
        let wallets = tx
            .get_wallets_for_update(invoice.customer_id, &invoice.currency)
            .await?;
        let allocation = allocate_wallets(
            &buckets,
            &wallets,
            &invoice.currency,
            &self.options.allocation,
        )?;

        for payment in allocation.payments.iter().filter(|p| p.amount > Decimal::ZERO) {
            match tx.debit_wallet(payment.wallet_id, payment.amount, now).await? {
                Some(balance) if balance == payment.balance_after => {}
                Some(balance) => {
                    return Err(SettlementError::InvariantViolation(format!(
                        "wallet {} balance is {} after debit, expected {}",
                        payment.wallet_id, balance, payment.balance_after
                    )));
                }
                None => {
                    return Err(SettlementError::InsufficientWalletBalance {
                        wallet_id: payment.wallet_id,
                        amount: payment.amount,
                    });
                }
            }
        }

        let shortfall = allocation.shortfall();
        let card = if shortfall > Decimal::ZERO {
            self.charge_card(&invoice, shortfall).await
        } else {
            CardOutcome::NotRequired
        };
        if card.is_definitive() {
            invoice.payment_attempts += 1;
        }

        let allocation = allocation.settle_card(card.is_charged());
        let amount_paid = allocation.total_paid();
        let payment_status =
            lifecycle::apply_payment(&mut invoice, &allocation, card.is_declined(), now)?;
        tx.update_invoice(&invoice).await?;

        Ok(SettlementOutcome {
            invoice_id,
            currency: invoice.currency.clone(),
            payment_status,
            succeeded: allocation.succeeded,
            wallet_payments: allocation.wallet_payments,
            card_amount: allocation.card_amount,
            card,
            amount_paid,
            amount_remaining: invoice.amount_remaining,
        })
    }

    /// Charge the card, treating errors and timeouts as unavailable.
    async fn charge_card(&self, invoice: &Invoice, amount: Decimal) -> CardOutcome {
        let request = CardChargeRequest {
            customer_id: invoice.customer_id,
            amount,
            currency: invoice.currency.clone(),
            idempotency_key: invoice.card_idempotency_key(),
        };

        let outcome =
            match tokio::time::timeout(self.options.card_timeout, self.card.charge(&request)).await
            {
                Ok(Ok(outcome)) if outcome.is_definitive() => outcome,
                Ok(Ok(other)) => CardOutcome::Unavailable {
                    reason: format!("unexpected processor answer: {}", other.as_str()),
                },
                Ok(Err(e)) => CardOutcome::Unavailable {
                    reason: e.to_string(),
                },
                Err(_) => CardOutcome::Unavailable {
                    reason: format!(
                        "timed out after {}ms",
                        self.options.card_timeout.as_millis()
                    ),
                },
            };

        match &outcome {
            CardOutcome::Unavailable { reason } => warn!(
                invoice_id = %invoice.invoice_id,
                idempotency_key = %request.idempotency_key,
                reason = %reason,
                "Card processor unavailable"
            ),
            CardOutcome::Declined { reason } => warn!(
                invoice_id = %invoice.invoice_id,
                idempotency_key = %request.idempotency_key,
                reason = %reason,
                "Card declined"
            ),
            _ => {}
        }
        CARD_CHARGES_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();

        outcome
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Box<dyn SettlementTransaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Failed to roll back transaction");
            }
            Err(err)
        }
    }
}
