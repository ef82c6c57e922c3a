//! Storage and collaborator interfaces used by the settlement orchestrator.
//!
//! Every mutation of invoices and wallets goes through a
//! [`SettlementTransaction`]; nothing is written outside one.

use crate::models::{Invoice, Price, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait InvoiceStore: Send {
    /// Load an invoice with its line items, locking it until the
    /// transaction ends.
    async fn get_invoice_for_update(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Persist amounts, statuses and timestamps of the invoice and its
    /// line items.
    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), AppError>;

    async fn create_with_line_items(&mut self, invoice: &Invoice) -> Result<(), AppError>;
}

#[async_trait]
pub trait WalletStore: Send {
    /// The customer's wallets in `currency`, locked in `wallet_id` order.
    async fn get_wallets_for_update(
        &mut self,
        customer_id: Uuid,
        currency: &str,
    ) -> Result<Vec<Wallet>, AppError>;

    /// Decrement a wallet balance. Returns the new balance, or `None` when
    /// the balance is below `amount` and nothing was changed.
    async fn debit_wallet(
        &mut self,
        wallet_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>, AppError>;
}

/// One unit of atomicity. Dropping it without `commit` discards every write.
#[async_trait]
pub trait SettlementTransaction: InvoiceStore + WalletStore {
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

#[async_trait]
pub trait SettlementRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SettlementTransaction>, AppError>;

    /// Read an invoice without locking it.
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;
}

#[async_trait]
pub trait PriceRepo: Send + Sync {
    async fn get_price(&self, price_id: Uuid) -> Result<Option<Price>, AppError>;
}

/// Aggregated metered usage for a billing period.
#[async_trait]
pub trait MeterUsageReader: Send + Sync {
    async fn usage_quantity(
        &self,
        customer_id: Uuid,
        subscription_id: Option<Uuid>,
        price_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Decimal, AppError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
