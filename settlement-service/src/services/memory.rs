//! In-memory implementation of the settlement stores.
//!
//! A transaction holds the store lock from `begin` until it ends and works
//! on a copy of the state, so transactions are fully serialized and an
//! uncommitted transaction leaves no trace.

use crate::models::{Invoice, Price, Wallet};
use crate::services::stores::{
    InvoiceStore, MeterUsageReader, PriceRepo, SettlementRepository, SettlementTransaction,
    WalletStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct UsageRecord {
    customer_id: Uuid,
    subscription_id: Option<Uuid>,
    price_id: Uuid,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    quantity: Decimal,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    invoices: HashMap<Uuid, Invoice>,
    wallets: HashMap<Uuid, Wallet>,
    prices: HashMap<Uuid, Price>,
    usage: Vec<UsageRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    commit_conflicts: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_price(&self, price: Price) {
        self.state.lock().await.prices.insert(price.price_id, price);
    }

    pub async fn insert_wallet(&self, wallet: Wallet) {
        self.state.lock().await.wallets.insert(wallet.wallet_id, wallet);
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.state.lock().await.invoices.insert(invoice.invoice_id, invoice);
    }

    pub async fn record_usage(
        &self,
        customer_id: Uuid,
        subscription_id: Option<Uuid>,
        price_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        quantity: Decimal,
    ) {
        self.state.lock().await.usage.push(UsageRecord {
            customer_id,
            subscription_id,
            price_id,
            period_start,
            period_end,
            quantity,
        });
    }

    pub async fn wallet(&self, wallet_id: Uuid) -> Option<Wallet> {
        self.state.lock().await.wallets.get(&wallet_id).cloned()
    }

    /// Make the next `count` commits fail with a serialization conflict.
    pub fn fail_next_commits(&self, count: u32) {
        self.commit_conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementRepository for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn SettlementTransaction>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            commit_conflicts: self.commit_conflicts.clone(),
        }))
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.state.lock().await.invoices.get(&invoice_id).cloned())
    }
}

#[async_trait]
impl PriceRepo for MemoryStore {
    async fn get_price(&self, price_id: Uuid) -> Result<Option<Price>, AppError> {
        Ok(self.state.lock().await.prices.get(&price_id).cloned())
    }
}

#[async_trait]
impl MeterUsageReader for MemoryStore {
    async fn usage_quantity(
        &self,
        customer_id: Uuid,
        subscription_id: Option<Uuid>,
        price_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Decimal, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .usage
            .iter()
            .filter(|u| u.customer_id == customer_id && u.price_id == price_id)
            .filter(|u| subscription_id.is_none() || u.subscription_id == subscription_id)
            .filter(|u| u.period_start >= period_start && u.period_end <= period_end)
            .map(|u| u.quantity)
            .sum())
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    commit_conflicts: Arc<AtomicU32>,
}

#[async_trait]
impl InvoiceStore for MemoryTransaction {
    async fn get_invoice_for_update(&mut self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.working.invoices.get(&invoice_id).cloned())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<(), AppError> {
        match self.working.invoices.get_mut(&invoice.invoice_id) {
            Some(stored) => {
                *stored = invoice.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice.invoice_id
            ))),
        }
    }

    async fn create_with_line_items(&mut self, invoice: &Invoice) -> Result<(), AppError> {
        if self.working.invoices.contains_key(&invoice.invoice_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} already exists",
                invoice.invoice_id
            )));
        }
        self.working
            .invoices
            .insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }
}

#[async_trait]
impl WalletStore for MemoryTransaction {
    async fn get_wallets_for_update(
        &mut self,
        customer_id: Uuid,
        currency: &str,
    ) -> Result<Vec<Wallet>, AppError> {
        let mut wallets: Vec<Wallet> = self
            .working
            .wallets
            .values()
            .filter(|w| w.customer_id == customer_id && w.currency.eq_ignore_ascii_case(currency))
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.wallet_id);
        Ok(wallets)
    }

    async fn debit_wallet(
        &mut self,
        wallet_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>, AppError> {
        match self.working.wallets.get_mut(&wallet_id) {
            Some(wallet) if wallet.balance >= amount => {
                wallet.balance -= amount;
                wallet.updated_utc = now;
                Ok(Some(wallet.balance))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl SettlementTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTransaction {
            mut guard,
            working,
            commit_conflicts,
        } = *self;

        let injected = commit_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "could not serialize access due to concurrent update"
            )));
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChargeTypeRestriction;

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let wallet = Wallet::new(
            Uuid::new_v4(),
            "USD",
            Decimal::from(10),
            ChargeTypeRestriction::All,
            0,
            Utc::now(),
        );
        store.insert_wallet(wallet.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let balance = tx
            .debit_wallet(wallet.wallet_id, Decimal::from(4), Utc::now())
            .await
            .unwrap();
        assert_eq!(balance, Some(Decimal::from(6)));
        tx.rollback().await.unwrap();

        assert_eq!(store.wallet(wallet.wallet_id).await.unwrap().balance, Decimal::from(10));
    }

    #[tokio::test]
    async fn guarded_debit_refuses_overdraft() {
        let store = MemoryStore::new();
        let wallet = Wallet::new(
            Uuid::new_v4(),
            "USD",
            Decimal::from(3),
            ChargeTypeRestriction::All,
            0,
            Utc::now(),
        );
        store.insert_wallet(wallet.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let balance = tx
            .debit_wallet(wallet.wallet_id, Decimal::from(4), Utc::now())
            .await
            .unwrap();
        assert_eq!(balance, None);
        tx.commit().await.unwrap();

        assert_eq!(store.wallet(wallet.wallet_id).await.unwrap().balance, Decimal::from(3));
    }
}
