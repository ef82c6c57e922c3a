//! Services module for settlement-service.

pub mod card;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod settlement;
pub mod stores;

pub use card::{CardChargeRequest, CardOutcome, CardProcessor, DisabledCardProcessor, HttpCardProcessor};
pub use database::Database;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use settlement::{SettlementOptions, SettlementOutcome, SettlementService};
pub use stores::{
    Clock, FixedClock, InvoiceStore, MeterUsageReader, PriceRepo, SettlementRepository,
    SettlementTransaction, SystemClock, WalletStore,
};
