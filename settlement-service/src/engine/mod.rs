//! Pure settlement engine. No I/O; every function works on values passed in.

pub mod classifier;
pub mod lifecycle;
pub mod money;
pub mod pricing;
pub mod waterfall;

pub use classifier::{classify, remaining_buckets};
pub use pricing::calculate_amount;
pub use waterfall::{
    allocate, allocate_wallets, AllocationOptions, AllocationResult, WalletAllocation,
    WalletPayment, WalletPaymentStrategy,
};
