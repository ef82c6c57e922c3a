//! Domain models for settlement-service.

mod buckets;
mod charge_type;
mod invoice;
mod line_item;
mod price;
mod wallet;

pub use buckets::ChargeBuckets;
pub use charge_type::{ChargeType, ChargeTypeRestriction};
pub use invoice::{
    ChargeRequest, CreateDraftInvoice, Invoice, InvoiceStatus, PaymentStatus,
};
pub use line_item::{LineItem, LineItemStatus};
pub use price::{BillingModel, PackageRounding, PackageTransform, Price, PriceTier, TierMode};
pub use wallet::{Wallet, WalletStatus, WalletType};
