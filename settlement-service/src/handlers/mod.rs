pub mod health;
pub mod invoices;

pub use health::{health_check, metrics_handler, readiness_check};
pub use invoices::{attempt_payment, create_invoice, finalize_invoice, get_invoice, void_invoice};
