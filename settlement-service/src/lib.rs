//! Settlement Service - invoice pricing, lifecycle and wallet/card payment settlement.

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::{ErrorKind, SettlementError};
