//! Prometheus metrics for settlement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Settlement attempts by outcome (succeeded, pending, failed, error).
pub static SETTLEMENT_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_attempts_total",
        "Total number of payment attempts",
        &["outcome"]
    )
    .expect("Failed to register settlement_attempts_total")
});

/// Amount debited from wallets, by currency.
pub static WALLET_DEBITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_wallet_debits_total",
        "Total amount debited from wallets",
        &["currency"]
    )
    .expect("Failed to register settlement_wallet_debits_total")
});

/// Card calls by outcome (charged, declined, unavailable).
pub static CARD_CHARGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_card_charges_total",
        "Total number of card processor calls",
        &["outcome"]
    )
    .expect("Failed to register settlement_card_charges_total")
});

/// Invoice lifecycle transitions.
pub static INVOICE_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_invoice_transitions_total",
        "Total number of invoice lifecycle transitions",
        &["transition"]
    )
    .expect("Failed to register settlement_invoice_transitions_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register settlement_errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "settlement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register settlement_db_query_duration_seconds")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SETTLEMENT_ATTEMPTS_TOTAL);
    Lazy::force(&WALLET_DEBITS_TOTAL);
    Lazy::force(&CARD_CHARGES_TOTAL);
    Lazy::force(&INVOICE_TRANSITIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
