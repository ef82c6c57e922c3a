mod common;

use common::{d, CardScript, ScriptedCardProcessor, TestHarness};
use rust_decimal::Decimal;
use settlement_service::models::{ChargeType, ChargeTypeRestriction, InvoiceStatus, PaymentStatus};
use settlement_service::services::CardOutcome;
use settlement_service::SettlementError;
use uuid::Uuid;

// =============================================================================
// Successful settlement
// =============================================================================

#[tokio::test]
async fn wallet_covers_invoice_without_card() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let wallet = harness.add_wallet("60", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    let outcome = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.payment_status, PaymentStatus::Succeeded);
    assert_eq!(outcome.amount_for(wallet.wallet_id), d("50"));
    assert_eq!(outcome.card_amount, Decimal::ZERO);
    assert_eq!(outcome.card, CardOutcome::NotRequired);
    assert!(harness.card.requests().is_empty());

    assert_eq!(harness.balance(wallet.wallet_id).await, d("10"));
    let stored = harness.service.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Succeeded);
    assert_eq!(stored.amount_paid, d("50"));
    assert_eq!(stored.amount_remaining, Decimal::ZERO);
    assert!(stored.paid_utc.is_some());
}

#[tokio::test]
async fn card_covers_wallet_shortfall() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let wallet = harness.add_wallet("30", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    let outcome = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.amount_for(wallet.wallet_id), d("30"));
    assert_eq!(outcome.card_amount, d("20"));
    assert!(outcome.card.is_charged());
    assert_eq!(outcome.amount_paid, d("50"));

    let requests = harness.card.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, d("20"));
    assert_eq!(requests[0].currency, "USD");
    assert_eq!(requests[0].customer_id, harness.customer_id);
    assert_eq!(requests[0].idempotency_key, format!("{}:0", invoice.invoice_id));

    assert_eq!(harness.balance(wallet.wallet_id).await, Decimal::ZERO);
}

#[tokio::test]
async fn mixed_invoice_settles_across_restricted_wallets_and_card() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let fixed = harness
        .add_wallet("15", ChargeTypeRestriction::only(ChargeType::Fixed), 0)
        .await;
    let usage = harness
        .add_wallet("35", ChargeTypeRestriction::only(ChargeType::Usage), 0)
        .await;
    let invoice = harness
        .finalized_invoice(&[(ChargeType::Fixed, "20"), (ChargeType::Usage, "30")])
        .await;

    let outcome = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.amount_for(fixed.wallet_id), d("15"));
    assert_eq!(outcome.amount_for(usage.wallet_id), d("30"));
    assert_eq!(outcome.card_amount, d("5"));
    assert_eq!(harness.balance(fixed.wallet_id).await, Decimal::ZERO);
    assert_eq!(harness.balance(usage.wallet_id).await, d("5"));
}

// =============================================================================
// Card unavailable, declined or slow
// =============================================================================

#[tokio::test]
async fn unavailable_card_keeps_wallet_payment_and_leaves_invoice_pending() {
    let harness = TestHarness::new(ScriptedCardProcessor::unavailable());
    let wallet = harness.add_wallet("30", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    let outcome = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    assert!(!outcome.succeeded);
    assert_eq!(outcome.payment_status, PaymentStatus::Pending);
    assert_eq!(outcome.amount_for(wallet.wallet_id), d("30"));
    assert_eq!(outcome.card_amount, d("20"));
    assert!(matches!(outcome.card, CardOutcome::Unavailable { .. }));
    assert_eq!(outcome.amount_remaining, d("20"));

    assert_eq!(harness.balance(wallet.wallet_id).await, Decimal::ZERO);
    let stored = harness.service.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(stored.amount_paid, d("30"));
    assert_eq!(stored.amount_remaining, d("20"));
    assert_eq!(stored.remaining_by_type.get(ChargeType::Usage), d("20"));
    assert_eq!(stored.payment_attempts, 0);
    assert!(stored.is_balanced());
}

#[tokio::test]
async fn retry_after_unavailable_card_reuses_idempotency_key() {
    let card = ScriptedCardProcessor::approving().then(&[CardScript::Fail]);
    let harness = TestHarness::new(card);
    harness.add_wallet("30", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    let first = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();
    assert_eq!(first.payment_status, PaymentStatus::Pending);

    let second = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();
    assert!(second.succeeded);
    // The drained wallet is no longer eligible.
    assert!(second.wallet_payments.is_empty());
    assert_eq!(second.amount_paid, d("20"));

    let keys: Vec<String> = harness
        .card
        .requests()
        .into_iter()
        .map(|r| r.idempotency_key)
        .collect();
    let expected = format!("{}:0", invoice.invoice_id);
    assert_eq!(keys, vec![expected.clone(), expected]);
}

#[tokio::test]
async fn slow_card_is_treated_as_unavailable() {
    let card = ScriptedCardProcessor::approving().then(&[CardScript::Hang]);
    let harness = TestHarness::new(card);
    let invoice = harness.finalized_invoice(&[(ChargeType::Fixed, "25")]).await;

    let outcome = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();
    assert!(matches!(outcome.card, CardOutcome::Unavailable { .. }));
    assert_eq!(outcome.payment_status, PaymentStatus::Pending);
    assert_eq!(outcome.amount_remaining, d("25"));

    let retry = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();
    assert!(retry.succeeded);

    let requests = harness.card.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].idempotency_key, requests[1].idempotency_key);
}

#[tokio::test]
async fn declined_card_fails_payment_and_advances_idempotency_key() {
    let card = ScriptedCardProcessor::approving().then(&[CardScript::Decline]);
    let harness = TestHarness::new(card);
    let invoice = harness.finalized_invoice(&[(ChargeType::Fixed, "25")]).await;

    let declined = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();
    assert_eq!(declined.payment_status, PaymentStatus::Failed);
    assert!(declined.card.is_declined());
    assert!(!declined.succeeded);

    let stored = harness.service.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
    assert_eq!(stored.payment_attempts, 1);

    let retry = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();
    assert_eq!(retry.payment_status, PaymentStatus::Succeeded);

    let keys: Vec<String> = harness
        .card
        .requests()
        .into_iter()
        .map(|r| r.idempotency_key)
        .collect();
    assert_eq!(
        keys,
        vec![
            format!("{}:0", invoice.invoice_id),
            format!("{}:1", invoice.invoice_id)
        ]
    );
}

// =============================================================================
// Concurrency and retries
// =============================================================================

#[tokio::test]
async fn commit_conflict_is_retried_without_double_debit() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let wallet = harness.add_wallet("60", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    harness.store.fail_next_commits(2);
    let outcome = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    assert!(outcome.succeeded);
    assert_eq!(harness.balance(wallet.wallet_id).await, d("10"));
    let stored = harness.service.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(stored.amount_paid, d("50"));
}

#[tokio::test]
async fn persistent_conflict_surfaces_and_changes_nothing() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let wallet = harness.add_wallet("60", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    harness.store.fail_next_commits(10);
    let result = harness.service.attempt_payment(invoice.invoice_id).await;

    assert!(matches!(result, Err(SettlementError::ConcurrentUpdate(_))));
    assert_eq!(harness.balance(wallet.wallet_id).await, d("60"));
    let stored = harness.service.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(stored.amount_remaining, d("50"));
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn concurrent_attempts_settle_invoice_once() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let wallet = harness.add_wallet("100", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    let (a, b) = tokio::join!(
        harness.service.attempt_payment(invoice.invoice_id),
        harness.service.attempt_payment(invoice.invoice_id)
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(SettlementError::AlreadyPaid(_)))));
    assert_eq!(harness.balance(wallet.wallet_id).await, d("50"));
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn paid_invoice_rejects_further_payment() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let invoice = harness.finalized_invoice(&[(ChargeType::Fixed, "10")]).await;
    harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    let result = harness.service.attempt_payment(invoice.invoice_id).await;
    assert!(matches!(result, Err(SettlementError::AlreadyPaid(_))));
    assert_eq!(harness.card.requests().len(), 1);
}

#[tokio::test]
async fn draft_and_unknown_invoices_are_not_payable() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let draft = harness.draft_invoice(&[(ChargeType::Fixed, "10")]).await;

    let result = harness.service.attempt_payment(draft.invoice_id).await;
    assert!(matches!(result, Err(SettlementError::InvoiceNotFinalized(_))));

    let unknown = Uuid::new_v4();
    let result = harness.service.attempt_payment(unknown).await;
    assert!(matches!(result, Err(SettlementError::InvoiceNotFound(id)) if id == unknown));
}

#[tokio::test]
async fn voided_invoice_is_not_payable() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let invoice = harness.finalized_invoice(&[(ChargeType::Fixed, "10")]).await;

    let voided = harness.service.void_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(voided.invoice_status, InvoiceStatus::Voided);

    let result = harness.service.attempt_payment(invoice.invoice_id).await;
    assert!(matches!(result, Err(SettlementError::InvoiceVoided(_))));
    assert!(harness.card.requests().is_empty());
}

#[tokio::test]
async fn partially_paid_invoice_cannot_be_voided() {
    let harness = TestHarness::new(ScriptedCardProcessor::unavailable());
    harness.add_wallet("10", ChargeTypeRestriction::All, 0).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;
    harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    let result = harness.service.void_invoice(invoice.invoice_id).await;
    assert!(matches!(
        result,
        Err(SettlementError::InvoicePartiallyPaid { amount_paid, .. }) if amount_paid == d("10")
    ));
}

#[tokio::test]
async fn finalize_rejects_empty_draft_and_repeat() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let empty = harness.draft_invoice(&[]).await;
    let result = harness.service.finalize_invoice(empty.invoice_id).await;
    assert!(matches!(result, Err(SettlementError::NoChargesToInvoice)));

    let invoice = harness.finalized_invoice(&[(ChargeType::Fixed, "10")]).await;
    let result = harness.service.finalize_invoice(invoice.invoice_id).await;
    assert!(matches!(result, Err(SettlementError::InvoiceNotDraft(_))));
}

#[tokio::test]
async fn wallets_of_other_customers_are_untouched() {
    let harness = TestHarness::new(ScriptedCardProcessor::unavailable());
    let other = settlement_service::models::Wallet::new(
        Uuid::new_v4(),
        "USD",
        d("100"),
        ChargeTypeRestriction::All,
        0,
        common::test_now(),
    );
    harness.store.insert_wallet(other.clone()).await;
    let invoice = harness.finalized_invoice(&[(ChargeType::Usage, "50")]).await;

    let outcome = harness.service.attempt_payment(invoice.invoice_id).await.unwrap();

    assert!(outcome.wallet_payments.is_empty());
    assert_eq!(harness.balance(other.wallet_id).await, d("100"));
}
