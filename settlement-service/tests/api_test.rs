mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::{d, period_start, test_now, ScriptedCardProcessor, TestHarness, TEST_CURRENCY};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use settlement_service::models::{ChargeType, ChargeTypeRestriction, Price, PriceTier, TierMode};
use tower::util::ServiceExt;
use uuid::Uuid;

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn money(value: &Value) -> Decimal {
    value.as_str().expect("decimal string").parse().unwrap()
}

#[tokio::test]
async fn invoice_flow_over_http() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let router = harness.router();
    let wallet = harness.add_wallet("30", ChargeTypeRestriction::All, 0).await;
    let usage = harness
        .add_price(Price::tiered(
            TEST_CURRENCY,
            TierMode::Slab,
            vec![
                PriceTier::bounded(d("1000"), d("0.02")),
                PriceTier::bounded(d("5000"), d("0.005")),
                PriceTier::unbounded(d("0.01")),
            ],
        ))
        .await;
    let platform = harness
        .add_price(Price::flat_fee(ChargeType::Fixed, TEST_CURRENCY, d("20")))
        .await;

    let (status, created) = send(
        &router,
        Method::POST,
        "/invoices",
        Some(json!({
            "customer_id": harness.customer_id,
            "currency": "usd",
            "period_start": period_start(),
            "period_end": test_now(),
            "charges": [
                { "price_id": platform.price_id },
                { "price_id": usage.price_id, "quantity": "1500" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["invoice_status"], "draft");
    assert_eq!(created["currency"], "USD");
    assert_eq!(money(&created["amount_due"]), d("42.50"));

    let id = created["invoice_id"].as_str().unwrap().to_string();

    let (status, finalized) = send(&router, Method::POST, &format!("/invoices/{id}/finalize"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finalized["invoice_status"], "finalized");
    assert_eq!(finalized["payment_status"], "pending");

    let (status, outcome) = send(&router, Method::POST, &format!("/invoices/{id}/payments"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["payment_status"], "succeeded");
    assert_eq!(outcome["succeeded"], true);
    assert_eq!(money(&outcome["card_amount"]), d("12.50"));
    assert_eq!(outcome["card"]["status"], "charged");
    assert_eq!(harness.balance(wallet.wallet_id).await, Decimal::ZERO);

    let (status, fetched) = send(&router, Method::GET, &format!("/invoices/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&fetched["amount_remaining"]), Decimal::ZERO);

    let (status, _) = send(&router, Method::POST, &format!("/invoices/{id}/payments"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn settlement_errors_map_to_status_codes() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let router = harness.router();

    let (status, _) = send(&router, Method::GET, &format!("/invoices/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        Method::POST,
        "/invoices",
        Some(json!({
            "customer_id": harness.customer_id,
            "currency": "DOLLARS",
            "period_start": period_start(),
            "charges": [{ "price_id": Uuid::new_v4() }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let draft = harness.draft_invoice(&[]).await;
    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/invoices/{}/finalize", draft.invoice_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no charges"));
}

#[tokio::test]
async fn readiness_reports_unreachable_database() {
    let harness = TestHarness::new(ScriptedCardProcessor::approving());
    let router = harness.router();

    let (status, _) = send(&router, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}
