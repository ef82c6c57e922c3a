use crate::models::CreateDraftInvoice;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(input): Json<CreateDraftInvoice>,
) -> Result<impl IntoResponse, AppError> {
    input.validate()?;
    let invoice = state.settlement.create_draft_invoice(input).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state.settlement.get_invoice(invoice_id).await?;
    Ok(Json(invoice))
}

pub async fn finalize_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state.settlement.finalize_invoice(invoice_id).await?;
    Ok(Json(invoice))
}

pub async fn void_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state.settlement.void_invoice(invoice_id).await?;
    Ok(Json(invoice))
}

/// Runs one payment attempt. An unsettled attempt is still a 200; the body
/// carries the payment status.
pub async fn attempt_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.settlement.attempt_payment(invoice_id).await?;
    Ok(Json(outcome))
}
