//! Payment handlers (saga entry point and record lookup)

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, TransferApiRequest, ok};
use crate::payment::{Payment, PaymentId};

/// Transfer money between two customers
///
/// POST /payments/transfer
///
/// Replaying an idempotency key returns the stored outcome of the first call.
#[utoipa::path(
    post,
    path = "/payments/transfer",
    request_body = TransferApiRequest,
    responses(
        (status = 200, description = "Transfer completed", body = Payment, content_type = "application/json"),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown participant"),
        (status = 409, description = "Idempotency key reused or concurrent update"),
        (status = 422, description = "Insufficient funds"),
        (status = 500, description = "Manual reconciliation required"),
        (status = 503, description = "Remote service unavailable")
    ),
    tag = "Payments"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TransferApiRequest>, JsonRejection>,
) -> ApiResult<Payment> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    tracing::info!(
        sender_id = req.sender_id,
        receiver_id = req.receiver_id,
        amount = req.amount,
        key = %req.idempotency_key,
        "Transfer request"
    );

    match state.orchestrator.transfer(req.into()).await {
        Ok(payment) => ok(payment),
        Err(e) => {
            tracing::warn!(code = e.code(), error = %e, "Transfer rejected");
            ApiError::from(e).into_err()
        }
    }
}

/// Get a payment record
///
/// GET /payments/{payment_id}
#[utoipa::path(
    get,
    path = "/payments/{payment_id}",
    params(
        ("payment_id" = String, Path, description = "Payment ID (ULID)")
    ),
    responses(
        (status = 200, description = "Payment record", body = Payment, content_type = "application/json"),
        (status = 400, description = "Malformed payment ID"),
        (status = 404, description = "Payment not found")
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
) -> ApiResult<Payment> {
    let id: PaymentId = payment_id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid payment_id: {}", payment_id)))?;

    match state.orchestrator.get(id).await {
        Ok(payment) => ok(payment),
        Err(e) => ApiError::from(e).into_err(),
    }
}
