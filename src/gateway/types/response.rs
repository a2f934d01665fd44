//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError` / `ApiResult`: handler error path
//! - `error_codes`: Standard error code constants

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::payment::{FailureKind, PaymentError};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

// ============================================================================
// Error Path
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::PAYMENT_NOT_FOUND, msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match &e {
            PaymentError::InvalidRequest(_) => error_codes::INVALID_PARAMETER,
            PaymentError::InsufficientFunds { .. } => error_codes::INSUFFICIENT_BALANCE,
            PaymentError::IdempotencyKeyReused(_) => error_codes::IDEMPOTENCY_CONFLICT,
            PaymentError::PaymentNotFound(_) => error_codes::PAYMENT_NOT_FOUND,
            PaymentError::Storage(_) => error_codes::INTERNAL_ERROR,
            PaymentError::PaymentFailed { cause, .. } => match cause {
                FailureKind::InvalidRequest => error_codes::INVALID_PARAMETER,
                FailureKind::NotFound => error_codes::PARTICIPANT_NOT_FOUND,
                FailureKind::InsufficientFunds => error_codes::INSUFFICIENT_BALANCE,
                FailureKind::ConflictOrRace => error_codes::CONFLICT_OR_RACE,
                FailureKind::RemoteUnavailable => error_codes::SERVICE_UNAVAILABLE,
                FailureKind::ReconciliationRequired => error_codes::RECONCILIATION_REQUIRED,
            },
        };
        // Failed payments exist; the caller needs the id to look them up
        let msg = match e.payment_id() {
            Some(id) => format!("{}: {} (payment_id={})", e.code(), e, id),
            None => format!("{}: {}", e.code(), e),
        };
        Self::new(status, code, msg)
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const IDEMPOTENCY_CONFLICT: i32 = 1003;

    // Resource errors (4xxx)
    pub const PARTICIPANT_NOT_FOUND: i32 = 4001;
    pub const PAYMENT_NOT_FOUND: i32 = 4004;
    pub const CONFLICT_OR_RACE: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const RECONCILIATION_REQUIRED: i32 = 5002;
}
