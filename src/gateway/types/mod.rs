//! Gateway types module
//!
//! - [`TransferApiRequest`]: transfer request body
//! - [`ApiResponse<T>`]: Unified API response wrapper
//! - [`ApiError`] / [`ApiResult`]: handler error path

pub mod payment;
pub mod response;

pub use payment::TransferApiRequest;
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};
