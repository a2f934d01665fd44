//! HTTP handlers

pub mod health;
pub mod payment;

pub use health::{HealthResponse, health_check};
pub use payment::{create_transfer, get_payment};
