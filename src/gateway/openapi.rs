//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::TransferApiRequest;
use crate::payment::{
    AccountRef, Failure, FailureKind, Payment, PaymentStatsSnapshot, PaymentStatus, SagaStage,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Payment Saga API",
        version = "1.0.0",
        description = "Idempotent money transfers between customers of an external account ledger.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::payment::create_transfer,
        crate::gateway::handlers::payment::get_payment,
    ),
    components(
        schemas(
            HealthResponse,
            PaymentStatsSnapshot,
            TransferApiRequest,
            Payment,
            AccountRef,
            PaymentStatus,
            SagaStage,
            Failure,
            FailureKind,
        )
    ),
    tags(
        (name = "Payments", description = "Transfers and payment records"),
        (name = "System", description = "Health checks and counters")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Payment Saga API");
        assert!(spec.to_json().is_ok());
    }

    #[test]
    fn test_endpoints_registered() {
        let paths = ApiDoc::openapi().paths.paths;
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/payments/transfer"));
        assert!(paths.contains_key("/payments/{payment_id}"));
    }

    #[test]
    fn test_transfer_operation_documents_error_statuses() {
        let paths = ApiDoc::openapi().paths.paths;
        let transfer = paths["/payments/transfer"]
            .post
            .as_ref()
            .expect("transfer should be a POST operation");
        for status in ["200", "400", "409", "422", "503"] {
            assert!(transfer.responses.responses.contains_key(status), "missing {}", status);
        }
        assert!(paths["/payments/{payment_id}"].get.is_some());
        assert!(paths["/health"].get.is_some());
    }

    #[test]
    fn test_schemas_registered() {
        let components = ApiDoc::openapi().components.expect("should have components");
        assert!(components.schemas.contains_key("Payment"));
        assert!(components.schemas.contains_key("FailureKind"));
    }
}
