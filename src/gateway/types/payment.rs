use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::payment::TransferRequest;

/// POST /payments/transfer body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferApiRequest {
    #[schema(example = 1)]
    pub sender_id: u64,
    #[schema(example = 2)]
    pub receiver_id: u64,
    /// Minor units; must be positive
    #[schema(example = 2500)]
    pub amount: i64,
    #[schema(example = "order-4711")]
    pub idempotency_key: String,
}

impl From<TransferApiRequest> for TransferRequest {
    fn from(req: TransferApiRequest) -> Self {
        TransferRequest::new(req.sender_id, req.receiver_id, req.amount, req.idempotency_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_amount_deserializes() {
        // Rejection of non-positive amounts belongs to the orchestrator
        let req: TransferApiRequest = serde_json::from_str(
            r#"{"sender_id":1,"receiver_id":2,"amount":-5,"idempotency_key":"k"}"#,
        )
        .unwrap();
        let req: TransferRequest = req.into();
        assert_eq!(req.amount, -5);
        assert_eq!(req.idempotency_key, "k");
    }

    #[test]
    fn test_missing_field_rejected() {
        let res: Result<TransferApiRequest, _> =
            serde_json::from_str(r#"{"sender_id":1,"receiver_id":2,"amount":5}"#);
        assert!(res.is_err());
    }
}
