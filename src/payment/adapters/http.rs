//! HTTP collaborators (reqwest)
//!
//! Status mapping: 404 → NotFound, 409 → Conflict, 422 → InsufficientFunds,
//! client timeout → Timeout, anything else → Unavailable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::payment::clients::{
    AccountLedgerClient, AccountSnapshot, AdjustReceipt, AdjustRequest, AdjustmentRef,
    AuditEntry, AuditLogger, Customer, CustomerDirectoryClient, EventPublisher, PaymentEvent,
    RemoteError,
};
use crate::payment::types::{AccountId, CustomerId};

/// Shared client + base URL
#[derive(Clone)]
struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(classify_send_error)?;
        decode(check_status(resp).await?).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, RemoteError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(classify_send_error)?;
        check_status(resp).await
    }
}

fn classify_send_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Unavailable(e.to_string())
    }
}

async fn check_status(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(map_status(status, body))
}

fn map_status(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        StatusCode::CONFLICT => RemoteError::Conflict(body),
        StatusCode::UNPROCESSABLE_ENTITY => RemoteError::InsufficientFunds,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout,
        other => RemoteError::Unavailable(format!("{}: {}", other, body)),
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    resp.json()
        .await
        .map_err(|e| RemoteError::Unavailable(format!("malformed response: {}", e)))
}

pub struct HttpCustomerDirectory {
    transport: HttpTransport,
}

impl HttpCustomerDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl CustomerDirectoryClient for HttpCustomerDirectory {
    async fn get_customer(&self, id: CustomerId) -> Result<Customer, RemoteError> {
        self.transport.get_json(&format!("/customers/{}", id)).await
    }
}

pub struct HttpAccountLedger {
    transport: HttpTransport,
}

impl HttpAccountLedger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl AccountLedgerClient for HttpAccountLedger {
    async fn get_account(&self, id: AccountId) -> Result<AccountSnapshot, RemoteError> {
        self.transport.get_json(&format!("/accounts/{}", id)).await
    }

    async fn conditional_adjust(&self, req: AdjustRequest) -> Result<AdjustReceipt, RemoteError> {
        debug!(reference = %req.reference, delta = req.delta, "POST ledger adjust");
        let resp = self
            .transport
            .post_json(&format!("/accounts/{}/adjust", req.account_id), &req)
            .await?;
        decode(resp).await
    }

    /// 404 on the adjustment resource means "not applied"
    async fn find_adjustment(
        &self,
        account_id: AccountId,
        reference: AdjustmentRef,
    ) -> Result<Option<AdjustReceipt>, RemoteError> {
        let path = format!("/accounts/{}/adjustments/{}", account_id, reference);
        match self.transport.get_json(&path).await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub struct HttpAuditLogger {
    transport: HttpTransport,
}

impl HttpAuditLogger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl AuditLogger for HttpAuditLogger {
    async fn log(&self, entry: AuditEntry) -> Result<(), RemoteError> {
        self.transport.post_json("/audit-logs", &entry).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    topic: &'a str,
    event: &'a PaymentEvent,
}

/// Publishes events to a webhook endpoint
pub struct HttpEventPublisher {
    transport: HttpTransport,
}

impl HttpEventPublisher {
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            transport: HttpTransport::new(webhook_url, timeout)?,
        })
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, topic: &str, event: PaymentEvent) -> Result<(), RemoteError> {
        self.transport
            .post_json("", &EventEnvelope { topic, event: &event })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "x".into()),
            RemoteError::NotFound(_)
        ));
        assert!(matches!(
            map_status(StatusCode::CONFLICT, "v".into()),
            RemoteError::Conflict(_)
        ));
        assert_eq!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            RemoteError::InsufficientFunds
        );
        assert_eq!(
            map_status(StatusCode::GATEWAY_TIMEOUT, String::new()),
            RemoteError::Timeout
        );
        assert!(matches!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            RemoteError::Unavailable(_)
        ));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let transport = HttpTransport::new("http://ledger:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url("/accounts/1"), "http://ledger:8080/accounts/1");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let directory =
            HttpCustomerDirectory::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let result = directory.get_customer(1).await;
        assert!(matches!(
            result,
            Err(RemoteError::Unavailable(_)) | Err(RemoteError::Timeout)
        ));
    }
}
