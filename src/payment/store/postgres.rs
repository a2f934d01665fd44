//! PostgreSQL payment store
//!
//! All state updates are atomic CAS statements (`WHERE status = $from`).
//! The unique index on `idempotency_key` serializes concurrent creates.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{PaymentRecordStore, StoreError};
use crate::payment::error::{Failure, FailureKind};
use crate::payment::state::{PaymentStatus, SagaStage};
use crate::payment::types::{AccountRef, IdempotencyKey, Payment, PaymentId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS payments_tb (
    id                       BIGSERIAL PRIMARY KEY,
    payment_id               VARCHAR(26)  NOT NULL UNIQUE,
    idempotency_key          VARCHAR(128) NOT NULL UNIQUE,
    sender_customer_id       BIGINT       NOT NULL,
    sender_account_id        BIGINT       NOT NULL,
    sender_name              TEXT         NOT NULL,
    sender_account_number    TEXT         NOT NULL,
    sender_email             TEXT         NOT NULL,
    receiver_customer_id     BIGINT       NOT NULL,
    receiver_account_id      BIGINT       NOT NULL,
    receiver_name            TEXT         NOT NULL,
    receiver_account_number  TEXT         NOT NULL,
    receiver_email           TEXT         NOT NULL,
    amount                   BIGINT       NOT NULL CHECK (amount > 0),
    status                   SMALLINT     NOT NULL,
    stage                    SMALLINT     NOT NULL,
    failure_kind             VARCHAR(32),
    failure_detail           TEXT,
    created_at               TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
    updated_at               TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
    finalized_at             TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS payments_tb_pending_idx
    ON payments_tb (updated_at) WHERE status = 0;
"#;

const COLUMNS: &str = r#"
    payment_id, idempotency_key,
    sender_customer_id, sender_account_id, sender_name, sender_account_number, sender_email,
    receiver_customer_id, receiver_account_id, receiver_name, receiver_account_number, receiver_email,
    amount, status, stage, failure_kind, failure_detail, created_at, updated_at, finalized_at
"#;

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the payments table if it does not exist
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_by_id(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let sql = format!("SELECT {} FROM payments_tb WHERE payment_id = $1", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    /// Explain why a CAS statement matched no row
    async fn cas_miss(&self, id: PaymentId, expected: String) -> StoreError {
        match self.fetch_by_id(id).await {
            Ok(Some(current)) => StoreError::InvalidTransition(format!(
                "payment {} is {}/{}, expected {}",
                id, current.status, current.stage, expected
            )),
            Ok(None) => StoreError::NotFound(id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl PaymentRecordStore for PgPaymentStore {
    async fn create(&self, payment: Payment) -> Result<Payment, StoreError> {
        let amount = i64::try_from(payment.amount)
            .map_err(|_| StoreError::Corrupt(format!("amount {} overflows i64", payment.amount)))?;

        let sql = format!(
            r#"
            INSERT INTO payments_tb ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NULL, NULL, $16, $16, NULL)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {}
            "#,
            COLUMNS, COLUMNS
        );
        let inserted = sqlx::query(&sql)
            .bind(payment.payment_id.to_string())
            .bind(payment.idempotency_key.as_str())
            .bind(payment.sender.customer_id as i64)
            .bind(payment.sender.account_id as i64)
            .bind(&payment.sender.name)
            .bind(&payment.sender.account_number)
            .bind(&payment.sender.email)
            .bind(payment.receiver.customer_id as i64)
            .bind(payment.receiver.account_id as i64)
            .bind(&payment.receiver.name)
            .bind(&payment.receiver.account_number)
            .bind(&payment.receiver.email)
            .bind(amount)
            .bind(payment.status.id())
            .bind(payment.stage.id())
            .bind(payment.created_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            tracing::info!(payment_id = %payment.payment_id, "Payment created");
            return row_to_payment(&row);
        }

        // Key already taken: idempotent unless the amount differs
        let existing = self
            .get_by_idempotency_key(&payment.idempotency_key)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "key {} conflicted but no row found",
                    payment.idempotency_key
                ))
            })?;
        if existing.amount != payment.amount {
            return Err(StoreError::IdempotencyConflict(
                payment.idempotency_key.to_string(),
            ));
        }
        tracing::info!(
            payment_id = %existing.payment_id,
            key = %payment.idempotency_key,
            "Idempotency key exists - returning prior record"
        );
        Ok(existing)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        self.fetch_by_id(id).await
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM payments_tb WHERE idempotency_key = $1",
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn advance_stage(
        &self,
        id: PaymentId,
        from: SagaStage,
        to: SagaStage,
        failure: Option<Failure>,
    ) -> Result<Payment, StoreError> {
        if !from.can_advance_to(to) {
            return Err(StoreError::InvalidTransition(format!(
                "payment {}: stage {} -> {} not allowed",
                id, from, to
            )));
        }

        let sql = format!(
            r#"
            UPDATE payments_tb
            SET stage = $1,
                failure_kind = COALESCE($2, failure_kind),
                failure_detail = COALESCE($3, failure_detail),
                updated_at = NOW()
            WHERE payment_id = $4 AND status = $5 AND stage = $6
            RETURNING {}
            "#,
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(to.id())
            .bind(failure.as_ref().map(|f| f.kind.as_str()))
            .bind(failure.as_ref().map(|f| f.detail.as_str()))
            .bind(id.to_string())
            .bind(PaymentStatus::Pending.id())
            .bind(from.id())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_payment(&row),
            None => Err(self.cas_miss(id, format!("{}/{}", PaymentStatus::Pending, from)).await),
        }
    }

    async fn update_status(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        failure: Option<Failure>,
    ) -> Result<Payment, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition(format!(
                "payment {}: {} -> {} not allowed",
                id, from, to
            )));
        }

        let sql = format!(
            r#"
            UPDATE payments_tb
            SET status = $1,
                failure_kind = COALESCE($2, failure_kind),
                failure_detail = COALESCE($3, failure_detail),
                updated_at = NOW(),
                finalized_at = NOW()
            WHERE payment_id = $4 AND status = $5
            RETURNING {}
            "#,
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(to.id())
            .bind(failure.as_ref().map(|f| f.kind.as_str()))
            .bind(failure.as_ref().map(|f| f.detail.as_str()))
            .bind(id.to_string())
            .bind(from.id())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_payment(&row),
            None => Err(self.cas_miss(id, from.to_string()).await),
        }
    }

    async fn claim_stale(
        &self,
        id: PaymentId,
        older_than: Duration,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            r#"
            UPDATE payments_tb
            SET updated_at = NOW()
            WHERE payment_id = $1
              AND status = $2
              AND updated_at <= NOW() - INTERVAL '1 millisecond' * $3
            RETURNING {}
            "#,
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(PaymentStatus::Pending.id())
            .bind(older_than.as_millis() as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_payment(&row).map(Some),
            None => match self.fetch_by_id(id).await? {
                Some(_) => Ok(None),
                None => Err(StoreError::NotFound(id.to_string())),
            },
        }
    }

    async fn touch(&self, id: PaymentId, stage: SagaStage) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments_tb
            SET updated_at = NOW()
            WHERE payment_id = $1 AND status = $2 AND stage = $3
            "#,
        )
        .bind(id.to_string())
        .bind(PaymentStatus::Pending.id())
        .bind(stage.id())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.fetch_by_id(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Payment>, StoreError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM payments_tb
            WHERE status = $1
              AND updated_at <= NOW() - INTERVAL '1 millisecond' * $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(PaymentStatus::Pending.id())
            .bind(older_than.as_millis() as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_payment).collect()
    }
}

/// Convert a database row to a Payment
fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment, StoreError> {
    let payment_id_str: String = row.try_get("payment_id")?;
    let payment_id: PaymentId = payment_id_str
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("invalid payment_id {}", payment_id_str)))?;

    let key_str: String = row.try_get("idempotency_key")?;
    let idempotency_key = IdempotencyKey::parse(&key_str).map_err(StoreError::Corrupt)?;

    let status_id: i16 = row.try_get("status")?;
    let status = PaymentStatus::from_id(status_id)
        .ok_or_else(|| StoreError::Corrupt(format!("invalid status id {}", status_id)))?;

    let stage_id: i16 = row.try_get("stage")?;
    let stage = SagaStage::from_id(stage_id)
        .ok_or_else(|| StoreError::Corrupt(format!("invalid stage id {}", stage_id)))?;

    let failure_kind: Option<String> = row.try_get("failure_kind")?;
    let failure = match failure_kind {
        Some(kind) => {
            let kind = FailureKind::parse(&kind)
                .ok_or_else(|| StoreError::Corrupt(format!("invalid failure kind {}", kind)))?;
            let detail: Option<String> = row.try_get("failure_detail")?;
            Some(Failure::new(kind, detail.unwrap_or_default()))
        }
        None => None,
    };

    let amount: i64 = row.try_get("amount")?;

    Ok(Payment {
        payment_id,
        idempotency_key,
        sender: account_ref(row, "sender")?,
        receiver: account_ref(row, "receiver")?,
        amount: amount as u64,
        status,
        stage,
        failure,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        finalized_at: row.try_get("finalized_at")?,
    })
}

fn account_ref(row: &sqlx::postgres::PgRow, prefix: &str) -> Result<AccountRef, StoreError> {
    let col = |name: &str| format!("{}_{}", prefix, name);
    Ok(AccountRef {
        customer_id: row.try_get::<i64, _>(col("customer_id").as_str())? as u64,
        account_id: row.try_get::<i64, _>(col("account_id").as_str())? as u64,
        name: row.try_get(col("name").as_str())?,
        account_number: row.try_get(col("account_number").as_str())?,
        email: row.try_get(col("email").as_str())?,
    })
}
