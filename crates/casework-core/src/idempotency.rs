//! Idempotency Store (C14): durable request de-duplication for command endpoints
//! (spec.md §4.13). Keyed by `(tenantId, key)`; TTL is a deployment knob enforced by a
//! background sweep rather than at read time, so a replayed request inside the window always
//! gets back byte-identical bytes.

use crate::canonical::canonical_hash;
use crate::error::CoreError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub struct IdempotencyStore {
    pool: PgPool,
}

impl IdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_records (
                tenant_id UUID NOT NULL,
                key TEXT NOT NULL,
                response_hash TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tenant_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the previously stored response if `(tenant_id, key)` was already completed.
    pub async fn lookup(&self, tenant_id: &Uuid, key: &str) -> Result<Option<Value>, CoreError> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT payload FROM idempotency_records WHERE tenant_id = $1 AND key = $2")
                .bind(tenant_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(payload,)| payload))
    }

    /// Persist the first-completion response. A concurrent duplicate insert under a race loses
    /// to whichever commits first; the loser's caller should re-`lookup` rather than error.
    pub async fn record<T: Serialize>(
        &self,
        tenant_id: &Uuid,
        key: &str,
        response: &T,
    ) -> Result<(), CoreError> {
        let payload = serde_json::to_value(response)?;
        let response_hash = canonical_hash(response)?;
        sqlx::query(
            r#"
            INSERT INTO idempotency_records (tenant_id, key, response_hash, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, key) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .bind(response_hash)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes records older than `ttl`. A deployment knob (default ≥24h); invoked by the same
    /// reconciliation scheduler cadence as the lifecycle sweep.
    pub async fn sweep_expired(&self, ttl: Duration) -> Result<u64, CoreError> {
        let cutoff: DateTime<Utc> = Utc::now() - ttl;
        let result = sqlx::query("DELETE FROM idempotency_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
