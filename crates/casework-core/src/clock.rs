//! Global monotonic logical clock and id validation (C1).

use crate::error::CoreError;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Allocates strictly increasing `ts` values.
///
/// `Memory` backs local/test usage; `Postgres` draws from the shared `ledger_global_seq`
/// sequence so `ts` is comparable across every instance in the cluster, per spec invariant 2.
#[derive(Clone)]
pub enum LogicalClock {
    Memory(Arc<AtomicI64>),
    Postgres(sqlx::PgPool),
}

impl LogicalClock {
    pub fn in_memory() -> Self {
        LogicalClock::Memory(Arc::new(AtomicI64::new(0)))
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        LogicalClock::Postgres(pool)
    }

    /// Allocate the next `ts`. Fails only if the database is unavailable.
    pub async fn next_ts(&self) -> Result<i64, CoreError> {
        match self {
            LogicalClock::Memory(counter) => Ok(counter.fetch_add(1, Ordering::SeqCst) + 1),
            LogicalClock::Postgres(pool) => {
                let row: (i64,) = sqlx::query_as("SELECT nextval('ledger_global_seq')")
                    .fetch_one(pool)
                    .await
                    .map_err(|e| CoreError::ClockUnavailable(e.to_string()))?;
                Ok(row.0)
            }
        }
    }

    pub async fn ensure_schema(pool: &sqlx::PgPool) -> Result<(), CoreError> {
        sqlx::query("CREATE SEQUENCE IF NOT EXISTS ledger_global_seq START 1")
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Validates the canonical hex pattern for entity identity; versions 1 through 5 are acceptable.
pub fn validate_uuid(raw: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(raw).map_err(|e| CoreError::Validation(format!("invalid uuid '{raw}': {e}")))
}

pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_clock_is_strictly_increasing() {
        let clock = LogicalClock::in_memory();
        let a = clock.next_ts().await.unwrap();
        let b = clock.next_ts().await.unwrap();
        let c = clock.next_ts().await.unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn rejects_malformed_uuid() {
        assert!(validate_uuid("not-a-uuid").is_err());
        assert!(validate_uuid(&Uuid::new_v4().to_string()).is_ok());
    }
}
