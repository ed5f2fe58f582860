//! Reconciliation Scheduler (C11): cluster-safe periodic drift detector and repair path
//! (spec.md §4.10). Single-flight within a process and leader-elected across the cluster via a
//! Postgres advisory lock; repair always flows back through the ledger, never a direct
//! projection mutation.

use crate::authority::ActorKind;
use crate::envelope::Envelope;
use crate::error::CoreError;
use crate::lifecycle::derive_lifecycle;
use crate::projections::ProjectionStore;
use crate::storage::{AppendInput, LedgerAuthority};
use crate::types::EventType;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The well-known 64-bit advisory lock constant for this scheduler. Must not collide with any
/// other scheduler sharing the database.
pub const ADVISORY_LOCK_KEY: i64 = 987_654_321;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub initial_delay_ms: u64,
    pub run_immediately: bool,
    pub per_tenant_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 86_400_000,
            initial_delay_ms: 0,
            run_immediately: false,
            per_tenant_delay_ms: 100,
        }
    }
}

/// Process-local single-flight guard plus the `running` flag observed between tenants.
pub struct ReconciliationScheduler {
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
}

impl ReconciliationScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drives the periodic loop. Intended to be spawned as a long-lived tokio task by the
    /// service composition root; returns once `stop()` is observed.
    pub async fn run(
        &self,
        projections: Arc<ProjectionStore>,
        ledger: Arc<tokio::sync::Mutex<LedgerAuthority>>,
        lock_pool: PgPool,
    ) {
        if !self.config.enabled {
            tracing::info!("lifecycle reconciliation scheduler disabled");
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        if self.config.initial_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.initial_delay_ms)).await;
        }

        if self.config.run_immediately {
            self.run_once(&projections, &ledger, &lock_pool).await;
        }

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        interval.tick().await; // first tick fires immediately; already handled above.

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.run_once(&projections, &ledger, &lock_pool).await;
        }
    }

    async fn run_once(
        &self,
        projections: &Arc<ProjectionStore>,
        ledger: &Arc<tokio::sync::Mutex<LedgerAuthority>>,
        lock_pool: &PgPool,
    ) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("reconciliation already in flight, skipping");
            return;
        }

        let acquired: (bool,) = match sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(ADVISORY_LOCK_KEY)
            .fetch_one(lock_pool)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(error = %e, "advisory lock acquisition failed");
                self.in_flight.store(false, Ordering::SeqCst);
                return;
            }
        };

        if !acquired.0 {
            tracing::debug!("advisory lock not acquired, another instance is leading");
            self.in_flight.store(false, Ordering::SeqCst);
            return;
        }

        let result = self.sweep(projections, ledger).await;
        if let Err(e) = result {
            tracing::error!(error = %e, "reconciliation sweep failed");
        }

        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(ADVISORY_LOCK_KEY)
            .execute(lock_pool)
            .await
        {
            tracing::error!(error = %e, "failed to release advisory lock");
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn sweep(
        &self,
        projections: &Arc<ProjectionStore>,
        ledger: &Arc<tokio::sync::Mutex<LedgerAuthority>>,
    ) -> Result<(), CoreError> {
        let tenants = projections.all_tenant_ids().await?;
        for tenant_id in tenants {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = run_tenant(projections, ledger, &tenant_id).await {
                tracing::error!(tenant_id = %tenant_id, error = %e, "tenant reconciliation failed");
            }
            if self.config.per_tenant_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.per_tenant_delay_ms)).await;
            }
        }
        Ok(())
    }
}

/// `TenantLifecycleReconciliationJob.run(tenantId)`: iterates the tenant's cases sequentially.
pub async fn run_tenant(
    projections: &ProjectionStore,
    ledger: &Arc<tokio::sync::Mutex<LedgerAuthority>>,
    tenant_id: &Uuid,
) -> Result<(), CoreError> {
    let case_ids = projections.all_case_ids_for_tenant(tenant_id).await?;
    for case_id in case_ids {
        if let Err(e) = reconcile_case(projections, ledger, tenant_id, &case_id).await {
            tracing::error!(case_id = %case_id, error = %e, "case reconciliation failed");
        }
    }
    Ok(())
}

/// Per-case reconciliation (`LifecycleReconciliationService`): compare stored projection
/// against the ledger-derived value; repair via a `LIFECYCLE_REPAIRED` ledger commit rather
/// than a direct projection mutation, applying the projection update in the same transaction.
async fn reconcile_case(
    projections: &ProjectionStore,
    ledger: &Arc<tokio::sync::Mutex<LedgerAuthority>>,
    tenant_id: &Uuid,
    case_id: &Uuid,
) -> Result<(), CoreError> {
    let mut guard = ledger.lock().await;
    let mut tx = projections.begin().await?;
    let case = projections.get_case(&mut tx, tenant_id, case_id).await?;

    let derived = {
        let trail = guard.get_audit_trail(case_id);
        derive_lifecycle(&trail)
    };

    if derived == case.lifecycle {
        tx.rollback().await.ok();
        return Ok(());
    }

    let envelope = Envelope::v1(
        "CASE_LIFECYCLE",
        "REPAIRED",
        json!({"from": case.lifecycle.as_str(), "to": derived.as_str()}),
    );

    guard
        .append_entry(
            AppendInput {
                tenant_id: *tenant_id,
                case_id: Some(*case_id),
                event_type: EventType::LifecycleRepaired,
                actor_kind: ActorKind::System,
                actor_user_id: None,
                authority_proof: "RECONCILIATION_JOB".to_string(),
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;
    projections
        .update_case_lifecycle(&mut tx, case_id, derived, Utc::now())
        .await?;
    tx.commit().await?;

    tracing::warn!(
        case_id = %case_id,
        from = case.lifecycle.as_str(),
        to = derived.as_str(),
        "lifecycle drift repaired"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_daily_interval() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval_ms, 86_400_000);
        assert_eq!(config.per_tenant_delay_ms, 100);
        assert!(config.enabled);
    }

    #[test]
    fn stop_flips_running_flag() {
        let scheduler = ReconciliationScheduler::new(SchedulerConfig::default());
        scheduler.running.store(true, Ordering::SeqCst);
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
