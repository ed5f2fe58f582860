//! Read Query Surface (C12): explainability operations (spec.md §4.11). No side effects — drift
//! is reported here, never repaired; repair is reconciliation's job (`reconciliation`).

use crate::lifecycle::derive_lifecycle;
use crate::projections::ProjectionStore;
use crate::storage::LedgerAuthority;
use crate::types::{CaseLifecycle, Decision, LedgerCommit, RoutingCounterfactual};
use serde::Serialize;
use uuid::Uuid;
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleExplanation {
    pub stored_lifecycle: CaseLifecycle,
    pub ledger_derived_lifecycle: CaseLifecycle,
    pub drift: bool,
    pub caused_by_decision: Option<Uuid>,
}

pub async fn get_authoritative_decision(
    projections: &ProjectionStore,
    tenant_id: &Uuid,
    case_id: &Uuid,
    decision_type: &str,
) -> Result<Option<Decision>, CoreError> {
    projections
        .latest_authoritative_decision(tenant_id, case_id, decision_type)
        .await
}

pub async fn get_decision_chain(
    projections: &ProjectionStore,
    tenant_id: &Uuid,
    case_id: &Uuid,
    decision_type: &str,
) -> Result<Vec<Decision>, CoreError> {
    projections.decision_chain(tenant_id, case_id, decision_type).await
}

/// Replays the ledger ascending, runs the deriver, and compares against the stored projection.
pub async fn explain_lifecycle(
    projections: &ProjectionStore,
    ledger: &LedgerAuthority,
    tenant_id: &Uuid,
    case_id: &Uuid,
) -> Result<LifecycleExplanation, CoreError> {
    let mut tx = projections.begin().await?;
    let case = projections.get_case(&mut tx, tenant_id, case_id).await?;
    tx.rollback().await.ok();

    let trail = ledger.get_audit_trail(case_id);
    let derived = derive_lifecycle(&trail);

    Ok(LifecycleExplanation {
        stored_lifecycle: case.lifecycle,
        ledger_derived_lifecycle: derived,
        drift: case.lifecycle != derived,
        caused_by_decision: None,
    })
}

/// `getLedgerTrail`: stable `ts` order.
pub fn get_ledger_trail<'a>(ledger: &'a LedgerAuthority, case_id: &Uuid) -> Vec<&'a LedgerCommit> {
    ledger.get_audit_trail(case_id)
}

/// `getRoutingCounterfactual`: no teacher/pack precedent; this always returns `None` until a
/// routing simulation engine exists to populate it. The read contract (an optional, read-only
/// artifact) is still exposed so callers don't need to special-case its absence.
pub async fn get_routing_counterfactual(
    _case_id: &Uuid,
) -> Result<Option<RoutingCounterfactual>, CoreError> {
    Ok(None)
}
