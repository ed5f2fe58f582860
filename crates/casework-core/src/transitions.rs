//! Lifecycle Transition Service (C9): applies an authorized lifecycle transition by committing
//! a ledger event and updating the case projection in one transaction (spec.md §4.8).

use crate::authority::ActorKind;
use crate::envelope::Envelope;
use crate::error::CoreError;
use crate::projections::ProjectionStore;
use crate::storage::{AppendInput, LedgerAuthority};
use crate::types::{
    Case, CaseLifecycle, Decision, Execution, ExecutionStatus, EventType, VerificationRecord,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

/// Only these `(from, to)` pairs are legal transitions for this service; reconciliation's
/// repair path is exempt (see `reconciliation::run_tenant`), as it re-asserts an already
/// ledger-derived value rather than applying a fresh domain decision.
const ALLOWED_TRANSITIONS: &[(CaseLifecycle, CaseLifecycle)] = &[
    (CaseLifecycle::Intaked, CaseLifecycle::Routed),
    (CaseLifecycle::Routed, CaseLifecycle::Executing),
    (CaseLifecycle::Executing, CaseLifecycle::Verified),
    (CaseLifecycle::Executing, CaseLifecycle::Flagged),
    (CaseLifecycle::Verified, CaseLifecycle::Disbursed),
    (CaseLifecycle::Verified, CaseLifecycle::Flagged),
    (CaseLifecycle::Disbursed, CaseLifecycle::Closed),
    (CaseLifecycle::Flagged, CaseLifecycle::Verified),
    (CaseLifecycle::Flagged, CaseLifecycle::Rejected),
    (CaseLifecycle::Intaked, CaseLifecycle::Rejected),
    (CaseLifecycle::Routed, CaseLifecycle::Rejected),
];

pub struct TransitionActor {
    pub kind: ActorKind,
    pub user_id: Option<Uuid>,
    pub authority_proof: String,
}

fn is_allowed(from: CaseLifecycle, to: CaseLifecycle) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to)) || to == CaseLifecycle::Archived
}

/// Instantiates a case at `INTAKED`: appends `CASE_CREATED` and inserts the projection row in
/// one transaction, mirroring the append-then-project pattern used by the transition path below.
pub async fn create_case(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    reference_code: String,
    status: String,
    actor: TransitionActor,
) -> Result<Case, CoreError> {
    let case_id = Uuid::new_v4();
    let now = Utc::now();
    let case = Case {
        case_id,
        tenant_id,
        reference_code,
        lifecycle: CaseLifecycle::Intaked,
        status,
        author_user_id: actor.user_id,
        created_at: now,
        updated_at: now,
    };

    let envelope = Envelope::v1(
        "CASE_LIFECYCLE",
        "CREATED",
        json!({"referenceCode": case.reference_code, "status": case.status}),
    );

    let mut tx = projections.begin().await?;
    let entry = ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::CaseCreated,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof,
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;
    projections.insert_case(&mut tx, &case).await?;
    tx.commit().await?;

    tracing::info!(
        case_id = %case_id,
        commit_id = %entry.id,
        "case created"
    );

    Ok(case)
}

/// `transitionCaseLifecycleWithLedger` (spec.md §4.8).
pub async fn transition_case_lifecycle_with_ledger(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    case_id: Uuid,
    target: CaseLifecycle,
    actor: TransitionActor,
) -> Result<(), CoreError> {
    let mut tx = projections.begin().await?;
    let case = projections.get_case(&mut tx, &tenant_id, &case_id).await?;

    if !is_allowed(case.lifecycle, target) {
        return Err(CoreError::IllegalLifecycleTransition {
            from: case.lifecycle.as_str().to_string(),
            to: target.as_str().to_string(),
        });
    }

    let envelope = Envelope::v1(
        "CASE_LIFECYCLE",
        "TRANSITION",
        json!({"from": case.lifecycle.as_str(), "to": target.as_str()}),
    );

    let entry = ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::CaseUpdated,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof,
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    projections
        .update_case_lifecycle(&mut tx, &case_id, target, Utc::now())
        .await?;
    tx.commit().await?;

    tracing::info!(
        case_id = %case_id,
        from = case.lifecycle.as_str(),
        to = target.as_str(),
        commit_id = %entry.id,
        "case lifecycle transitioned"
    );

    Ok(())
}

/// Records the routing decision for a case: commits `ROUTED` (or `ROUTING_SUPERSEDED` when a
/// prior authoritative routing decision exists for this case) and writes the paired `decisions`
/// row in the same transaction as the case lifecycle update, mirroring C9's append-then-project
/// pattern generalized from case lifecycle to the routing decision projection.
pub async fn route_case(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    case_id: Uuid,
    chosen_route: String,
    reason: Option<String>,
    actor: TransitionActor,
) -> Result<Decision, CoreError> {
    const DECISION_TYPE: &str = "ROUTING";

    let mut tx = projections.begin().await?;
    let case = projections.get_case(&mut tx, &tenant_id, &case_id).await?;

    if case.lifecycle != CaseLifecycle::Intaked && case.lifecycle != CaseLifecycle::Routed {
        return Err(CoreError::IllegalLifecycleTransition {
            from: case.lifecycle.as_str().to_string(),
            to: CaseLifecycle::Routed.as_str().to_string(),
        });
    }

    let prior = projections
        .latest_authoritative_decision_locked(&mut tx, &tenant_id, &case_id, DECISION_TYPE)
        .await?;

    let now = Utc::now();
    let decision = Decision {
        id: Uuid::new_v4(),
        tenant_id,
        case_id,
        decision_type: DECISION_TYPE.to_string(),
        actor_kind: actor.kind,
        actor_user_id: actor.user_id,
        decided_at: now,
        reason,
        intent_context: None,
        superseded_at: None,
        supersedes_decision_id: prior.as_ref().map(|d| d.id),
    };

    let (event_type, event_name) = match &prior {
        Some(_) => (EventType::RoutingSuperseded, "SUPERSEDED"),
        None => (EventType::Routed, "ROUTED"),
    };
    let envelope = Envelope::v1(
        "ROUTING",
        event_name,
        json!({"chosenRoute": chosen_route, "decisionId": decision.id}),
    );

    ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof,
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    if let Some(prior) = &prior {
        projections.supersede_decision(&mut tx, &prior.id, now).await?;
    }
    projections.insert_decision(&mut tx, &decision).await?;

    if case.lifecycle == CaseLifecycle::Intaked {
        projections
            .update_case_lifecycle(&mut tx, &case_id, CaseLifecycle::Routed, now)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(case_id = %case_id, decision_id = %decision.id, "case routed");
    Ok(decision)
}

/// Starts execution: commits `EXECUTION_STARTED`, inserts the `executions` row, and advances
/// the case from `ROUTED` to `EXECUTING`, all in one transaction.
pub async fn start_execution(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    case_id: Uuid,
    actor: TransitionActor,
) -> Result<Execution, CoreError> {
    let mut tx = projections.begin().await?;
    let case = projections.get_case(&mut tx, &tenant_id, &case_id).await?;

    if case.lifecycle != CaseLifecycle::Routed {
        return Err(CoreError::IllegalLifecycleTransition {
            from: case.lifecycle.as_str().to_string(),
            to: CaseLifecycle::Executing.as_str().to_string(),
        });
    }

    let now = Utc::now();
    let execution = Execution {
        id: Uuid::new_v4(),
        tenant_id,
        case_id,
        status: ExecutionStatus::Started,
        started_at: now,
        completed_at: None,
    };

    let envelope = Envelope::v1("EXECUTION", "STARTED", json!({"executionId": execution.id}));
    ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::ExecutionStarted,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof,
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    projections.insert_execution(&mut tx, &execution).await?;
    projections
        .update_case_lifecycle(&mut tx, &case_id, CaseLifecycle::Executing, now)
        .await?;
    tx.commit().await?;

    tracing::info!(case_id = %case_id, execution_id = %execution.id, "execution started");
    Ok(execution)
}

/// Completes the case's in-flight execution: commits `EXECUTION_COMPLETED` and marks the
/// `executions` row `COMPLETED`. Per the lifecycle deriver, this alone does not advance the case
/// past `EXECUTING` — verification still has to reach consensus separately.
pub async fn complete_execution(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    case_id: Uuid,
    actor: TransitionActor,
) -> Result<Execution, CoreError> {
    let mut tx = projections.begin().await?;
    let execution = projections
        .latest_execution(&mut tx, &case_id)
        .await?
        .ok_or_else(|| CoreError::LifecycleInvariantViolation("no execution for case".into()))?;

    if execution.status != ExecutionStatus::Started && execution.status != ExecutionStatus::InProgress {
        return Err(CoreError::LifecycleInvariantViolation(format!(
            "execution {} is not in progress",
            execution.id
        )));
    }

    let now = Utc::now();
    let envelope = Envelope::v1("EXECUTION", "COMPLETED", json!({"executionId": execution.id}));
    ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::ExecutionCompleted,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof,
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    projections
        .update_execution_status(&mut tx, &execution.id, ExecutionStatus::Completed, Some(now))
        .await?;
    tx.commit().await?;

    tracing::info!(case_id = %case_id, execution_id = %execution.id, "execution completed");
    Ok(Execution {
        status: ExecutionStatus::Completed,
        completed_at: Some(now),
        ..execution
    })
}

/// Routes a case to verification: commits `VERIFICATION_STARTED` and inserts the
/// `verification_records` row. Does not itself move case lifecycle.
pub async fn start_verification(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    case_id: Uuid,
    required_verifiers: Vec<String>,
    actor: TransitionActor,
) -> Result<VerificationRecord, CoreError> {
    let mut tx = projections.begin().await?;
    let case = projections.get_case(&mut tx, &tenant_id, &case_id).await?;

    if case.lifecycle != CaseLifecycle::Executing {
        return Err(CoreError::LifecycleInvariantViolation(format!(
            "case lifecycle is {} not EXECUTING",
            case.lifecycle.as_str()
        )));
    }

    let now = Utc::now();
    let record = VerificationRecord {
        id: Uuid::new_v4(),
        tenant_id,
        case_id,
        required_verifiers,
        consensus_reached: false,
        routed_at: now,
        verified_at: None,
    };

    let envelope = Envelope::v1(
        "VERIFICATION",
        "STARTED",
        json!({"verificationRecordId": record.id, "requiredVerifiers": record.required_verifiers}),
    );
    ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::VerificationStarted,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof,
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    projections.insert_verification(&mut tx, &record).await?;
    tx.commit().await?;

    tracing::info!(case_id = %case_id, verification_record_id = %record.id, "verification started");
    Ok(record)
}

/// Submits verifier consensus: commits `VERIFICATION_SUBMITTED` then `VERIFIED`, marks the
/// `verification_records` row consensus-reached, and advances the case from `EXECUTING` to
/// `VERIFIED` — all in one transaction.
pub async fn submit_verification_consensus(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    case_id: Uuid,
    verification_record_id: Uuid,
    actor: TransitionActor,
) -> Result<VerificationRecord, CoreError> {
    let mut tx = projections.begin().await?;
    let case = projections.get_case(&mut tx, &tenant_id, &case_id).await?;

    if case.lifecycle != CaseLifecycle::Executing {
        return Err(CoreError::LifecycleInvariantViolation(format!(
            "case lifecycle is {} not EXECUTING",
            case.lifecycle.as_str()
        )));
    }

    let now = Utc::now();
    let submitted_envelope = Envelope::v1(
        "VERIFICATION",
        "SUBMITTED",
        json!({"verificationRecordId": verification_record_id}),
    );
    ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::VerificationSubmitted,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof.clone(),
                intent_context: None,
                payload: serde_json::to_value(&submitted_envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    let verified_envelope = Envelope::v1(
        "VERIFICATION",
        "VERIFIED",
        json!({"verificationRecordId": verification_record_id}),
    );
    ledger
        .append_entry(
            AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::Verified,
                actor_kind: actor.kind,
                actor_user_id: actor.user_id,
                authority_proof: actor.authority_proof,
                intent_context: None,
                payload: serde_json::to_value(&verified_envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    projections
        .mark_verification_consensus(&mut tx, &verification_record_id, now)
        .await?;
    projections
        .update_case_lifecycle(&mut tx, &case_id, CaseLifecycle::Verified, now)
        .await?;
    let record = projections
        .consensus_reached_verification(&mut tx, &case_id)
        .await?
        .ok_or_else(|| {
            CoreError::LifecycleInvariantViolation("verification record vanished after update".into())
        })?;
    tx.commit().await?;

    tracing::info!(case_id = %case_id, verification_record_id = %verification_record_id, "verification consensus reached");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        assert!(is_allowed(CaseLifecycle::Intaked, CaseLifecycle::Routed));
        assert!(is_allowed(CaseLifecycle::Routed, CaseLifecycle::Executing));
        assert!(is_allowed(CaseLifecycle::Verified, CaseLifecycle::Disbursed));
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(!is_allowed(CaseLifecycle::Intaked, CaseLifecycle::Disbursed));
        assert!(!is_allowed(CaseLifecycle::Disbursed, CaseLifecycle::Routed));
    }

    #[test]
    fn archival_is_always_reachable() {
        assert!(is_allowed(CaseLifecycle::Closed, CaseLifecycle::Archived));
        assert!(is_allowed(CaseLifecycle::Rejected, CaseLifecycle::Archived));
    }
}
