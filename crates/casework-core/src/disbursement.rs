//! Disbursement Protocol (C10): two-phase authorize/execute, idempotent, ledger-coupled money
//! movement (spec.md §4.9). Status gating follows the same explicit-stage idiom as the
//! teacher's `ConsequenceStageMachine`, collapsed to the three states this protocol allows.

use crate::authority::ActorKind;
use crate::envelope::Envelope;
use crate::error::CoreError;
use crate::projections::ProjectionStore;
use crate::storage::{AppendInput, LedgerAuthority};
use crate::types::{
    CaseLifecycle, Disbursement, DisbursementActor, DisbursementStatus, EventType, ExecutionStatus,
    Payee,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

pub enum AuthorizeOutcome {
    Authorized { disbursement_id: Uuid },
    AlreadyAuthorized { disbursement_id: Uuid },
    Denied { reason: String },
}

pub struct AuthorizeRequest {
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub disbursement_type: String,
    pub amount_minor: u64,
    pub currency: String,
    pub payee: Payee,
    pub actor: DisbursementActor,
}

/// `authorizeDisbursement` (spec.md §4.9 step 1-5).
pub async fn authorize_disbursement(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    request: AuthorizeRequest,
) -> Result<AuthorizeOutcome, CoreError> {
    let mut tx = projections.begin().await?;

    if let Some(existing) = projections
        .get_disbursement_by_case(&mut tx, &request.case_id)
        .await?
    {
        return Ok(match existing.status {
            DisbursementStatus::Authorized => AuthorizeOutcome::AlreadyAuthorized {
                disbursement_id: existing.id,
            },
            other => AuthorizeOutcome::Denied {
                reason: format!("disbursement already exists in status {other:?}"),
            },
        });
    }

    let case = projections
        .get_case(&mut tx, &request.tenant_id, &request.case_id)
        .await?;
    if case.lifecycle != CaseLifecycle::Verified {
        return Ok(AuthorizeOutcome::Denied {
            reason: format!("case lifecycle is {} not VERIFIED", case.lifecycle.as_str()),
        });
    }

    let execution = projections
        .latest_execution(&mut tx, &request.case_id)
        .await?
        .ok_or_else(|| CoreError::LifecycleInvariantViolation("no execution for case".into()))?;
    if execution.status != ExecutionStatus::Completed {
        return Ok(AuthorizeOutcome::Denied {
            reason: "execution is not COMPLETED".to_string(),
        });
    }

    let verification = projections
        .consensus_reached_verification(&mut tx, &request.case_id)
        .await?
        .ok_or_else(|| {
            CoreError::LifecycleInvariantViolation(
                "no verification record with consensusReached=true".into(),
            )
        })?;

    let now = Utc::now();
    let disbursement = Disbursement {
        id: Uuid::new_v4(),
        tenant_id: request.tenant_id,
        case_id: request.case_id,
        disbursement_type: request.disbursement_type,
        status: DisbursementStatus::Authorized,
        amount_minor: request.amount_minor,
        currency: request.currency,
        payee: request.payee,
        actor: request.actor,
        verification_record_id: verification.id,
        execution_id: execution.id,
        authorized_at: now,
        executed_at: None,
        failed_at: None,
        failure_reason: None,
    };
    projections.insert_disbursement(&mut tx, &disbursement).await?;

    let envelope = Envelope::v1(
        "DISBURSEMENT",
        "AUTHORIZED",
        json!({"disbursementId": disbursement.id, "amountMinor": disbursement.amount_minor}),
    );
    ledger
        .append_entry(
            AppendInput {
                tenant_id: disbursement.tenant_id,
                case_id: Some(disbursement.case_id),
                event_type: EventType::DisbursementAuthorized,
                actor_kind: disbursement.actor.kind,
                actor_user_id: disbursement.actor.user_id,
                authority_proof: disbursement.actor.authority_proof.clone(),
                intent_context: None,
                payload: serde_json::to_value(&envelope)?,
                supersedes_commit_id: None,
                request_id: None,
            },
            Some(&mut tx),
        )
        .await?;

    tx.commit().await?;
    Ok(AuthorizeOutcome::Authorized {
        disbursement_id: disbursement.id,
    })
}

pub enum ExecuteOutcome {
    Completed,
    Failed { reason: String },
}

/// `executeDisbursement` (spec.md §4.9 execute phase). `settle` performs the actual payout and
/// is supplied by the caller (the adapters crate's rail implementations); this function owns
/// only status gating and ledger causality.
pub async fn execute_disbursement<F, Fut>(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    tenant_id: Uuid,
    disbursement_id: Uuid,
    settle: F,
) -> Result<ExecuteOutcome, CoreError>
where
    F: FnOnce(Disbursement) -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let mut tx = projections.begin().await?;
    // Locate by id via the case lookup helper: disbursements are keyed 1:1 with cases, so the
    // caller passes the case's disbursement id already resolved at the transport edge.
    let disbursement = load_authorized(projections, &mut tx, &disbursement_id).await?;

    projections
        .update_disbursement_status(
            &mut tx,
            &disbursement.id,
            DisbursementStatus::Executing,
            None,
            None,
            None,
        )
        .await?;
    tx.commit().await?;

    let settlement = settle(disbursement.clone()).await;

    let mut tx = projections.begin().await?;
    let outcome = match settlement {
        Ok(()) => {
            let now = Utc::now();
            projections
                .update_disbursement_status(
                    &mut tx,
                    &disbursement.id,
                    DisbursementStatus::Completed,
                    Some(now),
                    None,
                    None,
                )
                .await?;
            let envelope = Envelope::v1(
                "DISBURSEMENT",
                "COMPLETED",
                json!({"disbursementId": disbursement.id}),
            );
            ledger
                .append_entry(
                    AppendInput {
                        tenant_id,
                        case_id: Some(disbursement.case_id),
                        event_type: EventType::DisbursementCompleted,
                        actor_kind: ActorKind::System,
                        actor_user_id: None,
                        authority_proof: "SYSTEM".to_string(),
                        intent_context: None,
                        payload: serde_json::to_value(&envelope)?,
                        supersedes_commit_id: None,
                        request_id: None,
                    },
                    Some(&mut tx),
                )
                .await?;
            ExecuteOutcome::Completed
        }
        Err(reason) => {
            let now = Utc::now();
            projections
                .update_disbursement_status(
                    &mut tx,
                    &disbursement.id,
                    DisbursementStatus::Failed,
                    None,
                    Some(now),
                    Some(&reason),
                )
                .await?;
            let envelope = Envelope::v1(
                "DISBURSEMENT",
                "FAILED",
                json!({"disbursementId": disbursement.id, "reason": reason}),
            );
            ledger
                .append_entry(
                    AppendInput {
                        tenant_id,
                        case_id: Some(disbursement.case_id),
                        event_type: EventType::DisbursementFailed,
                        actor_kind: ActorKind::System,
                        actor_user_id: None,
                        authority_proof: "SYSTEM".to_string(),
                        intent_context: None,
                        payload: serde_json::to_value(&envelope)?,
                        supersedes_commit_id: None,
                        request_id: None,
                    },
                    Some(&mut tx),
                )
                .await?;
            ExecuteOutcome::Failed { reason }
        }
    };
    tx.commit().await?;
    Ok(outcome)
}

async fn load_authorized(
    projections: &ProjectionStore,
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    disbursement_id: &Uuid,
) -> Result<Disbursement, CoreError> {
    // Reuses the case-keyed lookup: the disbursement's own id is looked up through its case,
    // since `ProjectionStore` exposes disbursements by `caseId` (the natural unique key).
    let row = sqlx::query("SELECT case_id FROM disbursements WHERE id = $1")
        .bind(disbursement_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CoreError::DisbursementNotFound(disbursement_id.to_string()))?;
    let case_id: Uuid = sqlx::Row::try_get(&row, "case_id")?;

    let disbursement = projections
        .get_disbursement_by_case(tx, &case_id)
        .await?
        .ok_or_else(|| CoreError::DisbursementNotFound(disbursement_id.to_string()))?;

    if disbursement.status != DisbursementStatus::Authorized {
        return Err(CoreError::LifecycleInvariantViolation(format!(
            "disbursement {disbursement_id} is not AUTHORIZED"
        )));
    }
    Ok(disbursement)
}

/// `reconcileDisbursements` (spec.md §4.9 stall reconciliation). Scans `AUTHORIZED`
/// disbursements older than `stall_timeout` and appends `DISBURSEMENT_STALLED`. Duplicate
/// emission under retries is acceptable per spec — supersession rules are not engaged here.
pub async fn reconcile_stalled_disbursements(
    projections: &ProjectionStore,
    ledger: &mut LedgerAuthority,
    stall_timeout: chrono::Duration,
) -> Result<usize, CoreError> {
    let cutoff = Utc::now() - stall_timeout;
    let stalled = projections.stalled_authorized_disbursements(cutoff).await?;
    let count = stalled.len();

    for d in stalled {
        let envelope = Envelope::v1(
            "DISBURSEMENT",
            "STALLED",
            json!({"disbursementId": d.id, "authorizedAt": d.authorized_at}),
        );
        if let Err(e) = ledger
            .append_entry(
                AppendInput {
                    tenant_id: d.tenant_id,
                    case_id: Some(d.case_id),
                    event_type: EventType::DisbursementStalled,
                    actor_kind: ActorKind::System,
                    actor_user_id: None,
                    authority_proof: "SYSTEM".to_string(),
                    intent_context: None,
                    payload: serde_json::to_value(&envelope)?,
                    supersedes_commit_id: None,
                    request_id: None,
                },
                None,
            )
            .await
        {
            tracing::warn!(disbursement_id = %d.id, error = %e, "failed to append stall event");
        }
    }
    Ok(count)
}
