//! Domain data model (spec.md §3): ledger commits, case lifecycle projections, decisions,
//! verification/execution sub-state, disbursements, idempotency, and chat projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::authority::ActorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    CaseCreated,
    CaseUpdated,
    CaseFlagged,
    CaseRejected,
    CaseArchived,
    Routed,
    RoutingSuperseded,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionAborted,
    VerificationStarted,
    VerificationSubmitted,
    Verified,
    VerificationTimedOut,
    AppealOpened,
    AppealResolved,
    DisbursementAuthorized,
    DisbursementCompleted,
    DisbursementFailed,
    DisbursementStalled,
    LifecycleRepaired,
    CaseAccepted,
    CaseEscalated,
    GrantCreated,
    GrantPolicyApplied,
    BudgetAllocated,
    TrancheReleased,
    BudgetSuperseded,
    TrancheReversed,
}

/// `{id, tenantId, caseId?, ts, eventType, actorKind, actorUserId?, authorityProof,
/// intentContext?, payload, commitmentHash, signature, supersedesCommitId?, requestId?}`.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCommit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Option<Uuid>,
    pub ts: i64,
    pub event_type: EventType,
    pub actor_kind: ActorKind,
    pub actor_user_id: Option<Uuid>,
    pub authority_proof: String,
    pub intent_context: Option<serde_json::Value>,
    pub payload: serde_json::Value,
    pub commitment_hash: String,
    pub signature: String,
    pub supersedes_commit_id: Option<Uuid>,
    pub superseded_by_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Material used to derive `commitmentHash`; must match spec.md §3 field-for-field.
#[derive(Debug, Clone, Serialize)]
pub struct CommitmentMaterial<'a> {
    pub tenant_id: &'a Uuid,
    pub case_id: &'a Option<Uuid>,
    pub event_type: EventType,
    pub ts: i64,
    pub actor_kind: ActorKind,
    pub actor_user_id: &'a Option<Uuid>,
    pub authority_proof: &'a str,
    pub intent_context: &'a Option<serde_json::Value>,
    pub supersedes_commit_id: &'a Option<Uuid>,
    pub payload: &'a serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseLifecycle {
    Intaked,
    Routed,
    Executing,
    Verified,
    Disbursed,
    Closed,
    Flagged,
    Rejected,
    Archived,
}

impl CaseLifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaseLifecycle::Closed | CaseLifecycle::Rejected | CaseLifecycle::Archived
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaseLifecycle::Intaked => "INTAKED",
            CaseLifecycle::Routed => "ROUTED",
            CaseLifecycle::Executing => "EXECUTING",
            CaseLifecycle::Verified => "VERIFIED",
            CaseLifecycle::Disbursed => "DISBURSED",
            CaseLifecycle::Closed => "CLOSED",
            CaseLifecycle::Flagged => "FLAGGED",
            CaseLifecycle::Rejected => "REJECTED",
            CaseLifecycle::Archived => "ARCHIVED",
        }
    }
}

/// Case projection: a cache of the ledger-derived state, never authoritative on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: Uuid,
    pub tenant_id: Uuid,
    pub reference_code: String,
    pub lifecycle: CaseLifecycle,
    pub status: String,
    pub author_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub decision_type: String,
    pub actor_kind: ActorKind,
    pub actor_user_id: Option<Uuid>,
    pub decided_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub intent_context: Option<serde_json::Value>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub supersedes_decision_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    InProgress,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMilestone {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub label: String,
    pub reached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub execution_id: Uuid,
    pub percent_complete: u8,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequiredRole {
    pub id: Uuid,
    pub verification_record_id: Uuid,
    pub role: String,
    pub satisfied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub required_verifiers: Vec<String>,
    pub consensus_reached: bool,
    pub routed_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisbursementStatus {
    Authorized,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayeeKind {
    BankAccount,
    Wallet,
    Check,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payee {
    pub kind: PayeeKind,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementActor {
    pub kind: ActorKind,
    pub user_id: Option<Uuid>,
    pub authority_proof: String,
}

/// Exactly one per case, per spec.md invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disbursement {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub disbursement_type: String,
    pub status: DisbursementStatus,
    pub amount_minor: u64,
    pub currency: String,
    pub payee: Payee,
    pub actor: DisbursementActor,
    pub verification_record_id: Uuid,
    pub execution_id: Uuid,
    pub authorized_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant_id: Uuid,
    pub key: String,
    pub response_hash: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub author_user_id: Uuid,
    pub body: String,
    pub client_mutation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Delivered,
    Seen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub delivered_at: Option<DateTime<Utc>>,
    pub seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReadPosition {
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub last_read_message_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only simulation artifact returned by the routing counterfactual query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingCounterfactual {
    pub case_id: Uuid,
    pub considered_routes: Vec<String>,
    pub chosen_route: String,
    pub rationale: BTreeMap<String, String>,
    pub generated_at: DateTime<Utc>,
}
