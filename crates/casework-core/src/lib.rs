//! Core ledger authority, lifecycle derivation, and disbursement protocol for the
//! multi-tenant case-management backend.
//!
//! This crate enforces append-only ledger integrity, authority/supersession rules, pure
//! lifecycle projection, and the disbursement two-phase protocol. Transport concerns live in
//! `casework-service`; external rail/verification integrations live in `casework-adapters`.

#![deny(unsafe_code)]

pub mod authority;
pub mod canonical;
pub mod chat;
pub mod clock;
pub mod connectors;
pub mod disbursement;
pub mod envelope;
pub mod error;
pub mod idempotency;
pub mod keystore;
pub mod ledger;
pub mod lifecycle;
pub mod projections;
pub mod query;
pub mod reconciliation;
pub mod storage;
pub mod transitions;
pub mod types;

pub use authority::{derive_authority_level, validate_supersession, ActorKind, AuthorityLevel, SupersessionTarget};
pub use canonical::{canonical_bytes, canonical_hash, canonical_string};
pub use chat::{ChatStore, MessageCursor, MessagePage};
pub use clock::{new_id, validate_uuid, LogicalClock};
pub use connectors::{PayeeRail, RailRegistry};
pub use envelope::{is_recognized_envelope, Envelope, ENVELOPE_VERSION_V1};
pub use error::CoreError;
pub use keystore::KeyStore;
pub use ledger::AppendOnlyLedger;
pub use disbursement::{
    authorize_disbursement, execute_disbursement, reconcile_stalled_disbursements,
    AuthorizeOutcome, AuthorizeRequest, ExecuteOutcome,
};
pub use idempotency::IdempotencyStore;
pub use lifecycle::derive_lifecycle;
pub use projections::ProjectionStore;
pub use query::{
    explain_lifecycle, get_authoritative_decision, get_decision_chain, get_ledger_trail,
    get_routing_counterfactual, LifecycleExplanation,
};
pub use reconciliation::{ReconciliationScheduler, SchedulerConfig, ADVISORY_LOCK_KEY};
pub use storage::{AppendInput, LedgerAuthority, LedgerStatus, LedgerStorageConfig};
pub use transitions::{
    complete_execution, create_case, route_case, start_execution, start_verification,
    submit_verification_consensus, transition_case_lifecycle_with_ledger, TransitionActor,
};
pub use types::{
    Case, CaseLifecycle, CaseReadPosition, CommitmentMaterial, Decision, Disbursement,
    DisbursementActor, DisbursementStatus, EventType, Execution, ExecutionMilestone,
    ExecutionProgress, ExecutionStatus, IdempotencyRecord, LedgerCommit, Message, MessageReceipt,
    Payee, PayeeKind, ReceiptKind, RoutingCounterfactual, VerificationRecord,
    VerificationRequiredRole,
};
