//! Case Projection Store (C8): the projection tables a command handler reads and writes
//! alongside a ledger append in the same transaction. Every row here is rebuildable from the
//! ledger plus static configuration (spec invariant 8) — this module is a cache, never the
//! source of truth.
//!
//! Grounded on the teacher's `PostgresLedgerStore` bind/row-decode idiom (`storage.rs`),
//! generalized from one table to the projection set named in the data model.

use crate::error::CoreError;
use crate::types::{
    Case, CaseLifecycle, Decision, Disbursement, DisbursementActor, DisbursementStatus, Execution,
    ExecutionStatus, Payee, PayeeKind, VerificationRecord,
};
use crate::authority::ActorKind;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// A caller either opens one shared transaction for the whole command (ledger append +
/// projection update) or reuses an outer one; every projection method below matches §3
/// invariant 7 by taking `&mut Transaction` rather than a bare pool.
pub struct ProjectionStore {
    pool: PgPool,
}

impl ProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, CoreError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn ensure_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cases (
                case_id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                reference_code TEXT NOT NULL,
                lifecycle TEXT NOT NULL,
                status TEXT NOT NULL,
                author_user_id UUID NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                case_id UUID NOT NULL,
                decision_type TEXT NOT NULL,
                actor_kind TEXT NOT NULL,
                actor_user_id UUID NULL,
                decided_at TIMESTAMPTZ NOT NULL,
                reason TEXT NULL,
                intent_context JSONB NULL,
                superseded_at TIMESTAMPTZ NULL,
                supersedes_decision_id UUID NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                case_id UUID NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verification_records (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                case_id UUID NOT NULL,
                required_verifiers TEXT[] NOT NULL,
                consensus_reached BOOLEAN NOT NULL,
                routed_at TIMESTAMPTZ NOT NULL,
                verified_at TIMESTAMPTZ NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS disbursements (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                case_id UUID NOT NULL UNIQUE,
                disbursement_type TEXT NOT NULL,
                status TEXT NOT NULL,
                amount_minor BIGINT NOT NULL,
                currency TEXT NOT NULL,
                payee_kind TEXT NOT NULL,
                payee_id TEXT NOT NULL,
                actor_kind TEXT NOT NULL,
                actor_user_id UUID NULL,
                actor_authority_proof TEXT NOT NULL,
                verification_record_id UUID NOT NULL,
                execution_id UUID NOT NULL,
                authorized_at TIMESTAMPTZ NOT NULL,
                executed_at TIMESTAMPTZ NULL,
                failed_at TIMESTAMPTZ NULL,
                failure_reason TEXT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_case(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        case: &Case,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO cases (case_id, tenant_id, reference_code, lifecycle, status,
                                author_user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(case.case_id)
        .bind(case.tenant_id)
        .bind(&case.reference_code)
        .bind(case.lifecycle.as_str())
        .bind(&case.status)
        .bind(case.author_user_id)
        .bind(case.created_at)
        .bind(case.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_case(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: &Uuid,
        case_id: &Uuid,
    ) -> Result<Case, CoreError> {
        let row = sqlx::query(
            "SELECT * FROM cases WHERE tenant_id = $1 AND case_id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(case_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CoreError::CaseNotFound(case_id.to_string()))?;
        row_to_case(&row)
    }

    pub async fn update_case_lifecycle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        case_id: &Uuid,
        lifecycle: CaseLifecycle,
        updated_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE cases SET lifecycle = $1, updated_at = $2 WHERE case_id = $3")
            .bind(lifecycle.as_str())
            .bind(updated_at)
            .bind(case_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn latest_authoritative_decision(
        &self,
        tenant_id: &Uuid,
        case_id: &Uuid,
        decision_type: &str,
    ) -> Result<Option<Decision>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM decisions
            WHERE tenant_id = $1 AND case_id = $2 AND decision_type = $3 AND superseded_at IS NULL
            ORDER BY decided_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(case_id)
        .bind(decision_type)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_decision).transpose()
    }

    /// Same lookup as `latest_authoritative_decision`, but row-locked within a caller's write
    /// transaction so a routing decision can be safely superseded without a second writer
    /// racing in between the read and the supersede.
    pub async fn latest_authoritative_decision_locked(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: &Uuid,
        case_id: &Uuid,
        decision_type: &str,
    ) -> Result<Option<Decision>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM decisions
            WHERE tenant_id = $1 AND case_id = $2 AND decision_type = $3 AND superseded_at IS NULL
            ORDER BY decided_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(case_id)
        .bind(decision_type)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_decision).transpose()
    }

    pub async fn insert_decision(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        decision: &Decision,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO decisions (id, tenant_id, case_id, decision_type, actor_kind,
                                    actor_user_id, decided_at, reason, intent_context,
                                    superseded_at, supersedes_decision_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(decision.id)
        .bind(decision.tenant_id)
        .bind(decision.case_id)
        .bind(&decision.decision_type)
        .bind(actor_kind_str(decision.actor_kind))
        .bind(decision.actor_user_id)
        .bind(decision.decided_at)
        .bind(&decision.reason)
        .bind(&decision.intent_context)
        .bind(decision.superseded_at)
        .bind(decision.supersedes_decision_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Marks a decision superseded; at most one row per `(caseId, decisionType)` may have
    /// `supersededAt = NULL` at a time (spec invariant 6 on the `decisions` projection).
    pub async fn supersede_decision(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &Uuid,
        superseded_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE decisions SET superseded_at = $1 WHERE id = $2")
            .bind(superseded_at)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn insert_execution(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        execution: &Execution,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO executions (id, tenant_id, case_id, status, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(execution.id)
        .bind(execution.tenant_id)
        .bind(execution.case_id)
        .bind(execution_status_str(execution.status))
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_execution_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &Uuid,
        status: ExecutionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE executions SET status = $1, completed_at = $2 WHERE id = $3")
            .bind(execution_status_str(status))
            .bind(completed_at)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn insert_verification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &VerificationRecord,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO verification_records (id, tenant_id, case_id, required_verifiers,
                                               consensus_reached, routed_at, verified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(record.case_id)
        .bind(&record.required_verifiers)
        .bind(record.consensus_reached)
        .bind(record.routed_at)
        .bind(record.verified_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Marks consensus reached on a verification record. Driven by `VERIFICATION_SUBMITTED`
    /// once the required verifier set is satisfied.
    pub async fn mark_verification_consensus(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE verification_records SET consensus_reached = true, verified_at = $1 WHERE id = $2",
        )
        .bind(verified_at)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn decision_chain(
        &self,
        tenant_id: &Uuid,
        case_id: &Uuid,
        decision_type: &str,
    ) -> Result<Vec<Decision>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM decisions
            WHERE tenant_id = $1 AND case_id = $2 AND decision_type = $3
            ORDER BY decided_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(case_id)
        .bind(decision_type)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_decision).collect()
    }

    pub async fn latest_execution(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        case_id: &Uuid,
    ) -> Result<Option<Execution>, CoreError> {
        let row = sqlx::query(
            "SELECT * FROM executions WHERE case_id = $1 ORDER BY started_at DESC LIMIT 1",
        )
        .bind(case_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_execution).transpose()
    }

    pub async fn consensus_reached_verification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        case_id: &Uuid,
    ) -> Result<Option<VerificationRecord>, CoreError> {
        let row = sqlx::query(
            "SELECT * FROM verification_records WHERE case_id = $1 AND consensus_reached = true",
        )
        .bind(case_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_verification).transpose()
    }

    pub async fn get_disbursement_by_case(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        case_id: &Uuid,
    ) -> Result<Option<Disbursement>, CoreError> {
        let row = sqlx::query("SELECT * FROM disbursements WHERE case_id = $1 FOR UPDATE")
            .bind(case_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(row_to_disbursement).transpose()
    }

    pub async fn insert_disbursement(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        d: &Disbursement,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO disbursements (
                id, tenant_id, case_id, disbursement_type, status, amount_minor, currency,
                payee_kind, payee_id, actor_kind, actor_user_id, actor_authority_proof,
                verification_record_id, execution_id, authorized_at, executed_at, failed_at,
                failure_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(d.id)
        .bind(d.tenant_id)
        .bind(d.case_id)
        .bind(&d.disbursement_type)
        .bind(disbursement_status_str(d.status))
        .bind(d.amount_minor as i64)
        .bind(&d.currency)
        .bind(payee_kind_str(d.payee.kind))
        .bind(&d.payee.id)
        .bind(actor_kind_str(d.actor.kind))
        .bind(d.actor.user_id)
        .bind(&d.actor.authority_proof)
        .bind(d.verification_record_id)
        .bind(d.execution_id)
        .bind(d.authorized_at)
        .bind(d.executed_at)
        .bind(d.failed_at)
        .bind(&d.failure_reason)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_disbursement_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &Uuid,
        status: DisbursementStatus,
        executed_at: Option<DateTime<Utc>>,
        failed_at: Option<DateTime<Utc>>,
        failure_reason: Option<&str>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE disbursements
            SET status = $1, executed_at = $2, failed_at = $3, failure_reason = $4
            WHERE id = $5
            "#,
        )
        .bind(disbursement_status_str(status))
        .bind(executed_at)
        .bind(failed_at)
        .bind(failure_reason)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn stalled_authorized_disbursements(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Disbursement>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM disbursements WHERE status = 'AUTHORIZED' AND authorized_at < $1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_disbursement).collect()
    }

    pub async fn all_case_ids_for_tenant(&self, tenant_id: &Uuid) -> Result<Vec<Uuid>, CoreError> {
        let rows = sqlx::query("SELECT case_id FROM cases WHERE tenant_id = $1 ORDER BY created_at ASC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<Uuid, _>("case_id").map_err(CoreError::from))
            .collect()
    }

    pub async fn all_tenant_ids(&self) -> Result<Vec<Uuid>, CoreError> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id FROM cases").fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<Uuid, _>("tenant_id").map_err(CoreError::from))
            .collect()
    }
}

fn row_to_case(row: &sqlx::postgres::PgRow) -> Result<Case, CoreError> {
    Ok(Case {
        case_id: row.try_get("case_id")?,
        tenant_id: row.try_get("tenant_id")?,
        reference_code: row.try_get("reference_code")?,
        lifecycle: parse_lifecycle(&row.try_get::<String, _>("lifecycle")?)?,
        status: row.try_get("status")?,
        author_user_id: row.try_get("author_user_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_decision(row: &sqlx::postgres::PgRow) -> Result<Decision, CoreError> {
    Ok(Decision {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        case_id: row.try_get("case_id")?,
        decision_type: row.try_get("decision_type")?,
        actor_kind: parse_actor_kind(&row.try_get::<String, _>("actor_kind")?)?,
        actor_user_id: row.try_get("actor_user_id")?,
        decided_at: row.try_get("decided_at")?,
        reason: row.try_get("reason")?,
        intent_context: row.try_get("intent_context")?,
        superseded_at: row.try_get("superseded_at")?,
        supersedes_decision_id: row.try_get("supersedes_decision_id")?,
    })
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<Execution, CoreError> {
    Ok(Execution {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        case_id: row.try_get("case_id")?,
        status: parse_execution_status(&row.try_get::<String, _>("status")?)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_verification(row: &sqlx::postgres::PgRow) -> Result<VerificationRecord, CoreError> {
    Ok(VerificationRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        case_id: row.try_get("case_id")?,
        required_verifiers: row.try_get("required_verifiers")?,
        consensus_reached: row.try_get("consensus_reached")?,
        routed_at: row.try_get("routed_at")?,
        verified_at: row.try_get("verified_at")?,
    })
}

fn row_to_disbursement(row: &sqlx::postgres::PgRow) -> Result<Disbursement, CoreError> {
    Ok(Disbursement {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        case_id: row.try_get("case_id")?,
        disbursement_type: row.try_get("disbursement_type")?,
        status: parse_disbursement_status(&row.try_get::<String, _>("status")?)?,
        amount_minor: row.try_get::<i64, _>("amount_minor")? as u64,
        currency: row.try_get("currency")?,
        payee: Payee {
            kind: parse_payee_kind(&row.try_get::<String, _>("payee_kind")?)?,
            id: row.try_get("payee_id")?,
        },
        actor: DisbursementActor {
            kind: parse_actor_kind(&row.try_get::<String, _>("actor_kind")?)?,
            user_id: row.try_get("actor_user_id")?,
            authority_proof: row.try_get("actor_authority_proof")?,
        },
        verification_record_id: row.try_get("verification_record_id")?,
        execution_id: row.try_get("execution_id")?,
        authorized_at: row.try_get("authorized_at")?,
        executed_at: row.try_get("executed_at")?,
        failed_at: row.try_get("failed_at")?,
        failure_reason: row.try_get("failure_reason")?,
    })
}

fn parse_lifecycle(raw: &str) -> Result<CaseLifecycle, CoreError> {
    Ok(match raw {
        "INTAKED" => CaseLifecycle::Intaked,
        "ROUTED" => CaseLifecycle::Routed,
        "EXECUTING" => CaseLifecycle::Executing,
        "VERIFIED" => CaseLifecycle::Verified,
        "DISBURSED" => CaseLifecycle::Disbursed,
        "CLOSED" => CaseLifecycle::Closed,
        "FLAGGED" => CaseLifecycle::Flagged,
        "REJECTED" => CaseLifecycle::Rejected,
        "ARCHIVED" => CaseLifecycle::Archived,
        other => return Err(CoreError::Database(format!("unknown lifecycle '{other}'"))),
    })
}

fn parse_actor_kind(raw: &str) -> Result<ActorKind, CoreError> {
    match raw {
        "system" => Ok(ActorKind::System),
        "human" => Ok(ActorKind::Human),
        other => Err(CoreError::Database(format!("unknown actor_kind '{other}'"))),
    }
}

fn actor_kind_str(kind: ActorKind) -> &'static str {
    match kind {
        ActorKind::System => "system",
        ActorKind::Human => "human",
    }
}

fn parse_execution_status(raw: &str) -> Result<ExecutionStatus, CoreError> {
    Ok(match raw {
        "STARTED" => ExecutionStatus::Started,
        "IN_PROGRESS" => ExecutionStatus::InProgress,
        "COMPLETED" => ExecutionStatus::Completed,
        "ABORTED" => ExecutionStatus::Aborted,
        other => return Err(CoreError::Database(format!("unknown execution status '{other}'"))),
    })
}

fn execution_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Started => "STARTED",
        ExecutionStatus::InProgress => "IN_PROGRESS",
        ExecutionStatus::Completed => "COMPLETED",
        ExecutionStatus::Aborted => "ABORTED",
    }
}

fn parse_disbursement_status(raw: &str) -> Result<DisbursementStatus, CoreError> {
    Ok(match raw {
        "AUTHORIZED" => DisbursementStatus::Authorized,
        "EXECUTING" => DisbursementStatus::Executing,
        "COMPLETED" => DisbursementStatus::Completed,
        "FAILED" => DisbursementStatus::Failed,
        other => {
            return Err(CoreError::Database(format!(
                "unknown disbursement status '{other}'"
            )))
        }
    })
}

fn disbursement_status_str(status: DisbursementStatus) -> &'static str {
    match status {
        DisbursementStatus::Authorized => "AUTHORIZED",
        DisbursementStatus::Executing => "EXECUTING",
        DisbursementStatus::Completed => "COMPLETED",
        DisbursementStatus::Failed => "FAILED",
    }
}

fn parse_payee_kind(raw: &str) -> Result<PayeeKind, CoreError> {
    Ok(match raw {
        "bank_account" => PayeeKind::BankAccount,
        "wallet" => PayeeKind::Wallet,
        "check" => PayeeKind::Check,
        other => return Err(CoreError::Database(format!("unknown payee kind '{other}'"))),
    })
}

fn payee_kind_str(kind: PayeeKind) -> &'static str {
    match kind {
        PayeeKind::BankAccount => "bank_account",
        PayeeKind::Wallet => "wallet",
        PayeeKind::Check => "check",
    }
}
