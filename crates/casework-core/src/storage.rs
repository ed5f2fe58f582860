//! Ledger Authority (C5): the transactional write algorithm (spec.md §4.5) around the
//! in-memory `AppendOnlyLedger`, with an in-memory or PostgreSQL-backed persistence facade —
//! directly generalized from the teacher's `PersistentLedger`/`PostgresLedgerStore` split.

use crate::authority::{validate_supersession, ActorKind, SupersessionTarget};
use crate::clock::LogicalClock;
use crate::error::CoreError;
use crate::keystore::KeyStore;
use crate::ledger::AppendOnlyLedger;
use crate::types::{EventType, LedgerCommit};
use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use uuid::Uuid;

/// Ledger persistence backend configuration.
#[derive(Debug, Clone)]
pub enum LedgerStorageConfig {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl LedgerStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for LedgerStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Clone)]
enum LedgerStorageBackend {
    Memory,
    Postgres(PostgresLedgerStore),
}

/// Everything required to append an entry (spec.md §3's `LedgerCommit` minus the fields the
/// write algorithm itself computes: `id`, `ts`, `commitmentHash`, `signature`).
pub struct AppendInput {
    pub tenant_id: Uuid,
    pub case_id: Option<Uuid>,
    pub event_type: EventType,
    pub actor_kind: ActorKind,
    pub actor_user_id: Option<Uuid>,
    pub authority_proof: String,
    pub intent_context: Option<Value>,
    pub payload: Value,
    pub supersedes_commit_id: Option<Uuid>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerStatus {
    pub backend: &'static str,
    pub entry_count: usize,
    pub latest_ts: Option<i64>,
}

/// Composition root for the ledger: in-memory authoritative chain, optional Postgres mirror,
/// the logical clock, and the signing key. One instance per process (design notes §9).
pub struct LedgerAuthority {
    ledger: AppendOnlyLedger,
    backend: LedgerStorageBackend,
    clock: LogicalClock,
    signer: Arc<KeyStore>,
}

impl LedgerAuthority {
    pub async fn bootstrap(
        config: LedgerStorageConfig,
        signer: Arc<KeyStore>,
    ) -> Result<Self, CoreError> {
        let public_key = signer.public_key();
        match config {
            LedgerStorageConfig::Memory => Ok(Self {
                ledger: AppendOnlyLedger::new(),
                backend: LedgerStorageBackend::Memory,
                clock: LogicalClock::in_memory(),
                signer,
            }),
            LedgerStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresLedgerStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                LogicalClock::ensure_schema(&store.pool).await?;
                let entries = store.load_entries().await?;
                let ledger = AppendOnlyLedger::from_entries(entries, &public_key)?;
                Ok(Self {
                    ledger,
                    clock: LogicalClock::postgres(store.pool.clone()),
                    backend: LedgerStorageBackend::Postgres(store),
                    signer,
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            LedgerStorageBackend::Memory => "memory",
            LedgerStorageBackend::Postgres(_) => "postgres",
        }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signer.public_key()
    }

    /// Write algorithm (spec.md §4.5). When `tx` is supplied, the Postgres mirror write runs
    /// inside it instead of its own implicit transaction, so a caller pairing this append with a
    /// projection update commits both or neither (spec invariant 7).
    pub async fn append_entry(
        &mut self,
        input: AppendInput,
        mut tx: Option<&mut Transaction<'_, Postgres>>,
    ) -> Result<LedgerCommit, CoreError> {
        // 1. Validate input.
        match input.actor_kind {
            ActorKind::Human if input.actor_user_id.is_none() => {
                return Err(CoreError::Validation(
                    "HUMAN actor requires actorUserId".to_string(),
                ));
            }
            ActorKind::System if input.actor_user_id.is_some() => {
                return Err(CoreError::Validation(
                    "SYSTEM actor forbids actorUserId".to_string(),
                ));
            }
            _ => {}
        }

        // 2. Supersession check, same transaction semantics: validated against current
        // in-memory state before any allocation happens.
        if let Some(target_id) = input.supersedes_commit_id {
            let target = self
                .ledger
                .find_entry(&target_id)
                .ok_or_else(|| CoreError::SupersededCommitNotFound(target_id.to_string()))?;
            let target_view = SupersessionTarget {
                tenant_id: target.tenant_id.to_string(),
                already_superseded: target.superseded_by_id.is_some(),
                actor_kind: target.actor_kind,
                authority_proof: target.authority_proof.clone(),
            };
            validate_supersession(
                &input.tenant_id.to_string(),
                input.actor_kind,
                &input.authority_proof,
                &target_view,
            )?;
        }

        // 3. Allocate ts.
        let ts = self.clock.next_ts().await?;

        // 4. Compose, canonicalize, hash, sign.
        let entry = AppendOnlyLedger::build_entry(
            input.tenant_id,
            input.case_id,
            ts,
            input.event_type,
            input.actor_kind,
            input.actor_user_id,
            input.authority_proof,
            input.intent_context,
            input.payload,
            input.supersedes_commit_id,
            input.request_id,
            &self.signer,
        )?;

        // 5. Insert; persist before commit so a crash mid-write never advances the in-memory
        // chain past what durably exists.
        if let LedgerStorageBackend::Postgres(store) = &self.backend {
            match tx.as_deref_mut() {
                Some(tx) => {
                    store.insert_entry(&mut *tx, &entry).await?;
                    if let Some(target_id) = entry.supersedes_commit_id {
                        store.mark_superseded(&mut *tx, &target_id, &entry.id).await?;
                    }
                }
                None => {
                    store.insert_entry(&store.pool, &entry).await?;
                    if let Some(target_id) = entry.supersedes_commit_id {
                        store.mark_superseded(&store.pool, &target_id, &entry.id).await?;
                    }
                }
            }
        }

        let public_key = self.signer.public_key();
        self.ledger.commit_entry(entry.clone(), &public_key)?;
        if let Some(target_id) = entry.supersedes_commit_id {
            self.ledger.mark_superseded(&target_id, entry.id)?;
        }

        Ok(entry)
    }

    /// Ordered by `ts` ascending. Read-only.
    pub fn get_audit_trail(&self, case_id: &Uuid) -> Vec<&LedgerCommit> {
        self.ledger.entries_for_case(case_id)
    }

    /// Generalization of the source's `listByProject`: list every entry for a tenant, ordered
    /// by `ts` ascending. "Project" in the distilled spec maps to this implementation's
    /// `tenantId` scoping boundary.
    pub fn list_by_tenant(&self, tenant_id: &Uuid) -> Vec<&LedgerCommit> {
        let mut matches: Vec<&LedgerCommit> = self
            .ledger
            .entries()
            .iter()
            .filter(|entry| &entry.tenant_id == tenant_id)
            .collect();
        matches.sort_by_key(|entry| entry.ts);
        matches
    }

    pub fn get_status(&self) -> LedgerStatus {
        LedgerStatus {
            backend: self.backend_label(),
            entry_count: self.ledger.entries().len(),
            latest_ts: self.ledger.entries().last().map(|e| e.ts),
        }
    }

    pub fn find_entry(&self, id: &Uuid) -> Option<&LedgerCommit> {
        self.ledger.find_entry(id)
    }
}

#[derive(Clone)]
struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| CoreError::Database(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_commits (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                case_id UUID NULL,
                ts BIGINT NOT NULL UNIQUE,
                event_type TEXT NOT NULL,
                actor_kind TEXT NOT NULL,
                actor_user_id UUID NULL,
                authority_proof TEXT NOT NULL,
                intent_context JSONB NULL,
                payload JSONB NOT NULL,
                commitment_hash TEXT NOT NULL,
                signature TEXT NOT NULL,
                supersedes_commit_id UUID NULL,
                superseded_by_id UUID NULL,
                request_id TEXT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Database(format!("schema create failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_commits_case ON ledger_commits (case_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Database(format!("index create failed: {e}")))?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ledger_commits_tenant ON ledger_commits (tenant_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Database(format!("index create failed: {e}")))?;

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<LedgerCommit>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, case_id, ts, event_type, actor_kind, actor_user_id,
                   authority_proof, intent_context, payload, commitment_hash, signature,
                   supersedes_commit_id, superseded_by_id, request_id, created_at
            FROM ledger_commits
            ORDER BY ts ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Database(format!("load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let event_type_str: String = row.try_get("event_type")?;
            let actor_kind_str: String = row.try_get("actor_kind")?;
            entries.push(LedgerCommit {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                case_id: row.try_get("case_id")?,
                ts: row.try_get("ts")?,
                event_type: parse_event_type(&event_type_str)?,
                actor_kind: parse_actor_kind(&actor_kind_str)?,
                actor_user_id: row.try_get("actor_user_id")?,
                authority_proof: row.try_get("authority_proof")?,
                intent_context: row.try_get("intent_context")?,
                payload: row.try_get("payload")?,
                commitment_hash: row.try_get("commitment_hash")?,
                signature: row.try_get("signature")?,
                supersedes_commit_id: row.try_get("supersedes_commit_id")?,
                superseded_by_id: row.try_get("superseded_by_id")?,
                request_id: row.try_get("request_id")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(entries)
    }

    async fn insert_entry<'e, E>(&self, exec: E, entry: &LedgerCommit) -> Result<(), CoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO ledger_commits (
                id, tenant_id, case_id, ts, event_type, actor_kind, actor_user_id,
                authority_proof, intent_context, payload, commitment_hash, signature,
                supersedes_commit_id, superseded_by_id, request_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.case_id)
        .bind(entry.ts)
        .bind(event_type_str(entry.event_type))
        .bind(actor_kind_str(entry.actor_kind))
        .bind(entry.actor_user_id)
        .bind(&entry.authority_proof)
        .bind(&entry.intent_context)
        .bind(&entry.payload)
        .bind(&entry.commitment_hash)
        .bind(&entry.signature)
        .bind(entry.supersedes_commit_id)
        .bind(entry.superseded_by_id)
        .bind(&entry.request_id)
        .bind(entry.created_at)
        .execute(exec)
        .await
        .map_err(|e| CoreError::Database(format!("insert failed: {e}")))?;
        Ok(())
    }

    async fn mark_superseded<'e, E>(
        &self,
        exec: E,
        target_id: &Uuid,
        superseding_id: &Uuid,
    ) -> Result<(), CoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE ledger_commits SET superseded_by_id = $1 WHERE id = $2 AND superseded_by_id IS NULL")
            .bind(superseding_id)
            .bind(target_id)
            .execute(exec)
            .await
            .map_err(|e| CoreError::Database(format!("supersede update failed: {e}")))?;
        Ok(())
    }
}

fn actor_kind_str(kind: ActorKind) -> &'static str {
    match kind {
        ActorKind::System => "system",
        ActorKind::Human => "human",
    }
}

fn parse_actor_kind(value: &str) -> Result<ActorKind, CoreError> {
    match value {
        "system" => Ok(ActorKind::System),
        "human" => Ok(ActorKind::Human),
        other => Err(CoreError::Database(format!("unknown actor_kind '{other}'"))),
    }
}

fn event_type_str(event_type: EventType) -> &'static str {
    use EventType::*;
    match event_type {
        CaseCreated => "CASE_CREATED",
        CaseUpdated => "CASE_UPDATED",
        CaseFlagged => "CASE_FLAGGED",
        CaseRejected => "CASE_REJECTED",
        CaseArchived => "CASE_ARCHIVED",
        Routed => "ROUTED",
        RoutingSuperseded => "ROUTING_SUPERSEDED",
        ExecutionStarted => "EXECUTION_STARTED",
        ExecutionCompleted => "EXECUTION_COMPLETED",
        ExecutionAborted => "EXECUTION_ABORTED",
        VerificationStarted => "VERIFICATION_STARTED",
        VerificationSubmitted => "VERIFICATION_SUBMITTED",
        Verified => "VERIFIED",
        VerificationTimedOut => "VERIFICATION_TIMED_OUT",
        AppealOpened => "APPEAL_OPENED",
        AppealResolved => "APPEAL_RESOLVED",
        DisbursementAuthorized => "DISBURSEMENT_AUTHORIZED",
        DisbursementCompleted => "DISBURSEMENT_COMPLETED",
        DisbursementFailed => "DISBURSEMENT_FAILED",
        DisbursementStalled => "DISBURSEMENT_STALLED",
        LifecycleRepaired => "LIFECYCLE_REPAIRED",
        CaseAccepted => "CASE_ACCEPTED",
        CaseEscalated => "CASE_ESCALATED",
        GrantCreated => "GRANT_CREATED",
        GrantPolicyApplied => "GRANT_POLICY_APPLIED",
        BudgetAllocated => "BUDGET_ALLOCATED",
        TrancheReleased => "TRANCHE_RELEASED",
        BudgetSuperseded => "BUDGET_SUPERSEDED",
        TrancheReversed => "TRANCHE_REVERSED",
    }
}

fn parse_event_type(value: &str) -> Result<EventType, CoreError> {
    use EventType::*;
    Ok(match value {
        "CASE_CREATED" => CaseCreated,
        "CASE_UPDATED" => CaseUpdated,
        "CASE_FLAGGED" => CaseFlagged,
        "CASE_REJECTED" => CaseRejected,
        "CASE_ARCHIVED" => CaseArchived,
        "ROUTED" => Routed,
        "ROUTING_SUPERSEDED" => RoutingSuperseded,
        "EXECUTION_STARTED" => ExecutionStarted,
        "EXECUTION_COMPLETED" => ExecutionCompleted,
        "EXECUTION_ABORTED" => ExecutionAborted,
        "VERIFICATION_STARTED" => VerificationStarted,
        "VERIFICATION_SUBMITTED" => VerificationSubmitted,
        "VERIFIED" => Verified,
        "VERIFICATION_TIMED_OUT" => VerificationTimedOut,
        "APPEAL_OPENED" => AppealOpened,
        "APPEAL_RESOLVED" => AppealResolved,
        "DISBURSEMENT_AUTHORIZED" => DisbursementAuthorized,
        "DISBURSEMENT_COMPLETED" => DisbursementCompleted,
        "DISBURSEMENT_FAILED" => DisbursementFailed,
        "DISBURSEMENT_STALLED" => DisbursementStalled,
        "LIFECYCLE_REPAIRED" => LifecycleRepaired,
        "CASE_ACCEPTED" => CaseAccepted,
        "CASE_ESCALATED" => CaseEscalated,
        "GRANT_CREATED" => GrantCreated,
        "GRANT_POLICY_APPLIED" => GrantPolicyApplied,
        "BUDGET_ALLOCATED" => BudgetAllocated,
        "TRANCHE_RELEASED" => TrancheReleased,
        "BUDGET_SUPERSEDED" => BudgetSuperseded,
        "TRANCHE_REVERSED" => TrancheReversed,
        other => {
            return Err(CoreError::Database(format!(
                "unknown event_type '{other}' in storage"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_authority() -> LedgerAuthority {
        let dir = std::env::temp_dir().join(format!("casework-storage-{}", Uuid::new_v4()));
        let signer = Arc::new(KeyStore::load_or_generate(dir.join("signing.key")).unwrap());
        LedgerAuthority::bootstrap(LedgerStorageConfig::memory(), signer)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn appends_entry_and_reports_status() {
        let mut authority = memory_authority().await;
        let tenant_id = Uuid::new_v4();
        let case_id = Uuid::new_v4();

        let entry = authority
            .append_entry(AppendInput {
                tenant_id,
                case_id: Some(case_id),
                event_type: EventType::CaseCreated,
                actor_kind: ActorKind::System,
                actor_user_id: None,
                authority_proof: "SYSTEM".to_string(),
                intent_context: None,
                payload: json!({"envelopeVersion": 1, "domain": "CASE", "event": "CREATED", "data": {}}),
                supersedes_commit_id: None,
                request_id: None,
            }, None)
            .await
            .unwrap();

        assert_eq!(authority.get_audit_trail(&case_id).len(), 1);
        assert_eq!(authority.get_status().entry_count, 1);
        assert_eq!(entry.ts, 1);
    }

    #[tokio::test]
    async fn human_actor_without_user_id_is_rejected() {
        let mut authority = memory_authority().await;
        let result = authority
            .append_entry(AppendInput {
                tenant_id: Uuid::new_v4(),
                case_id: None,
                event_type: EventType::CaseCreated,
                actor_kind: ActorKind::Human,
                actor_user_id: None,
                authority_proof: "ADMIN:x".to_string(),
                intent_context: None,
                payload: json!({}),
                supersedes_commit_id: None,
                request_id: None,
            }, None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn system_cannot_supersede_human_entry() {
        let mut authority = memory_authority().await;
        let tenant_id = Uuid::new_v4();

        let human_entry = authority
            .append_entry(AppendInput {
                tenant_id,
                case_id: None,
                event_type: EventType::Routed,
                actor_kind: ActorKind::Human,
                actor_user_id: Some(Uuid::new_v4()),
                authority_proof: "ADMIN:x".to_string(),
                intent_context: None,
                payload: json!({}),
                supersedes_commit_id: None,
                request_id: None,
            }, None)
            .await
            .unwrap();

        let result = authority
            .append_entry(AppendInput {
                tenant_id,
                case_id: None,
                event_type: EventType::RoutingSuperseded,
                actor_kind: ActorKind::System,
                actor_user_id: None,
                authority_proof: "SYSTEM".to_string(),
                intent_context: None,
                payload: json!({}),
                supersedes_commit_id: Some(human_entry.id),
                request_id: None,
            }, None)
            .await;

        assert!(matches!(
            result.unwrap_err(),
            CoreError::SystemCannotSupersedeHumanAuthority
        ));
    }

    #[tokio::test]
    async fn ts_is_strictly_increasing_and_commits_verify() {
        let mut authority = memory_authority().await;
        let tenant_id = Uuid::new_v4();
        let public_key = authority.public_key();

        let mut last_ts = 0i64;
        for _ in 0..20 {
            let entry = authority
                .append_entry(AppendInput {
                    tenant_id,
                    case_id: None,
                    event_type: EventType::CaseCreated,
                    actor_kind: ActorKind::System,
                    actor_user_id: None,
                    authority_proof: "SYSTEM".to_string(),
                    intent_context: None,
                    payload: json!({}),
                    supersedes_commit_id: None,
                    request_id: None,
                }, None)
                .await
                .unwrap();

            assert!(entry.ts > last_ts);
            last_ts = entry.ts;
            assert!(KeyStore::verify_hex_digest(
                &public_key,
                &entry.commitment_hash,
                &entry.signature,
            )
            .is_ok());
        }
    }
}
