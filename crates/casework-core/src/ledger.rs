//! Ledger Authority (C5) — in-memory append-only structure, hashing, and signing.
//!
//! This module holds the pure data structure and its hash/signature machinery; the
//! transactional write algorithm (validation, supersession checks, ts allocation, dual-backend
//! persistence) lives in `storage`. Kept split the way the teacher splits `ledger.rs` (pure
//! chain proofs) from `storage.rs` (the persistence facade around it).

use crate::authority::ActorKind;
use crate::canonical::canonical_hash;
use crate::error::CoreError;
use crate::keystore::KeyStore;
use crate::types::{CommitmentMaterial, EventType, LedgerCommit};
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use uuid::Uuid;

/// Append-only ledger. No in-place mutation APIs are exposed: every state transition becomes
/// an additional record, and the only mutable field of an existing record is the write-once
/// `supersededById` back-pointer.
#[derive(Debug, Default, Clone)]
pub struct AppendOnlyLedger {
    entries: Vec<LedgerCommit>,
}

impl AppendOnlyLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild from persisted entries and verify hash + signature integrity and strictly
    /// increasing `ts`.
    pub fn from_entries(
        entries: Vec<LedgerCommit>,
        public_key: &VerifyingKey,
    ) -> Result<Self, CoreError> {
        let ledger = Self { entries };
        ledger.verify_chain(public_key)?;
        Ok(ledger)
    }

    pub fn entries(&self) -> &[LedgerCommit] {
        &self.entries
    }

    pub fn find_entry(&self, id: &Uuid) -> Option<&LedgerCommit> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    pub fn entries_for_case(&self, case_id: &Uuid) -> Vec<&LedgerCommit> {
        let mut matches: Vec<&LedgerCommit> = self
            .entries
            .iter()
            .filter(|entry| entry.case_id.as_ref() == Some(case_id))
            .collect();
        matches.sort_by_key(|entry| entry.ts);
        matches
    }

    /// Recompute the commitment hash and verify the signature and strictly-increasing `ts`
    /// for every entry (testable properties 1 and 2).
    pub fn verify_chain(&self, public_key: &VerifyingKey) -> Result<(), CoreError> {
        let mut last_ts: Option<i64> = None;
        for entry in &self.entries {
            if let Some(prev) = last_ts {
                if entry.ts <= prev {
                    return Err(CoreError::LedgerChainCorrupted(entry.ts as u64));
                }
            }
            last_ts = Some(entry.ts);

            let material = commitment_material(entry);
            let expected_hash = canonical_hash(&material)?;
            if expected_hash != entry.commitment_hash {
                return Err(CoreError::LedgerChainCorrupted(entry.ts as u64));
            }

            KeyStore::verify_hex_digest(public_key, &entry.commitment_hash, &entry.signature)
                .map_err(|_| CoreError::SignatureInvalid(entry.id.to_string()))?;
        }
        Ok(())
    }

    /// Build the next entry's hash and signature without mutating the in-memory chain.
    #[allow(clippy::too_many_arguments)]
    pub fn build_entry(
        tenant_id: Uuid,
        case_id: Option<Uuid>,
        ts: i64,
        event_type: EventType,
        actor_kind: ActorKind,
        actor_user_id: Option<Uuid>,
        authority_proof: String,
        intent_context: Option<Value>,
        payload: Value,
        supersedes_commit_id: Option<Uuid>,
        request_id: Option<String>,
        signer: &KeyStore,
    ) -> Result<LedgerCommit, CoreError> {
        let material = CommitmentMaterial {
            tenant_id: &tenant_id,
            case_id: &case_id,
            event_type,
            ts,
            actor_kind,
            actor_user_id: &actor_user_id,
            authority_proof: &authority_proof,
            intent_context: &intent_context,
            supersedes_commit_id: &supersedes_commit_id,
            payload: &payload,
        };
        let commitment_hash = canonical_hash(&material)?;
        let signature = signer.sign_hex_digest(&commitment_hash);

        Ok(LedgerCommit {
            id: Uuid::new_v4(),
            tenant_id,
            case_id,
            ts,
            event_type,
            actor_kind,
            actor_user_id,
            authority_proof,
            intent_context,
            payload,
            commitment_hash,
            signature,
            supersedes_commit_id,
            superseded_by_id: None,
            request_id,
            created_at: Utc::now(),
        })
    }

    /// Commit a pre-built, externally-durable entry. Validates `ts` strictly increases and the
    /// hash/signature match before accepting it into the in-memory chain.
    pub fn commit_entry(
        &mut self,
        entry: LedgerCommit,
        public_key: &VerifyingKey,
    ) -> Result<(), CoreError> {
        if let Some(last) = self.entries.last() {
            if entry.ts <= last.ts {
                return Err(CoreError::LedgerChainCorrupted(entry.ts as u64));
            }
        }

        let material = commitment_material(&entry);
        let expected_hash = canonical_hash(&material)?;
        if expected_hash != entry.commitment_hash {
            return Err(CoreError::LedgerChainCorrupted(entry.ts as u64));
        }
        KeyStore::verify_hex_digest(public_key, &entry.commitment_hash, &entry.signature)
            .map_err(|_| CoreError::SignatureInvalid(entry.id.to_string()))?;

        self.entries.push(entry);
        Ok(())
    }

    /// Mark `target_id` as superseded by `superseding_id`. Write-once: fails if already set.
    pub fn mark_superseded(
        &mut self,
        target_id: &Uuid,
        superseding_id: Uuid,
    ) -> Result<(), CoreError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| &e.id == target_id)
            .ok_or_else(|| CoreError::SupersededCommitNotFound(target_id.to_string()))?;
        if entry.superseded_by_id.is_some() {
            return Err(CoreError::CommitAlreadySuperseded(target_id.to_string()));
        }
        entry.superseded_by_id = Some(superseding_id);
        Ok(())
    }
}

fn commitment_material(entry: &LedgerCommit) -> CommitmentMaterial<'_> {
    CommitmentMaterial {
        tenant_id: &entry.tenant_id,
        case_id: &entry.case_id,
        event_type: entry.event_type,
        ts: entry.ts,
        actor_kind: entry.actor_kind,
        actor_user_id: &entry.actor_user_id,
        authority_proof: &entry.authority_proof,
        intent_context: &entry.intent_context,
        supersedes_commit_id: &entry.supersedes_commit_id,
        payload: &entry.payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signer() -> KeyStore {
        let dir = std::env::temp_dir().join(format!("casework-ledger-{}", Uuid::new_v4()));
        KeyStore::load_or_generate(dir.join("signing.key")).unwrap()
    }

    #[test]
    fn builds_commits_and_verifies_chain() {
        let signer = signer();
        let public_key = signer.public_key();
        let mut ledger = AppendOnlyLedger::new();
        let tenant_id = Uuid::new_v4();
        let case_id = Uuid::new_v4();

        let entry = AppendOnlyLedger::build_entry(
            tenant_id,
            Some(case_id),
            1,
            EventType::CaseCreated,
            ActorKind::System,
            None,
            "SYSTEM".to_string(),
            None,
            json!({"envelopeVersion": 1, "domain": "CASE", "event": "CREATED", "data": {}}),
            None,
            None,
            &signer,
        )
        .unwrap();

        ledger.commit_entry(entry, &public_key).unwrap();
        assert!(ledger.verify_chain(&public_key).is_ok());
        assert_eq!(ledger.entries_for_case(&case_id).len(), 1);
    }

    #[test]
    fn detects_tampered_payload() {
        let signer = signer();
        let public_key = signer.public_key();
        let mut ledger = AppendOnlyLedger::new();
        let tenant_id = Uuid::new_v4();

        let entry = AppendOnlyLedger::build_entry(
            tenant_id,
            None,
            1,
            EventType::CaseCreated,
            ActorKind::System,
            None,
            "SYSTEM".to_string(),
            None,
            json!({"a": 1}),
            None,
            None,
            &signer,
        )
        .unwrap();
        ledger.commit_entry(entry, &public_key).unwrap();

        let mut tampered = ledger.clone();
        tampered.entries[0].payload = json!({"a": 2});
        assert!(tampered.verify_chain(&public_key).is_err());
    }

    #[test]
    fn rejects_non_increasing_ts_on_commit() {
        let signer = signer();
        let public_key = signer.public_key();
        let mut ledger = AppendOnlyLedger::new();
        let tenant_id = Uuid::new_v4();

        let first = AppendOnlyLedger::build_entry(
            tenant_id,
            None,
            5,
            EventType::CaseCreated,
            ActorKind::System,
            None,
            "SYSTEM".to_string(),
            None,
            json!({}),
            None,
            None,
            &signer,
        )
        .unwrap();
        ledger.commit_entry(first, &public_key).unwrap();

        let second = AppendOnlyLedger::build_entry(
            tenant_id,
            None,
            5,
            EventType::CaseUpdated,
            ActorKind::System,
            None,
            "SYSTEM".to_string(),
            None,
            json!({}),
            None,
            None,
            &signer,
        )
        .unwrap();
        assert!(ledger.commit_entry(second, &public_key).is_err());
    }

    #[test]
    fn supersession_back_pointer_is_write_once() {
        let signer = signer();
        let public_key = signer.public_key();
        let mut ledger = AppendOnlyLedger::new();
        let tenant_id = Uuid::new_v4();

        let entry = AppendOnlyLedger::build_entry(
            tenant_id,
            None,
            1,
            EventType::Routed,
            ActorKind::Human,
            Some(Uuid::new_v4()),
            "ADMIN:x".to_string(),
            None,
            json!({}),
            None,
            None,
            &signer,
        )
        .unwrap();
        let id = entry.id;
        ledger.commit_entry(entry, &public_key).unwrap();

        ledger.mark_superseded(&id, Uuid::new_v4()).unwrap();
        assert!(ledger.mark_superseded(&id, Uuid::new_v4()).is_err());
    }
}
