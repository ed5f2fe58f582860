//! Payee Rail registry: pluggable settlement backends for the disbursement execute phase.
//!
//! Out of scope for the core per spec.md §1 ("mock-mode simulation harnesses" are an external
//! collaborator, interfaces only); the registry and trait live here, concrete rails live in
//! `casework-adapters`.

use crate::types::Disbursement;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Settles a disbursement against an external payee rail (ACH, wallet, check print run, ...).
/// `Err` carries a human-readable failure reason recorded as `Disbursement.failureReason`.
#[async_trait]
pub trait PayeeRail: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn settle(&self, disbursement: &Disbursement) -> Result<(), String>;
}

/// Registry for payee rail plugins, keyed by `Payee.kind`.
#[derive(Default)]
pub struct RailRegistry {
    rails: HashMap<String, Arc<dyn PayeeRail>>,
}

impl RailRegistry {
    pub fn new() -> Self {
        Self {
            rails: HashMap::new(),
        }
    }

    pub fn register(&mut self, rail: Arc<dyn PayeeRail>) {
        self.rails.insert(rail.kind().to_string(), rail);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn PayeeRail>> {
        self.rails.get(kind).cloned()
    }

    pub fn has(&self, kind: &str) -> bool {
        self.rails.contains_key(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ActorKind;
    use crate::types::{DisbursementActor, DisbursementStatus, Payee, PayeeKind};
    use chrono::Utc;
    use uuid::Uuid;

    struct DummyRail;

    #[async_trait]
    impl PayeeRail for DummyRail {
        fn kind(&self) -> &'static str {
            "dummy"
        }

        async fn settle(&self, _disbursement: &Disbursement) -> Result<(), String> {
            Ok(())
        }
    }

    fn sample_disbursement() -> Disbursement {
        Disbursement {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            disbursement_type: "grant_payout".to_string(),
            status: DisbursementStatus::Authorized,
            amount_minor: 1_000,
            currency: "USD".to_string(),
            payee: Payee {
                kind: PayeeKind::BankAccount,
                id: "acct-1".to_string(),
            },
            actor: DisbursementActor {
                kind: ActorKind::System,
                user_id: None,
                authority_proof: "SYSTEM".to_string(),
            },
            verification_record_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            authorized_at: Utc::now(),
            executed_at: None,
            failed_at: None,
            failure_reason: None,
        }
    }

    #[test]
    fn rail_registry_roundtrip() {
        let mut registry = RailRegistry::new();
        registry.register(Arc::new(DummyRail));
        assert!(registry.has("dummy"));
    }

    #[tokio::test]
    async fn dummy_rail_settles() {
        let rail = DummyRail;
        assert!(rail.settle(&sample_disbursement()).await.is_ok());
    }
}
