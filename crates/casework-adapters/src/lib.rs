//! Mock-mode payee rail and settlement simulation harnesses.
//!
//! Out of scope for `casework-core` per spec.md §1 ("mock-mode simulation harnesses" named as
//! an external collaborator); these implement the `PayeeRail` trait the core's disbursement
//! execute phase calls through.

#![deny(unsafe_code)]

use async_trait::async_trait;
use casework_core::connectors::PayeeRail;
use casework_core::types::Disbursement;

/// Deterministic mock bank-transfer rail: always settles successfully.
#[derive(Debug, Clone, Default)]
pub struct MockBankAccountRail;

#[async_trait]
impl PayeeRail for MockBankAccountRail {
    fn kind(&self) -> &'static str {
        "bank_account"
    }

    async fn settle(&self, _disbursement: &Disbursement) -> Result<(), String> {
        Ok(())
    }
}

/// Deterministic mock wallet rail: always settles successfully.
#[derive(Debug, Clone, Default)]
pub struct MockWalletRail;

#[async_trait]
impl PayeeRail for MockWalletRail {
    fn kind(&self) -> &'static str {
        "wallet"
    }

    async fn settle(&self, _disbursement: &Disbursement) -> Result<(), String> {
        Ok(())
    }
}

/// Deterministic mock check-issuance rail: always settles successfully.
#[derive(Debug, Clone, Default)]
pub struct MockCheckRail;

#[async_trait]
impl PayeeRail for MockCheckRail {
    fn kind(&self) -> &'static str {
        "check"
    }

    async fn settle(&self, _disbursement: &Disbursement) -> Result<(), String> {
        Ok(())
    }
}

/// Deterministic failing rail, useful for exercising the `DISBURSEMENT_FAILED` path in tests.
#[derive(Debug, Clone)]
pub struct AlwaysFailRail {
    rail_kind: &'static str,
    reason: String,
}

impl AlwaysFailRail {
    pub fn new(rail_kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            rail_kind,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PayeeRail for AlwaysFailRail {
    fn kind(&self) -> &'static str {
        self.rail_kind
    }

    async fn settle(&self, _disbursement: &Disbursement) -> Result<(), String> {
        Err(self.reason.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casework_core::authority::ActorKind;
    use casework_core::types::{DisbursementActor, DisbursementStatus, Payee, PayeeKind};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_disbursement() -> Disbursement {
        Disbursement {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            disbursement_type: "grant_payout".to_string(),
            status: DisbursementStatus::Authorized,
            amount_minor: 10_000,
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

    #[tokio::test]
    async fn bank_account_rail_settles() {
        let rail = MockBankAccountRail;
        assert!(rail.settle(&sample_disbursement()).await.is_ok());
    }

    #[tokio::test]
    async fn always_fail_rail_reports_reason() {
        let rail = AlwaysFailRail::new("wire", "simulated outage");
        let err = rail.settle(&sample_disbursement()).await.unwrap_err();
        assert_eq!(err, "simulated outage");
    }
}
