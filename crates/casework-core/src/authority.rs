//! Authority policy (C4): derives an authority level from actor kind + proof, and validates
//! supersession rules between a new commit and the commit it targets.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Tagged actor variant, per design notes: represented as a tag plus optional user id rather
/// than two owning structs, keeping the schema stable while policy evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    System,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum AuthorityLevel {
    SystemAutomated = 1,
    HumanVerifier = 2,
    HumanAdmin = 3,
    ExecutiveOverride = 4,
}

impl AuthorityLevel {
    pub fn value(self) -> i32 {
        self as i32
    }
}

/// Derive the authority level for an actor from `(actorKind, authorityProof)`.
///
/// `SYSTEM` is always `SystemAutomated`. For `HUMAN`, the prefix of `authorityProof` selects
/// the level: `EXEC:` -> ExecutiveOverride, `ADMIN:` -> HumanAdmin, otherwise HumanVerifier.
pub fn derive_authority_level(actor_kind: ActorKind, authority_proof: &str) -> AuthorityLevel {
    match actor_kind {
        ActorKind::System => AuthorityLevel::SystemAutomated,
        ActorKind::Human => {
            if authority_proof.starts_with("EXEC:") {
                AuthorityLevel::ExecutiveOverride
            } else if authority_proof.starts_with("ADMIN:") {
                AuthorityLevel::HumanAdmin
            } else {
                AuthorityLevel::HumanVerifier
            }
        }
    }
}

/// A minimal view of the target commit needed to validate a supersession.
pub struct SupersessionTarget {
    pub tenant_id: String,
    pub already_superseded: bool,
    pub actor_kind: ActorKind,
    pub authority_proof: String,
}

/// Validate that `(candidate_tenant_id, candidate_actor_kind, candidate_authority_proof)` may
/// supersede `target`. Named error codes per spec.md §4.4.
pub fn validate_supersession(
    candidate_tenant_id: &str,
    candidate_actor_kind: ActorKind,
    candidate_authority_proof: &str,
    target: &SupersessionTarget,
) -> Result<(), CoreError> {
    if candidate_tenant_id != target.tenant_id {
        return Err(CoreError::CrossTenantSupersessionForbidden);
    }
    if target.already_superseded {
        return Err(CoreError::CommitAlreadySuperseded(target.tenant_id.clone()));
    }

    let candidate_level = derive_authority_level(candidate_actor_kind, candidate_authority_proof);
    let target_level = derive_authority_level(target.actor_kind, &target.authority_proof);

    if candidate_actor_kind == ActorKind::System && target.actor_kind == ActorKind::Human {
        return Err(CoreError::SystemCannotSupersedeHumanAuthority);
    }

    if candidate_level == target_level {
        return Err(CoreError::EqualAuthoritySupersessionRequiresEscalation);
    }

    if candidate_level < target_level {
        return Err(CoreError::InsufficientAuthorityForSupersession {
            required: target_level.value(),
            actual: candidate_level.value(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_actor_is_always_level_one() {
        assert_eq!(
            derive_authority_level(ActorKind::System, ""),
            AuthorityLevel::SystemAutomated
        );
    }

    #[test]
    fn human_prefix_selects_level() {
        assert_eq!(
            derive_authority_level(ActorKind::Human, "EXEC:alice"),
            AuthorityLevel::ExecutiveOverride
        );
        assert_eq!(
            derive_authority_level(ActorKind::Human, "ADMIN:bob"),
            AuthorityLevel::HumanAdmin
        );
        assert_eq!(
            derive_authority_level(ActorKind::Human, "carol"),
            AuthorityLevel::HumanVerifier
        );
    }

    #[test]
    fn system_cannot_supersede_human() {
        let target = SupersessionTarget {
            tenant_id: "t1".to_string(),
            already_superseded: false,
            actor_kind: ActorKind::Human,
            authority_proof: "ADMIN:bob".to_string(),
        };
        let err = validate_supersession("t1", ActorKind::System, "", &target).unwrap_err();
        assert!(matches!(err, CoreError::SystemCannotSupersedeHumanAuthority));
    }

    #[test]
    fn equal_authority_requires_escalation() {
        let target = SupersessionTarget {
            tenant_id: "t1".to_string(),
            already_superseded: false,
            actor_kind: ActorKind::Human,
            authority_proof: "ADMIN:bob".to_string(),
        };
        let err =
            validate_supersession("t1", ActorKind::Human, "ADMIN:carol", &target).unwrap_err();
        assert!(matches!(
            err,
            CoreError::EqualAuthoritySupersessionRequiresEscalation
        ));
    }

    #[test]
    fn cross_tenant_is_forbidden() {
        let target = SupersessionTarget {
            tenant_id: "t1".to_string(),
            already_superseded: false,
            actor_kind: ActorKind::Human,
            authority_proof: "carol".to_string(),
        };
        let err =
            validate_supersession("t2", ActorKind::Human, "ADMIN:bob", &target).unwrap_err();
        assert!(matches!(err, CoreError::CrossTenantSupersessionForbidden));
    }

    #[test]
    fn already_superseded_is_rejected() {
        let target = SupersessionTarget {
            tenant_id: "t1".to_string(),
            already_superseded: true,
            actor_kind: ActorKind::Human,
            authority_proof: "carol".to_string(),
        };
        let err =
            validate_supersession("t1", ActorKind::Human, "ADMIN:bob", &target).unwrap_err();
        assert!(matches!(err, CoreError::CommitAlreadySuperseded(_)));
    }

    #[test]
    fn higher_authority_may_supersede() {
        let target = SupersessionTarget {
            tenant_id: "t1".to_string(),
            already_superseded: false,
            actor_kind: ActorKind::Human,
            authority_proof: "carol".to_string(),
        };
        assert!(validate_supersession("t1", ActorKind::Human, "ADMIN:bob", &target).is_ok());
    }
}
