use thiserror::Error;

/// Core domain and infrastructure errors.
///
/// Validation and domain-invariant variants carry the named error codes from the
/// specification so callers at the transport edge can surface stable codes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("SUPERSEDED_COMMIT_NOT_FOUND: target commit '{0}' does not exist")]
    SupersededCommitNotFound(String),

    #[error("CROSS_TENANT_SUPERSESSION_FORBIDDEN: commit belongs to a different tenant")]
    CrossTenantSupersessionForbidden,

    #[error("COMMIT_ALREADY_SUPERSEDED: target commit '{0}' was already superseded")]
    CommitAlreadySuperseded(String),

    #[error("INSUFFICIENT_AUTHORITY_FOR_SUPERSESSION: authority {actual} < required {required}")]
    InsufficientAuthorityForSupersession { required: i32, actual: i32 },

    #[error("SYSTEM_CANNOT_SUPERSEDE_HUMAN_AUTHORITY")]
    SystemCannotSupersedeHumanAuthority,

    #[error("EQUAL_AUTHORITY_SUPERSESSION_REQUIRES_ESCALATION")]
    EqualAuthoritySupersessionRequiresEscalation,

    #[error("ILLEGAL_LIFECYCLE_TRANSITION: cannot move from {from} to {to}")]
    IllegalLifecycleTransition { from: String, to: String },

    #[error("CASE_NOT_FOUND: {0}")]
    CaseNotFound(String),

    #[error("DISBURSEMENT_NOT_FOUND: {0}")]
    DisbursementNotFound(String),

    #[error("LIFECYCLE_INVARIANT_VIOLATION: {0}")]
    LifecycleInvariantViolation(String),

    #[error("INVALID_CURSOR")]
    InvalidCursor,

    #[error("ledger hash chain corrupted at index {0}")]
    LedgerChainCorrupted(u64),

    #[error("ledger signature verification failed for entry '{0}'")]
    SignatureInvalid(String),

    #[error("key store error: {0}")]
    KeyStore(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("clock unavailable: {0}")]
    ClockUnavailable(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::SupersededCommitNotFound(_) => "SUPERSEDED_COMMIT_NOT_FOUND",
            CoreError::CrossTenantSupersessionForbidden => "CROSS_TENANT_SUPERSESSION_FORBIDDEN",
            CoreError::CommitAlreadySuperseded(_) => "COMMIT_ALREADY_SUPERSEDED",
            CoreError::InsufficientAuthorityForSupersession { .. } => {
                "INSUFFICIENT_AUTHORITY_FOR_SUPERSESSION"
            }
            CoreError::SystemCannotSupersedeHumanAuthority => {
                "SYSTEM_CANNOT_SUPERSEDE_HUMAN_AUTHORITY"
            }
            CoreError::EqualAuthoritySupersessionRequiresEscalation => {
                "EQUAL_AUTHORITY_SUPERSESSION_REQUIRES_ESCALATION"
            }
            CoreError::IllegalLifecycleTransition { .. } => "ILLEGAL_LIFECYCLE_TRANSITION",
            CoreError::CaseNotFound(_) => "CASE_NOT_FOUND",
            CoreError::DisbursementNotFound(_) => "DISBURSEMENT_NOT_FOUND",
            CoreError::LifecycleInvariantViolation(_) => "LIFECYCLE_INVARIANT_VIOLATION",
            CoreError::InvalidCursor => "INVALID_CURSOR",
            CoreError::LedgerChainCorrupted(_) => "LEDGER_CHAIN_CORRUPTED",
            CoreError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            CoreError::KeyStore(_) => "KEY_STORE_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Database(_) => "DATABASE_ERROR",
            CoreError::ClockUnavailable(_) => "CLOCK_UNAVAILABLE",
        }
    }

    /// True for errors that should never be logged as application errors (shape/validation).
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_) | CoreError::InvalidCursor)
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
