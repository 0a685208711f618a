use thiserror::Error;

/// Triage-core error taxonomy.
///
/// Each variant maps to one of the error kinds in the component design: validation,
/// auth, not_found, rate_limited, policy, upstream, internal. Conflict outcomes that
/// are returned as successful status tags (`ALREADY_FROZEN`, `ALREADY_EXISTS`) are
/// not represented here — they are ordinary `Ok` values.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("policy denied: {0}")]
    Policy(String),

    #[error("stage order violation: expected '{expected}', got '{actual}'")]
    StageViolation { expected: String, actual: String },

    #[error("upstream dependency unavailable: {0}")]
    Upstream(String),

    #[error("ledger integrity error: {0}")]
    Ledger(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TriageError {
    pub fn stage_violation(expected: &str, actual: &str) -> Self {
        Self::StageViolation {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
