//! Engine-level error types.
//!
//! The ports carry backend-generic error enums; at the engine surface
//! those are erased into [`EngineError`] so callers and spawned tasks
//! do not need to thread backend type parameters around.

use crate::instance::ClaimId;
use std::fmt::Display;
use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A workflow instance already exists for this claim.
    #[error("Workflow already started for claim {0}")]
    AlreadyStarted(ClaimId),

    /// A registry operation failed for a reason other than a version
    /// conflict. Fatal to this operation only; the caller may retry.
    #[error("Registry operation failed: {0}")]
    Registry(String),

    /// A claim store call failed after all inline retries.
    #[error("Claim store operation failed: {0}")]
    ClaimStore(String),

    /// The claim does not exist on the claim side.
    #[error("Claim not found: {0}")]
    ClaimNotFound(ClaimId),

    /// The engine has been shut down and no longer accepts work.
    #[error("Engine is shut down")]
    Shutdown,
}

impl EngineError {
    /// Erase a registry error into an engine error.
    pub fn registry(err: impl Display) -> Self {
        Self::Registry(err.to_string())
    }

    /// Erase a claim store error into an engine error.
    pub fn claim_store(err: impl Display) -> Self {
        Self::ClaimStore(err.to_string())
    }
}

/// Result type with engine error.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::AlreadyStarted(ClaimId(42));
        assert_eq!(err.to_string(), "Workflow already started for claim 42");

        let err = EngineError::registry("disk full");
        assert_eq!(err.to_string(), "Registry operation failed: disk full");
    }
}
