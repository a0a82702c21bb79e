//! ClaimStoreClient port for the external claim service.
//!
//! The claim store is a collaborator, not part of this system: it
//! triggers workflow starts and receives terminal outcomes. Calls are
//! bounded-timeout, best-effort network operations performed strictly
//! after durable local commit.

use crate::instance::{ClaimId, WorkflowState};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Errors from claim store operations.
#[derive(Debug, thiserror::Error)]
pub enum ClaimStoreError<E> {
    /// The store could not be reached or the call timed out.
    /// Retried with backoff; never reverses a committed transition.
    #[error("Claim store unavailable: {0:?}")]
    Unavailable(E),

    /// The claim does not exist on the claim side.
    #[error("Claim not found: {claim_id}")]
    ClaimNotFound {
        /// The unknown claim id.
        claim_id: ClaimId,
    },
}

impl<E> ClaimStoreError<E> {
    /// Create a claim not found error.
    pub fn claim_not_found(claim_id: ClaimId) -> Self {
        Self::ClaimNotFound { claim_id }
    }
}

/// Claim status values propagated on terminal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Approved,
    Rejected,
    TimedOut,
}

impl ClaimStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Approved => "APPROVED",
            ClaimStatus::Rejected => "REJECTED",
            ClaimStatus::TimedOut => "TIMED_OUT",
        }
    }

    /// The status a terminal workflow state maps to, `None` for
    /// non-terminal states.
    pub fn from_terminal_state(state: WorkflowState) -> Option<Self> {
        match state {
            WorkflowState::Approved => Some(ClaimStatus::Approved),
            WorkflowState::Rejected => Some(ClaimStatus::Rejected),
            WorkflowState::TimedOut => Some(ClaimStatus::TimedOut),
            WorkflowState::AwaitingApproval => None,
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim details as the claim store reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// The claim id.
    pub claim_id: ClaimId,

    /// Claim-side status string. The claim store owns its own status
    /// vocabulary (`PENDING` before any outcome lands here).
    pub status: String,

    /// Supervisor assigned to the claim, if any.
    pub supervisor_id: Option<String>,
}

/// Trait for the consumed claim store interface.
///
/// One-directional: the workflow side calls the claim side, never the
/// reverse. Implementations wrap whatever transport the claim service
/// exposes.
#[async_trait::async_trait]
pub trait ClaimStoreClient: Send + Sync {
    /// The error type for this implementation.
    type Error: Debug + Send + Sync + 'static;

    /// Fetch claim details.
    ///
    /// # Arguments
    ///
    /// * `claim_id` - The claim to fetch.
    async fn get_claim(
        &self,
        claim_id: ClaimId,
    ) -> Result<ClaimRecord, ClaimStoreError<Self::Error>>;

    /// Propagate a terminal outcome to the claim record.
    ///
    /// Invoked by the executor after the transition is durably
    /// committed. Must be idempotent on the claim side: the engine
    /// delivers at-least-once under failures.
    ///
    /// # Arguments
    ///
    /// * `claim_id` - The claim to update.
    /// * `status` - The terminal status.
    async fn update_claim_status(
        &self,
        claim_id: ClaimId,
        status: ClaimStatus,
    ) -> Result<(), ClaimStoreError<Self::Error>>;
}
