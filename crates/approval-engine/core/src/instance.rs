//! Workflow instance domain types.
//!
//! This module defines the durable [`WorkflowInstance`] record that
//! represents one claim's approval process, together with the state and
//! decision enums and the ephemeral [`ApprovalSignal`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a claim in the external claim store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(pub i64);

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a workflow instance.
///
/// Derived deterministically from the claim id so that the starting
/// side and the signaling side address the same instance without any
/// shared lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    /// Compute the instance id for a claim: `claim-workflow-<claimId>`.
    pub fn for_claim(claim_id: ClaimId) -> Self {
        Self(format!("claim-workflow-{}", claim_id.0))
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    /// Initial state: waiting for a supervisor decision.
    AwaitingApproval,

    /// Terminal: a supervisor approved the claim.
    Approved,

    /// Terminal: a supervisor rejected the claim.
    Rejected,

    /// Terminal: the deadline elapsed without a decision.
    TimedOut,
}

impl WorkflowState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::AwaitingApproval => "AWAITING_APPROVAL",
            WorkflowState::Approved => "APPROVED",
            WorkflowState::Rejected => "REJECTED",
            WorkflowState::TimedOut => "TIMED_OUT",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AWAITING_APPROVAL" => Some(WorkflowState::AwaitingApproval),
            "APPROVED" => Some(WorkflowState::Approved),
            "REJECTED" => Some(WorkflowState::Rejected),
            "TIMED_OUT" => Some(WorkflowState::TimedOut),
            _ => None,
        }
    }

    /// Whether this state is terminal. Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowState::AwaitingApproval)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supervisor's decision on a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "APPROVED",
            Decision::Rejected => "REJECTED",
        }
    }

    /// Parse from the string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVED" => Some(Decision::Approved),
            "REJECTED" => Some(Decision::Rejected),
            _ => None,
        }
    }

    /// The terminal workflow state this decision resolves to.
    pub fn terminal_state(&self) -> WorkflowState {
        match self {
            Decision::Approved => WorkflowState::Approved,
            Decision::Rejected => WorkflowState::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable record representing one claim's approval process.
///
/// Created exactly once per claim, mutated only through the registry's
/// conditional write, and retained for audit after reaching a terminal
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Deterministic instance id (`claim-workflow-<claimId>`).
    pub id: WorkflowId,

    /// The claim this instance belongs to.
    pub claim_id: ClaimId,

    /// Current state.
    pub state: WorkflowState,

    /// When the instance was created.
    pub created_at: DateTime<Utc>,

    /// When a pending instance resolves to `TIMED_OUT` absent a signal.
    pub deadline_at: DateTime<Utc>,

    /// The supervisor decision, once one landed.
    pub decision: Option<Decision>,

    /// The supervisor who decided.
    pub supervisor_id: Option<String>,

    /// Free-form decision comments.
    pub comments: Option<String>,

    /// Monotonic version, incremented by exactly 1 per successful
    /// state write. Drives the registry's optimistic concurrency.
    pub version: u64,

    /// When the instance reached its terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// When the terminal outcome was acknowledged by the claim store.
    /// Delivery bookkeeping only; writing it does not bump `version`.
    pub propagated_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create a new instance in `AWAITING_APPROVAL` with the given
    /// deadline. The create call in the registry is write number one,
    /// so a freshly persisted instance carries version 1.
    pub fn new(claim_id: ClaimId, deadline_at: DateTime<Utc>) -> Self {
        Self {
            id: WorkflowId::for_claim(claim_id),
            claim_id,
            state: WorkflowState::AwaitingApproval,
            created_at: Utc::now(),
            deadline_at,
            decision: None,
            supervisor_id: None,
            comments: None,
            version: 1,
            completed_at: None,
            propagated_at: None,
        }
    }

    /// Whether this instance has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the deadline has elapsed relative to `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline_at <= now
    }
}

/// An external approval event addressed to a specific claim.
///
/// Ephemeral: its effect is folded into the instance record or
/// discarded, it is never persisted as its own entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSignal {
    /// Correlation id for logs; carries no addressing meaning.
    pub signal_id: Uuid,

    /// The claim the decision is for.
    pub claim_id: ClaimId,

    /// The supervisor who decided.
    pub supervisor_id: String,

    /// The decision.
    pub decision: Decision,

    /// Free-form comments.
    pub comments: Option<String>,

    /// When the signal was received.
    pub received_at: DateTime<Utc>,
}

impl ApprovalSignal {
    /// Create a new signal received now.
    pub fn new(
        claim_id: ClaimId,
        supervisor_id: impl Into<String>,
        decision: Decision,
        comments: Option<String>,
    ) -> Self {
        Self {
            signal_id: Uuid::new_v4(),
            claim_id,
            supervisor_id: supervisor_id.into(),
            decision,
            comments,
            received_at: Utc::now(),
        }
    }
}
