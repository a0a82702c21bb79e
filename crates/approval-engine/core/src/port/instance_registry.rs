//! InstanceRegistry port trait definition.
//!
//! This module defines the [`InstanceRegistry`] trait that backends must
//! implement to provide durable workflow instance storage. The
//! conditional [`transition`](InstanceRegistry::transition) write is the
//! sole concurrency-control mechanism in the system; no per-instance
//! locks exist anywhere.

use crate::instance::{Decision, WorkflowId, WorkflowInstance, WorkflowState};
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Errors that can occur when operating on the instance registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError<E> {
    /// An instance with this id already exists.
    #[error("Instance already exists: {id}")]
    AlreadyExists {
        /// The conflicting instance id.
        id: WorkflowId,
    },

    /// The requested instance was not found.
    #[error("Instance not found: {id}")]
    NotFound {
        /// The instance id that was not found.
        id: WorkflowId,
    },

    /// Conflict error - optimistic locking detected a version mismatch.
    #[error("Conflict on {id}: expected version {expected}, but current is {actual}")]
    VersionConflict {
        /// The instance the write targeted.
        id: WorkflowId,
        /// The version the caller expected.
        expected: u64,
        /// The version actually stored.
        actual: u64,
    },

    /// Backend-specific error. Fatal to this operation only; callers
    /// retry, the record is never left half-written.
    #[error("Backend error: {0:?}")]
    Backend(E),
}

impl<E> RegistryError<E> {
    /// Create an already exists error.
    pub fn already_exists(id: WorkflowId) -> Self {
        Self::AlreadyExists { id }
    }

    /// Create a not found error.
    pub fn not_found(id: WorkflowId) -> Self {
        Self::NotFound { id }
    }

    /// Create a version conflict error.
    pub fn conflict(id: WorkflowId, expected: u64, actual: u64) -> Self {
        Self::VersionConflict {
            id,
            expected,
            actual,
        }
    }

    /// Check if this is a version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl<E> From<E> for RegistryError<E> {
    fn from(err: E) -> Self {
        RegistryError::Backend(err)
    }
}

/// The fields written by a terminal transition.
///
/// Exactly one of these is ever committed per instance: either a
/// decision outcome carrying supervisor data, or a timeout carrying
/// none.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalFields {
    /// The terminal state to move to.
    pub state: WorkflowState,

    /// The decision, for `APPROVED`/`REJECTED` outcomes.
    pub decision: Option<Decision>,

    /// The deciding supervisor, for decision outcomes.
    pub supervisor_id: Option<String>,

    /// Decision comments, for decision outcomes.
    pub comments: Option<String>,

    /// When the instance completed.
    pub completed_at: DateTime<Utc>,
}

impl TerminalFields {
    /// Terminal fields for a supervisor decision.
    pub fn decision(
        decision: Decision,
        supervisor_id: impl Into<String>,
        comments: Option<String>,
    ) -> Self {
        Self {
            state: decision.terminal_state(),
            decision: Some(decision),
            supervisor_id: Some(supervisor_id.into()),
            comments,
            completed_at: Utc::now(),
        }
    }

    /// Terminal fields for a deadline expiry.
    pub fn timed_out() -> Self {
        Self {
            state: WorkflowState::TimedOut,
            decision: None,
            supervisor_id: None,
            comments: None,
            completed_at: Utc::now(),
        }
    }
}

/// Trait for durable workflow instance storage.
///
/// The registry is the only shared resource in the system.
/// Implementations must provide:
/// - Create-once semantics per instance id
/// - Optimistic locking for concurrent state writes
/// - Scan queries for recovery and reconciliation
///
/// # Concurrency Model
///
/// 1. `transition` requires the `expected_version` the caller loaded.
/// 2. If the stored version differs, return
///    [`RegistryError::VersionConflict`] without writing anything.
/// 3. The caller re-loads and either observes a terminal record
///    (the race was lost) or retries with the fresh version.
///
/// This lets the timer loop and the signal router attempt transitions
/// concurrently without coordination; exactly one wins per instance.
#[async_trait::async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// The error type for this implementation.
    type Error: Debug + Send + Sync + 'static;

    /// Persist a freshly created instance.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::AlreadyExists`] if the id is present. Since
    ///   ids are deterministic per claim, this also enforces the
    ///   at-most-one-instance-per-claim invariant.
    async fn create(&self, instance: &WorkflowInstance) -> Result<(), RegistryError<Self::Error>>;

    /// Load the current record for an instance.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if no instance has this id.
    async fn load(&self, id: &WorkflowId) -> Result<WorkflowInstance, RegistryError<Self::Error>>;

    /// Atomically write a terminal state if the stored version still
    /// matches `expected_version`, incrementing the version by 1.
    ///
    /// # Returns
    ///
    /// The updated record as persisted.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::VersionConflict`] if the stored version
    ///   differs (another transition won the race).
    /// - [`RegistryError::NotFound`] if no instance has this id.
    async fn transition(
        &self,
        id: &WorkflowId,
        expected_version: u64,
        fields: &TerminalFields,
    ) -> Result<WorkflowInstance, RegistryError<Self::Error>>;

    /// All instances still in `AWAITING_APPROVAL`, for the recovery
    /// scan that rebuilds the in-memory deadline queue.
    async fn list_awaiting(&self) -> Result<Vec<WorkflowInstance>, RegistryError<Self::Error>>;

    /// Terminal instances whose outcome has not yet been acknowledged
    /// by the claim store, for the reconciliation pass.
    async fn list_unpropagated(&self) -> Result<Vec<WorkflowInstance>, RegistryError<Self::Error>>;

    /// Record that the terminal outcome was delivered to the claim
    /// store. Delivery bookkeeping only: does not touch `version` or
    /// any workflow field, and is a no-op on repeat delivery.
    async fn mark_propagated(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError<Self::Error>>;
}
