//! Workflow executor: terminal transition logic.
//!
//! Conceptually one suspended process per live instance, resumable by
//! exactly two event kinds: an approval signal or a deadline expiry.
//! Either way the executor performs a single conditional write through
//! the registry, and only after that commit succeeds does it notify
//! the claim store. A failed notification therefore never leaves the
//! durable state ambiguous.

use crate::error::{EngineError, Result};
use crate::instance::{ApprovalSignal, WorkflowInstance};
use crate::port::claim_store::{ClaimStatus, ClaimStoreClient};
use crate::port::instance_registry::{InstanceRegistry, RegistryError, TerminalFields};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the [`WorkflowExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Inline claim store delivery attempts per terminal transition.
    pub propagation_max_attempts: u32,

    /// Base delay between delivery attempts, doubled per attempt.
    pub propagation_base_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            propagation_max_attempts: 3,
            propagation_base_backoff: Duration::from_millis(250),
        }
    }
}

/// Outcome of driving a terminal transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// This event won the race; the record now carries its outcome.
    Completed(WorkflowInstance),

    /// Another event already resolved the instance; nothing was
    /// written. Non-fatal: duplicate and late deliveries are expected.
    AlreadyCompleted(WorkflowInstance),
}

impl TransitionOutcome {
    /// The record as it stands after the attempt, whoever wrote it.
    pub fn instance(&self) -> &WorkflowInstance {
        match self {
            TransitionOutcome::Completed(i) | TransitionOutcome::AlreadyCompleted(i) => i,
        }
    }
}

/// Per-instance state machine logic shared by the signal path and the
/// timeout path.
#[derive(Debug)]
pub struct WorkflowExecutor<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    registry: Arc<R>,
    claim_store: Arc<C>,
    config: ExecutorConfig,
}

impl<R, C> WorkflowExecutor<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    /// Create a new executor with default configuration.
    pub fn new(registry: Arc<R>, claim_store: Arc<C>) -> Self {
        Self::with_config(registry, claim_store, ExecutorConfig::default())
    }

    /// Create a new executor with custom configuration.
    pub fn with_config(registry: Arc<R>, claim_store: Arc<C>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            claim_store,
            config,
        }
    }

    /// Resolve an instance with a supervisor decision.
    pub async fn apply_signal(
        &self,
        instance: &WorkflowInstance,
        signal: &ApprovalSignal,
    ) -> Result<TransitionOutcome> {
        debug!(
            workflow_id = %instance.id,
            signal_id = %signal.signal_id,
            decision = %signal.decision,
            supervisor_id = %signal.supervisor_id,
            "applying approval signal"
        );
        let fields = TerminalFields::decision(
            signal.decision,
            signal.supervisor_id.clone(),
            signal.comments.clone(),
        );
        self.complete(instance, fields).await
    }

    /// Resolve an instance whose deadline elapsed without a signal.
    /// A valid terminal outcome, not a failure condition.
    pub async fn apply_timeout(&self, instance: &WorkflowInstance) -> Result<TransitionOutcome> {
        debug!(
            workflow_id = %instance.id,
            deadline_at = %instance.deadline_at,
            "applying deadline expiry"
        );
        self.complete(instance, TerminalFields::timed_out()).await
    }

    /// Drive the single terminal transition through the registry's
    /// conditional write, then propagate the outcome.
    ///
    /// A version conflict means a concurrent transition got there
    /// first: the instance is re-loaded and, since the only
    /// version-bumping writes are terminal, the fresh record is
    /// terminal and the attempt resolves to `AlreadyCompleted`.
    async fn complete(
        &self,
        instance: &WorkflowInstance,
        fields: TerminalFields,
    ) -> Result<TransitionOutcome> {
        let mut expected = instance.version;
        loop {
            match self.registry.transition(&instance.id, expected, &fields).await {
                Ok(updated) => {
                    info!(
                        workflow_id = %updated.id,
                        claim_id = %updated.claim_id,
                        state = %updated.state,
                        version = updated.version,
                        "workflow instance completed"
                    );
                    self.propagate(&updated).await;
                    return Ok(TransitionOutcome::Completed(updated));
                }
                Err(RegistryError::VersionConflict {
                    expected: e,
                    actual,
                    ..
                }) => {
                    debug!(
                        workflow_id = %instance.id,
                        expected = e,
                        actual,
                        "lost transition race, re-loading"
                    );
                    let current = self
                        .registry
                        .load(&instance.id)
                        .await
                        .map_err(EngineError::registry)?;
                    if current.is_terminal() {
                        return Ok(TransitionOutcome::AlreadyCompleted(current));
                    }
                    // Conflicting write was not terminal; retry against
                    // the stored version.
                    expected = current.version;
                }
                Err(err) => return Err(EngineError::registry(err)),
            }
        }
    }

    /// Deliver a committed terminal outcome to the claim store,
    /// best-effort with bounded exponential backoff.
    ///
    /// Returns `true` once the claim store acknowledged. On exhaustion
    /// the record stays unpropagated and the reconciliation pass owns
    /// the retry; the committed transition is never affected.
    pub async fn propagate(&self, instance: &WorkflowInstance) -> bool {
        let Some(status) = ClaimStatus::from_terminal_state(instance.state) else {
            return false;
        };

        let mut backoff = self.config.propagation_base_backoff;
        for attempt in 1..=self.config.propagation_max_attempts {
            match self
                .claim_store
                .update_claim_status(instance.claim_id, status)
                .await
            {
                Ok(()) => {
                    if let Err(err) = self.registry.mark_propagated(&instance.id, Utc::now()).await
                    {
                        // The outcome reached the claim store but the
                        // ack did not land; reconciliation may deliver
                        // again, which the claim side must tolerate.
                        warn!(
                            workflow_id = %instance.id,
                            error = %err,
                            "delivered outcome but failed to record the ack"
                        );
                    }
                    info!(
                        workflow_id = %instance.id,
                        claim_id = %instance.claim_id,
                        status = %status,
                        "terminal outcome propagated to claim store"
                    );
                    return true;
                }
                Err(err) => {
                    warn!(
                        workflow_id = %instance.id,
                        claim_id = %instance.claim_id,
                        attempt,
                        error = %err,
                        "claim store notification failed"
                    );
                    if attempt < self.config.propagation_max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        warn!(
            workflow_id = %instance.id,
            claim_id = %instance.claim_id,
            "outcome left unpropagated, reconciliation will retry"
        );
        false
    }
}
