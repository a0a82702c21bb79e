//! Signal router: resolves external approval signals to workflow
//! instances and forwards them to the executor.
//!
//! Addressing is purely deterministic: the instance id is recomputed
//! from the claim id, so the starting side and the signaling side need
//! no shared lookup state.

use crate::error::{EngineError, Result};
use crate::executor::{TransitionOutcome, WorkflowExecutor};
use crate::instance::{ApprovalSignal, WorkflowId, WorkflowInstance};
use crate::port::claim_store::ClaimStoreClient;
use crate::port::instance_registry::{InstanceRegistry, RegistryError};
use crate::scheduler::TimerHandle;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of delivering a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// The decision was committed by this delivery.
    Applied(WorkflowInstance),

    /// The instance was already terminal. Not an error: upstream
    /// callers may legitimately retry or duplicate a delivery.
    AlreadyCompleted(WorkflowInstance),

    /// No instance exists for this claim.
    NotFound,
}

/// Routes approval signals to the right in-flight instance.
#[derive(Debug)]
pub struct SignalRouter<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    registry: Arc<R>,
    executor: Arc<WorkflowExecutor<R, C>>,
    timers: TimerHandle,
}

impl<R, C> SignalRouter<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    /// Create a new router.
    pub fn new(registry: Arc<R>, executor: Arc<WorkflowExecutor<R, C>>, timers: TimerHandle) -> Self {
        Self {
            registry,
            executor,
            timers,
        }
    }

    /// Deliver one signal to the instance addressed by its claim id.
    ///
    /// Exactly one in-flight delivery per instance can observe
    /// [`SignalOutcome::Applied`]; concurrent or late duplicates
    /// observe [`SignalOutcome::AlreadyCompleted`] and leave the
    /// record unchanged.
    pub async fn deliver(&self, signal: &ApprovalSignal) -> Result<SignalOutcome> {
        let id = WorkflowId::for_claim(signal.claim_id);
        debug!(
            workflow_id = %id,
            signal_id = %signal.signal_id,
            decision = %signal.decision,
            "routing approval signal"
        );

        let instance = match self.registry.load(&id).await {
            Ok(instance) => instance,
            Err(RegistryError::NotFound { .. }) => {
                debug!(workflow_id = %id, "signal for unknown instance");
                return Ok(SignalOutcome::NotFound);
            }
            Err(err) => return Err(EngineError::registry(err)),
        };

        if instance.is_terminal() {
            debug!(
                workflow_id = %id,
                state = %instance.state,
                "signal arrived after terminal state"
            );
            return Ok(SignalOutcome::AlreadyCompleted(instance));
        }

        match self.executor.apply_signal(&instance, signal).await? {
            TransitionOutcome::Completed(updated) => {
                info!(
                    workflow_id = %updated.id,
                    claim_id = %updated.claim_id,
                    state = %updated.state,
                    supervisor_id = %signal.supervisor_id,
                    "approval signal applied"
                );
                // The pending deadline no longer matters; a stale entry
                // that fires anyway is discarded by the re-load check.
                self.timers.cancel(updated.id.clone());
                Ok(SignalOutcome::Applied(updated))
            }
            TransitionOutcome::AlreadyCompleted(current) => {
                Ok(SignalOutcome::AlreadyCompleted(current))
            }
        }
    }
}
