//! Recovery manager: reconstructs in-flight state after a restart.
//!
//! The in-memory deadline queue dies with the process; the registry
//! does not. On startup every non-terminal instance is re-armed with
//! its stored deadline (already-overdue deadlines fire immediately and
//! resolve through the normal timeout path), and terminal outcomes the
//! previous process committed but never delivered are re-propagated.
//!
//! Recovery is idempotent and safe to run while concurrent signal and
//! timer traffic for the same instances is already arriving: the
//! registry's conditional write resolves every race, not ordering.

use crate::error::{EngineError, Result};
use crate::executor::WorkflowExecutor;
use crate::port::claim_store::ClaimStoreClient;
use crate::port::instance_registry::InstanceRegistry;
use crate::scheduler::TimerHandle;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// What a recovery pass found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-terminal instances whose deadlines were re-armed.
    pub rearmed: usize,

    /// Of those, how many were already past their deadline.
    pub overdue: usize,

    /// Terminal outcomes re-delivered to the claim store.
    pub renotified: usize,
}

/// Rebuilds scheduler state and retries undelivered outcomes from the
/// registry.
#[derive(Debug)]
pub struct RecoveryManager<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    registry: Arc<R>,
    executor: Arc<WorkflowExecutor<R, C>>,
    timers: TimerHandle,
}

impl<R, C> Clone for RecoveryManager<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            timers: self.timers.clone(),
        }
    }
}

impl<R, C> RecoveryManager<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    /// Create a new recovery manager.
    pub fn new(
        registry: Arc<R>,
        executor: Arc<WorkflowExecutor<R, C>>,
        timers: TimerHandle,
    ) -> Self {
        Self {
            registry,
            executor,
            timers,
        }
    }

    /// Run one recovery pass. No instance is silently lost: everything
    /// `AWAITING_APPROVAL` in the registry ends up back in the
    /// deadline queue.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        let awaiting = self
            .registry
            .list_awaiting()
            .await
            .map_err(EngineError::registry)?;
        for instance in &awaiting {
            if instance.is_overdue(now) {
                report.overdue += 1;
            }
            self.timers
                .arm_instance(instance)
                .map_err(|_| EngineError::Shutdown)?;
            report.rearmed += 1;
        }

        let unpropagated = self
            .registry
            .list_unpropagated()
            .await
            .map_err(EngineError::registry)?;
        for instance in &unpropagated {
            if self.executor.propagate(instance).await {
                report.renotified += 1;
            }
        }

        info!(
            rearmed = report.rearmed,
            overdue = report.overdue,
            undelivered = unpropagated.len(),
            renotified = report.renotified,
            "recovery pass complete"
        );
        Ok(report)
    }

    /// Reconciliation entry point: retry undelivered terminal outcomes
    /// only. Used by the periodic pass between full recoveries.
    pub async fn reconcile_unpropagated(&self) -> Result<usize> {
        let unpropagated = self
            .registry
            .list_unpropagated()
            .await
            .map_err(EngineError::registry)?;
        let mut renotified = 0;
        for instance in &unpropagated {
            if self.executor.propagate(instance).await {
                renotified += 1;
            }
        }
        Ok(renotified)
    }
}
