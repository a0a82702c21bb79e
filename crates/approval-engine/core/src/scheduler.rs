//! Timer scheduler: earliest-first deadline tracking.
//!
//! One coordinating loop sleeps until the nearest deadline or until a
//! new instance is armed (which may be due sooner). The in-memory
//! queue is deliberately not durable: the persisted registry is
//! authoritative, so a clean shutdown simply drops the queue and
//! recovery re-arms it on the next start.
//!
//! Before driving a timeout the loop re-loads the instance from the
//! registry, so a stale entry that lost a race to a signal that
//! already landed is discarded instead of fired.

use crate::executor::{TransitionOutcome, WorkflowExecutor};
use crate::instance::{WorkflowId, WorkflowInstance};
use crate::port::claim_store::ClaimStoreClient;
use crate::port::instance_registry::InstanceRegistry;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Configuration for the [`TimerScheduler`].
#[derive(Debug, Clone)]
pub struct TimerSchedulerConfig {
    /// How long the loop parks when no deadline is queued.
    pub idle_park: Duration,

    /// Re-arm delay after a registry failure while firing.
    pub retry_delay: Duration,
}

impl Default for TimerSchedulerConfig {
    fn default() -> Self {
        Self {
            idle_park: Duration::from_secs(60),
            retry_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum TimerCommand {
    Arm {
        id: WorkflowId,
        deadline_at: DateTime<Utc>,
    },
    Cancel(WorkflowId),
}

/// Cheap cloneable handle for arming and cancelling deadlines.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    tx: mpsc::UnboundedSender<TimerCommand>,
}

impl TimerHandle {
    /// Arm (or re-arm) the deadline for an instance. Returns an error
    /// only once the scheduler loop has stopped.
    pub fn arm(&self, id: WorkflowId, deadline_at: DateTime<Utc>) -> Result<(), SchedulerStopped> {
        self.tx
            .send(TimerCommand::Arm { id, deadline_at })
            .map_err(|_| SchedulerStopped)
    }

    /// Drop the pending deadline for an instance. Best-effort: a stale
    /// entry that fires anyway is discarded by the re-load check.
    pub fn cancel(&self, id: WorkflowId) {
        let _ = self.tx.send(TimerCommand::Cancel(id));
    }

    /// Arm an instance's stored deadline.
    pub fn arm_instance(&self, instance: &WorkflowInstance) -> Result<(), SchedulerStopped> {
        self.arm(instance.id.clone(), instance.deadline_at)
    }
}

/// The scheduler loop is no longer running.
#[derive(Debug, thiserror::Error)]
#[error("Timer scheduler has stopped")]
pub struct SchedulerStopped;

enum Wake {
    Shutdown,
    Command(Option<TimerCommand>),
    Due,
}

/// The coordinating deadline loop.
pub struct TimerScheduler<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    registry: Arc<R>,
    executor: Arc<WorkflowExecutor<R, C>>,
    rx: mpsc::UnboundedReceiver<TimerCommand>,
    shutdown: watch::Receiver<bool>,
    config: TimerSchedulerConfig,
    /// Pending deadlines in earliest-first order.
    queue: BTreeMap<(DateTime<Utc>, WorkflowId), ()>,
    /// Reverse index for re-arming and cancellation.
    by_id: HashMap<WorkflowId, DateTime<Utc>>,
}

impl<R, C> TimerScheduler<R, C>
where
    R: InstanceRegistry,
    C: ClaimStoreClient,
{
    /// Create a scheduler and its command handle.
    pub fn new(
        registry: Arc<R>,
        executor: Arc<WorkflowExecutor<R, C>>,
        shutdown: watch::Receiver<bool>,
        config: TimerSchedulerConfig,
    ) -> (Self, TimerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                executor,
                rx,
                shutdown,
                config,
                queue: BTreeMap::new(),
                by_id: HashMap::new(),
            },
            TimerHandle { tx },
        )
    }

    /// Run until shutdown. Pending in-memory deadlines are dropped on
    /// exit; the registry remains authoritative.
    pub async fn run(mut self) {
        info!("timer scheduler started");
        loop {
            let wait = match self.queue.keys().next() {
                Some((deadline_at, _)) => (*deadline_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO),
                None => self.config.idle_park,
            };

            let wake = tokio::select! {
                changed = self.shutdown.changed() => {
                    match changed {
                        Ok(()) if !*self.shutdown.borrow() => continue,
                        _ => Wake::Shutdown,
                    }
                }
                cmd = self.rx.recv() => Wake::Command(cmd),
                _ = tokio::time::sleep(wait) => Wake::Due,
            };

            match wake {
                Wake::Shutdown | Wake::Command(None) => break,
                Wake::Command(Some(TimerCommand::Arm { id, deadline_at })) => {
                    self.insert(id, deadline_at);
                }
                Wake::Command(Some(TimerCommand::Cancel(id))) => {
                    self.remove(&id);
                }
                Wake::Due => self.fire_due().await,
            }
        }
        info!(
            pending = self.queue.len(),
            "timer scheduler stopped, dropping in-memory deadlines"
        );
    }

    fn insert(&mut self, id: WorkflowId, deadline_at: DateTime<Utc>) {
        if let Some(previous) = self.by_id.insert(id.clone(), deadline_at) {
            self.queue.remove(&(previous, id.clone()));
        }
        debug!(workflow_id = %id, deadline_at = %deadline_at, "deadline armed");
        self.queue.insert((deadline_at, id), ());
    }

    fn remove(&mut self, id: &WorkflowId) {
        if let Some(deadline_at) = self.by_id.remove(id) {
            self.queue.remove(&(deadline_at, id.clone()));
            debug!(workflow_id = %id, "deadline cancelled");
        }
    }

    async fn fire_due(&mut self) {
        let now = Utc::now();
        loop {
            let due = match self.queue.keys().next() {
                Some((deadline_at, id)) if *deadline_at <= now => {
                    (*deadline_at, id.clone())
                }
                _ => break,
            };
            self.queue.remove(&due);
            self.by_id.remove(&due.1);
            self.fire(due.1).await;
        }
    }

    /// Drive the timeout transition for one due instance.
    async fn fire(&mut self, id: WorkflowId) {
        let instance = match self.registry.load(&id).await {
            Ok(instance) => instance,
            Err(err) if err.is_not_found() => {
                warn!(workflow_id = %id, "deadline fired for unknown instance, dropping");
                return;
            }
            Err(err) => {
                warn!(
                    workflow_id = %id,
                    error = %err,
                    "failed to load instance for deadline, re-arming"
                );
                self.insert(id, Utc::now() + chrono::Duration::from_std(self.config.retry_delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(5)));
                return;
            }
        };

        if instance.is_terminal() {
            debug!(workflow_id = %id, state = %instance.state, "stale deadline, instance already terminal");
            return;
        }

        match self.executor.apply_timeout(&instance).await {
            Ok(TransitionOutcome::Completed(updated)) => {
                info!(
                    workflow_id = %updated.id,
                    claim_id = %updated.claim_id,
                    "instance timed out"
                );
            }
            Ok(TransitionOutcome::AlreadyCompleted(current)) => {
                debug!(
                    workflow_id = %current.id,
                    state = %current.state,
                    "timeout lost the race to a signal"
                );
            }
            Err(err) => {
                warn!(
                    workflow_id = %id,
                    error = %err,
                    "timeout transition failed, re-arming"
                );
                self.insert(
                    id,
                    Utc::now()
                        + chrono::Duration::from_std(self.config.retry_delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(5)),
                );
            }
        }
    }
}
