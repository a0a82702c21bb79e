//! ApprovalEngine: the facade wiring registry, executor, router,
//! scheduler and recovery together.
//!
//! Construction runs a recovery pass and spawns the timer loop plus a
//! periodic reconciliation task. `shutdown` flips the watch channel
//! and joins the tasks; in-memory deadlines are dropped deliberately,
//! the persisted registry is authoritative across restarts.

use crate::error::{EngineError, Result};
use crate::executor::{ExecutorConfig, WorkflowExecutor};
use crate::instance::{ApprovalSignal, ClaimId, Decision, WorkflowInstance};
use crate::port::claim_store::{ClaimRecord, ClaimStoreClient, ClaimStoreError};
use crate::port::instance_registry::{InstanceRegistry, RegistryError};
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::router::{SignalOutcome, SignalRouter};
use crate::scheduler::{TimerHandle, TimerScheduler, TimerSchedulerConfig};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default deadline horizon: 30 days from instance creation.
pub const DEFAULT_APPROVAL_DEADLINE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for the [`ApprovalEngine`].
#[derive(Debug, Clone)]
pub struct ApprovalEngineConfig {
    /// How long a new instance waits for a decision before timing out.
    pub approval_deadline: Duration,

    /// How often the reconciliation pass retries undelivered outcomes.
    pub reconcile_interval: Duration,

    /// Executor (propagation retry) settings.
    pub executor: ExecutorConfig,

    /// Timer scheduler settings.
    pub scheduler: TimerSchedulerConfig,
}

impl Default for ApprovalEngineConfig {
    fn default() -> Self {
        Self {
            approval_deadline: DEFAULT_APPROVAL_DEADLINE,
            reconcile_interval: Duration::from_secs(60),
            executor: ExecutorConfig::default(),
            scheduler: TimerSchedulerConfig::default(),
        }
    }
}

impl ApprovalEngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approval_deadline(mut self, deadline: Duration) -> Self {
        self.approval_deadline = deadline;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_scheduler(mut self, scheduler: TimerSchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Apply environment overrides on top of this configuration.
    ///
    /// Recognized variables:
    /// - `APPROVAL_DEADLINE_SECS`
    /// - `APPROVAL_RECONCILE_INTERVAL_SECS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_u64("APPROVAL_DEADLINE_SECS") {
            config.approval_deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("APPROVAL_RECONCILE_INTERVAL_SECS") {
            config.reconcile_interval = Duration::from_secs(secs);
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(var = name, value = %raw, "ignoring unparseable environment override");
                None
            }
        },
        Err(_) => None,
    }
}

/// Narrow capability handed to the claim side: it can start a workflow
/// and nothing else. One-directional by design; the workflow side in
/// turn talks to the claim side only through [`ClaimStoreClient`].
#[async_trait::async_trait]
pub trait WorkflowStarter: Send + Sync {
    /// Create the approval instance for a freshly persisted claim and
    /// return immediately. Callers must tolerate failure here without
    /// rolling back their own claim record.
    async fn start_workflow(&self, claim_id: ClaimId) -> Result<WorkflowInstance>;
}

/// The durable claim approval workflow engine.
pub struct ApprovalEngine<R, C>
where
    R: InstanceRegistry + 'static,
    C: ClaimStoreClient + 'static,
{
    config: ApprovalEngineConfig,
    registry: Arc<R>,
    claim_store: Arc<C>,
    router: SignalRouter<R, C>,
    recovery: RecoveryManager<R, C>,
    timers: TimerHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R, C> ApprovalEngine<R, C>
where
    R: InstanceRegistry + 'static,
    C: ClaimStoreClient + 'static,
{
    /// Start the engine: spawn the timer loop and the reconciler, then
    /// run one recovery pass so every in-flight instance in the
    /// registry is resumed before traffic is accepted.
    pub async fn start(
        registry: Arc<R>,
        claim_store: Arc<C>,
        config: ApprovalEngineConfig,
    ) -> Result<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let executor = Arc::new(WorkflowExecutor::with_config(
            Arc::clone(&registry),
            Arc::clone(&claim_store),
            config.executor.clone(),
        ));
        let (scheduler, timers) = TimerScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            shutdown_rx.clone(),
            config.scheduler.clone(),
        );
        let router = SignalRouter::new(Arc::clone(&registry), Arc::clone(&executor), timers.clone());
        let recovery =
            RecoveryManager::new(Arc::clone(&registry), Arc::clone(&executor), timers.clone());

        let timer_task = tokio::spawn(scheduler.run());
        let reconciler_task = tokio::spawn(reconcile_loop(
            recovery.clone(),
            config.reconcile_interval,
            shutdown_rx,
        ));

        let engine = Self {
            config,
            registry,
            claim_store,
            router,
            recovery,
            timers,
            shutdown,
            tasks: vec![timer_task, reconciler_task],
        };
        engine.recovery.recover().await?;
        info!("approval engine started");
        Ok(engine)
    }

    /// Create the workflow instance for a claim and arm its deadline.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyStarted`] if an instance already exists
    ///   for this claim (at most one instance per claim, ever).
    pub async fn start_claim(&self, claim_id: ClaimId) -> Result<WorkflowInstance> {
        let deadline_at = Utc::now()
            + chrono::Duration::from_std(self.config.approval_deadline)
                .unwrap_or_else(|_| chrono::Duration::days(30));
        let instance = WorkflowInstance::new(claim_id, deadline_at);

        match self.registry.create(&instance).await {
            Ok(()) => {
                self.timers
                    .arm_instance(&instance)
                    .map_err(|_| EngineError::Shutdown)?;
                info!(
                    workflow_id = %instance.id,
                    claim_id = %claim_id,
                    deadline_at = %instance.deadline_at,
                    "workflow instance created"
                );
                Ok(instance)
            }
            Err(RegistryError::AlreadyExists { .. }) => Err(EngineError::AlreadyStarted(claim_id)),
            Err(err) => Err(EngineError::registry(err)),
        }
    }

    /// Deliver an approval decision for a claim.
    pub async fn signal(
        &self,
        claim_id: ClaimId,
        supervisor_id: impl Into<String>,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<SignalOutcome> {
        let signal = ApprovalSignal::new(claim_id, supervisor_id, decision, comments);
        self.router.deliver(&signal).await
    }

    /// Load the current instance record for a claim, if any.
    pub async fn instance(&self, claim_id: ClaimId) -> Result<Option<WorkflowInstance>> {
        match self
            .registry
            .load(&crate::instance::WorkflowId::for_claim(claim_id))
            .await
        {
            Ok(instance) => Ok(Some(instance)),
            Err(RegistryError::NotFound { .. }) => Ok(None),
            Err(err) => Err(EngineError::registry(err)),
        }
    }

    /// Fetch claim details from the claim store (pass-through).
    pub async fn claim(&self, claim_id: ClaimId) -> Result<ClaimRecord> {
        self.claim_store
            .get_claim(claim_id)
            .await
            .map_err(|err| match err {
                ClaimStoreError::ClaimNotFound { claim_id } => EngineError::ClaimNotFound(claim_id),
                other => EngineError::claim_store(other),
            })
    }

    /// Run an explicit recovery pass. Idempotent; safe under
    /// concurrent signal and timer traffic.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.recovery.recover().await
    }

    /// Stop the engine. Pending in-memory deadlines are dropped; no
    /// unfired deadline is lost because the next start re-arms them
    /// from the registry.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("approval engine stopped");
    }
}

#[async_trait::async_trait]
impl<R, C> WorkflowStarter for ApprovalEngine<R, C>
where
    R: InstanceRegistry + 'static,
    C: ClaimStoreClient + 'static,
{
    async fn start_workflow(&self, claim_id: ClaimId) -> Result<WorkflowInstance> {
        self.start_claim(claim_id).await
    }
}

/// Periodic reconciliation: retries terminal outcomes the claim store
/// has not yet acknowledged.
async fn reconcile_loop<R, C>(
    recovery: RecoveryManager<R, C>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    R: InstanceRegistry + 'static,
    C: ClaimStoreClient + 'static,
{
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                match changed {
                    Ok(()) if !*shutdown.borrow() => continue,
                    _ => break,
                }
            }
            _ = tokio::time::sleep(interval) => {
                match recovery.reconcile_unpropagated().await {
                    Ok(0) => {}
                    Ok(renotified) => {
                        info!(renotified, "reconciliation re-delivered terminal outcomes");
                    }
                    Err(err) => {
                        warn!(error = %err, "reconciliation pass failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ApprovalEngineConfig::default();
        assert_eq!(config.approval_deadline, Duration::from_secs(2_592_000));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_config_builder() {
        let config = ApprovalEngineConfig::new()
            .with_approval_deadline(Duration::from_secs(10))
            .with_reconcile_interval(Duration::from_secs(1));
        assert_eq!(config.approval_deadline, Duration::from_secs(10));
        assert_eq!(config.reconcile_interval, Duration::from_secs(1));
    }
}
