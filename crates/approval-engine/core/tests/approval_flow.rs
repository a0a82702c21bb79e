//! End-to-end engine tests over in-memory mock adapters.

use approval_engine_core::engine::{ApprovalEngine, ApprovalEngineConfig};
use approval_engine_core::executor::ExecutorConfig;
use approval_engine_core::instance::{ClaimId, Decision, WorkflowId, WorkflowInstance, WorkflowState};
use approval_engine_core::port::claim_store::{
    ClaimRecord, ClaimStatus, ClaimStoreClient, ClaimStoreError,
};
use approval_engine_core::port::instance_registry::{
    InstanceRegistry, RegistryError, TerminalFields,
};
use approval_engine_core::router::SignalOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// --- Mocks ---

#[derive(Debug, Default)]
struct MockRegistry {
    instances: DashMap<WorkflowId, WorkflowInstance>,
}

#[async_trait]
impl InstanceRegistry for MockRegistry {
    type Error = String;

    async fn create(&self, instance: &WorkflowInstance) -> Result<(), RegistryError<Self::Error>> {
        match self.instances.entry(instance.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RegistryError::already_exists(instance.id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(instance.clone());
                Ok(())
            }
        }
    }

    async fn load(&self, id: &WorkflowId) -> Result<WorkflowInstance, RegistryError<Self::Error>> {
        self.instances
            .get(id)
            .map(|i| i.clone())
            .ok_or_else(|| RegistryError::not_found(id.clone()))
    }

    async fn transition(
        &self,
        id: &WorkflowId,
        expected_version: u64,
        fields: &TerminalFields,
    ) -> Result<WorkflowInstance, RegistryError<Self::Error>> {
        // The shard lock held by `get_mut` makes check-and-write atomic.
        let mut instance = self
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(id.clone()))?;
        if instance.version != expected_version || instance.is_terminal() {
            return Err(RegistryError::conflict(
                id.clone(),
                expected_version,
                instance.version,
            ));
        }
        instance.state = fields.state;
        instance.decision = fields.decision;
        instance.supervisor_id = fields.supervisor_id.clone();
        instance.comments = fields.comments.clone();
        instance.completed_at = Some(fields.completed_at);
        instance.version += 1;
        Ok(instance.clone())
    }

    async fn list_awaiting(&self) -> Result<Vec<WorkflowInstance>, RegistryError<Self::Error>> {
        Ok(self
            .instances
            .iter()
            .filter(|i| i.state == WorkflowState::AwaitingApproval)
            .map(|i| i.clone())
            .collect())
    }

    async fn list_unpropagated(
        &self,
    ) -> Result<Vec<WorkflowInstance>, RegistryError<Self::Error>> {
        Ok(self
            .instances
            .iter()
            .filter(|i| i.is_terminal() && i.propagated_at.is_none())
            .map(|i| i.clone())
            .collect())
    }

    async fn mark_propagated(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError<Self::Error>> {
        let mut instance = self
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(id.clone()))?;
        if instance.propagated_at.is_none() {
            instance.propagated_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockClaimStore {
    updates: Mutex<Vec<(ClaimId, ClaimStatus)>>,
    fail_next: AtomicU32,
}

impl MockClaimStore {
    async fn update_count(&self, claim_id: ClaimId) -> usize {
        self.updates
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == claim_id)
            .count()
    }
}

#[async_trait]
impl ClaimStoreClient for MockClaimStore {
    type Error = String;

    async fn get_claim(
        &self,
        claim_id: ClaimId,
    ) -> Result<ClaimRecord, ClaimStoreError<Self::Error>> {
        Ok(ClaimRecord {
            claim_id,
            status: "PENDING".to_string(),
            supervisor_id: None,
        })
    }

    async fn update_claim_status(
        &self,
        claim_id: ClaimId,
        status: ClaimStatus,
    ) -> Result<(), ClaimStoreError<Self::Error>> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ClaimStoreError::Unavailable("outage".to_string()));
        }
        self.updates.lock().await.push((claim_id, status));
        Ok(())
    }
}

fn fast_config() -> ApprovalEngineConfig {
    ApprovalEngineConfig::new()
        .with_approval_deadline(Duration::from_secs(3600))
        .with_executor(ExecutorConfig {
            propagation_max_attempts: 1,
            propagation_base_backoff: Duration::from_millis(10),
        })
}

async fn engine_with(
    config: ApprovalEngineConfig,
) -> (
    ApprovalEngine<MockRegistry, MockClaimStore>,
    Arc<MockRegistry>,
    Arc<MockClaimStore>,
) {
    let registry = Arc::new(MockRegistry::default());
    let claim_store = Arc::new(MockClaimStore::default());
    let engine = ApprovalEngine::start(registry.clone(), claim_store.clone(), config)
        .await
        .expect("engine start");
    (engine, registry, claim_store)
}

// --- Tests ---

#[tokio::test]
async fn approved_signal_resolves_claim() {
    let (engine, _registry, claim_store) = engine_with(fast_config()).await;
    let claim = ClaimId(42);

    let instance = engine.start_claim(claim).await.unwrap();
    assert_eq!(instance.state, WorkflowState::AwaitingApproval);

    let outcome = engine
        .signal(claim, "S1", Decision::Approved, Some("valid claim".into()))
        .await
        .unwrap();

    let updated = match outcome {
        SignalOutcome::Applied(updated) => updated,
        other => panic!("expected Applied, got {other:?}"),
    };
    assert_eq!(updated.state, WorkflowState::Approved);
    assert_eq!(updated.decision, Some(Decision::Approved));
    assert_eq!(updated.supervisor_id.as_deref(), Some("S1"));
    assert_eq!(updated.comments.as_deref(), Some("valid claim"));
    assert_eq!(updated.version, 2);
    assert!(updated.completed_at.is_some());

    assert_eq!(
        claim_store.updates.lock().await.as_slice(),
        &[(claim, ClaimStatus::Approved)]
    );

    let stored = engine.instance(claim).await.unwrap().unwrap();
    assert!(stored.propagated_at.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn duplicate_signal_is_already_completed() {
    let (engine, _registry, claim_store) = engine_with(fast_config()).await;
    let claim = ClaimId(5);

    engine.start_claim(claim).await.unwrap();
    let first = engine
        .signal(claim, "S1", Decision::Rejected, None)
        .await
        .unwrap();
    assert!(matches!(first, SignalOutcome::Applied(_)));

    // A conflicting late duplicate changes nothing.
    let second = engine
        .signal(claim, "S2", Decision::Approved, None)
        .await
        .unwrap();
    let current = match second {
        SignalOutcome::AlreadyCompleted(current) => current,
        other => panic!("expected AlreadyCompleted, got {other:?}"),
    };
    assert_eq!(current.state, WorkflowState::Rejected);
    assert_eq!(current.supervisor_id.as_deref(), Some("S1"));
    assert_eq!(current.version, 2);

    assert_eq!(claim_store.update_count(claim).await, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn signal_for_unknown_claim_is_not_found() {
    let (engine, _registry, claim_store) = engine_with(fast_config()).await;

    let outcome = engine
        .signal(ClaimId(404), "S1", Decision::Approved, None)
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::NotFound);
    assert!(claim_store.updates.lock().await.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn at_most_one_instance_per_claim() {
    let (engine, registry, _claim_store) = engine_with(fast_config()).await;
    let claim = ClaimId(9);

    engine.start_claim(claim).await.unwrap();
    let err = engine.start_claim(claim).await.unwrap_err();
    assert!(matches!(
        err,
        approval_engine_core::EngineError::AlreadyStarted(ClaimId(9))
    ));
    assert_eq!(registry.instances.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn deadline_expiry_times_out_exactly_once() {
    let config = fast_config().with_approval_deadline(Duration::from_millis(100));
    let (engine, _registry, claim_store) = engine_with(config).await;
    let claim = ClaimId(7);

    engine.start_claim(claim).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stored = engine.instance(claim).await.unwrap().unwrap();
    assert_eq!(stored.state, WorkflowState::TimedOut);
    assert!(stored.decision.is_none());
    assert_eq!(stored.version, 2);

    assert_eq!(
        claim_store.updates.lock().await.as_slice(),
        &[(claim, ClaimStatus::TimedOut)]
    );

    // A signal arriving after the timeout is a harmless duplicate.
    let outcome = engine
        .signal(claim, "S1", Decision::Approved, None)
        .await
        .unwrap();
    assert!(matches!(outcome, SignalOutcome::AlreadyCompleted(_)));
    assert_eq!(claim_store.update_count(claim).await, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn concurrent_conflicting_signals_commit_exactly_one() {
    let (engine, _registry, claim_store) = engine_with(fast_config()).await;
    let engine = Arc::new(engine);
    let claim = ClaimId(11);

    engine.start_claim(claim).await.unwrap();

    let approve = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .signal(claim, "S1", Decision::Approved, None)
                .await
                .unwrap()
        })
    };
    let reject = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .signal(claim, "S2", Decision::Rejected, None)
                .await
                .unwrap()
        })
    };
    let outcomes = [approve.await.unwrap(), reject.await.unwrap()];

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, SignalOutcome::Applied(_)))
        .count();
    let already = outcomes
        .iter()
        .filter(|o| matches!(o, SignalOutcome::AlreadyCompleted(_)))
        .count();
    assert_eq!((applied, already), (1, 1));

    // The committed record matches whichever delivery won.
    let stored = engine.instance(claim).await.unwrap().unwrap();
    let winner = outcomes
        .iter()
        .find_map(|o| match o {
            SignalOutcome::Applied(i) => Some(i.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(stored.state, winner.state);
    assert_eq!(stored.supervisor_id, winner.supervisor_id);
    assert_eq!(claim_store.update_count(claim).await, 1);

    Arc::try_unwrap(engine).ok().unwrap().shutdown().await;
}

#[tokio::test]
async fn signal_and_timeout_race_has_one_winner() {
    let config = fast_config().with_approval_deadline(Duration::from_millis(60));
    let (engine, _registry, claim_store) = engine_with(config).await;
    let claim = ClaimId(13);

    engine.start_claim(claim).await.unwrap();

    // Land the signal right around the deadline.
    tokio::time::sleep(Duration::from_millis(55)).await;
    let outcome = engine
        .signal(claim, "S1", Decision::Approved, None)
        .await
        .unwrap();

    // Give a losing timeout time to observe the committed state.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stored = engine.instance(claim).await.unwrap().unwrap();
    match outcome {
        SignalOutcome::Applied(_) => assert_eq!(stored.state, WorkflowState::Approved),
        SignalOutcome::AlreadyCompleted(_) => assert_eq!(stored.state, WorkflowState::TimedOut),
        SignalOutcome::NotFound => panic!("instance must exist"),
    }
    assert!(stored.is_terminal());
    assert_eq!(stored.version, 2);
    // Exactly one of {decision, TIMED_OUT} was committed and
    // propagated, never both.
    assert_eq!(claim_store.update_count(claim).await, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn outage_leaves_commit_durable_and_reconciler_delivers() {
    let config = fast_config().with_reconcile_interval(Duration::from_millis(100));
    let (engine, _registry, claim_store) = engine_with(config).await;
    let claim = ClaimId(21);

    engine.start_claim(claim).await.unwrap();
    claim_store.fail_next.store(1, Ordering::SeqCst);

    let outcome = engine
        .signal(claim, "S1", Decision::Approved, None)
        .await
        .unwrap();
    // The transition committed even though delivery failed.
    assert!(matches!(outcome, SignalOutcome::Applied(_)));
    let stored = engine.instance(claim).await.unwrap().unwrap();
    assert_eq!(stored.state, WorkflowState::Approved);
    assert!(stored.propagated_at.is_none());
    assert_eq!(claim_store.update_count(claim).await, 0);

    // The periodic reconciliation pass re-delivers.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let stored = engine.instance(claim).await.unwrap().unwrap();
    assert!(stored.propagated_at.is_some());
    assert_eq!(claim_store.update_count(claim).await, 1);

    engine.shutdown().await;
}
