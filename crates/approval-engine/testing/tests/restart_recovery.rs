//! Restart and recovery scenarios: the in-memory deadline queue dies
//! with each engine, the shared registry survives, and recovery must
//! rebuild everything the previous engine left in flight.

use approval_engine_core::engine::{ApprovalEngine, ApprovalEngineConfig};
use approval_engine_core::executor::ExecutorConfig;
use approval_engine_core::instance::{ClaimId, Decision, WorkflowInstance, WorkflowState};
use approval_engine_core::port::claim_store::ClaimStatus;
use approval_engine_core::port::instance_registry::InstanceRegistry;
use approval_engine_core::router::SignalOutcome;
use approval_engine_sqlite::SqliteInstanceRegistry;
use approval_engine_testing::{MemoryInstanceRegistry, RecordingClaimStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

type MemoryEngine = ApprovalEngine<MemoryInstanceRegistry, RecordingClaimStore>;

fn short_config(deadline: Duration) -> ApprovalEngineConfig {
    ApprovalEngineConfig::new()
        .with_approval_deadline(deadline)
        .with_executor(ExecutorConfig {
            propagation_max_attempts: 1,
            propagation_base_backoff: Duration::from_millis(10),
        })
}

async fn boot(
    registry: &Arc<MemoryInstanceRegistry>,
    claim_store: &Arc<RecordingClaimStore>,
    config: ApprovalEngineConfig,
) -> anyhow::Result<MemoryEngine> {
    Ok(ApprovalEngine::start(registry.clone(), claim_store.clone(), config).await?)
}

#[tokio::test]
async fn restart_rearms_pending_deadline() -> anyhow::Result<()> {
    let registry = Arc::new(MemoryInstanceRegistry::new());
    let claim_store = Arc::new(RecordingClaimStore::new());
    let claim = ClaimId(1);
    let config = short_config(Duration::from_millis(200));

    // First engine creates the instance, then dies before the deadline.
    let engine = boot(&registry, &claim_store, config.clone()).await?;
    engine.start_claim(claim).await?;
    engine.shutdown().await;
    assert_eq!(claim_store.update_count(claim), 0);

    // The next engine re-arms the stored deadline and fires it.
    let engine = boot(&registry, &claim_store, config).await?;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let stored = engine.instance(claim).await?.expect("instance survives");
    assert_eq!(stored.state, WorkflowState::TimedOut);
    assert_eq!(claim_store.updates(), vec![(claim, ClaimStatus::TimedOut)]);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn timeout_fires_exactly_once_across_three_restarts() -> anyhow::Result<()> {
    let registry = Arc::new(MemoryInstanceRegistry::new());
    let claim_store = Arc::new(RecordingClaimStore::new());
    let claim = ClaimId(7);
    let config = short_config(Duration::from_millis(150));

    let engine = boot(&registry, &claim_store, config.clone()).await?;
    engine.start_claim(claim).await?;
    engine.shutdown().await;

    // Bounce twice more; whichever incarnation is alive when the
    // deadline passes resolves it, the others find it already settled.
    for pause in [Duration::from_millis(80), Duration::from_millis(500)] {
        let engine = boot(&registry, &claim_store, config.clone()).await?;
        tokio::time::sleep(pause).await;
        engine.shutdown().await;
    }

    let stored = registry
        .load(&approval_engine_core::instance::WorkflowId::for_claim(claim))
        .await?;
    assert_eq!(stored.state, WorkflowState::TimedOut);
    assert_eq!(stored.version, 2);
    assert!(stored.propagated_at.is_some());
    assert_eq!(claim_store.update_count(claim), 1);
    Ok(())
}

#[tokio::test]
async fn recovery_is_idempotent_under_repeat_passes() -> anyhow::Result<()> {
    let registry = Arc::new(MemoryInstanceRegistry::new());
    let claim_store = Arc::new(RecordingClaimStore::new());
    let claim = ClaimId(3);

    let engine = boot(&registry, &claim_store, short_config(Duration::from_secs(3600))).await?;
    engine.start_claim(claim).await?;

    let first = engine.recover().await?;
    let second = engine.recover().await?;
    assert_eq!(first.rearmed, 1);
    assert_eq!(second.rearmed, 1);
    assert_eq!(first.overdue + second.overdue, 0);

    // Extra passes left a single live deadline entry; the decision
    // still commits and propagates exactly once.
    let outcome = engine
        .signal(claim, "S1", Decision::Approved, None)
        .await?;
    assert!(matches!(outcome, SignalOutcome::Applied(_)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(claim_store.update_count(claim), 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn overdue_instance_resolves_during_recovery() -> anyhow::Result<()> {
    let registry = Arc::new(MemoryInstanceRegistry::new());
    let claim_store = Arc::new(RecordingClaimStore::new());
    let claim = ClaimId(12);

    // Simulate a long outage: the stored deadline is already past
    // when the engine comes up.
    let instance = WorkflowInstance::new(claim, Utc::now() - chrono::Duration::seconds(5));
    registry.create(&instance).await?;

    // The boot-time recovery pass re-arms it; an elapsed deadline
    // fires immediately through the normal timeout path.
    let engine = boot(&registry, &claim_store, short_config(Duration::from_secs(3600))).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stored = engine.instance(claim).await?.expect("instance survives");
    assert_eq!(stored.state, WorkflowState::TimedOut);
    assert_eq!(claim_store.update_count(claim), 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn undelivered_outcome_redelivered_on_restart() -> anyhow::Result<()> {
    let registry = Arc::new(MemoryInstanceRegistry::new());
    let claim_store = Arc::new(RecordingClaimStore::new());
    let claim = ClaimId(21);
    let config = short_config(Duration::from_secs(3600));

    let engine = boot(&registry, &claim_store, config.clone()).await?;
    engine.start_claim(claim).await?;

    // Outage during propagation: the transition commits, delivery
    // does not, and the engine dies before any retry.
    claim_store.fail_next_updates(1);
    let outcome = engine
        .signal(claim, "S1", Decision::Rejected, Some("fraud".into()))
        .await?;
    assert!(matches!(outcome, SignalOutcome::Applied(_)));
    engine.shutdown().await;
    assert_eq!(claim_store.update_count(claim), 0);

    // Startup recovery re-delivers the committed outcome.
    let engine = boot(&registry, &claim_store, config).await?;
    assert_eq!(claim_store.updates(), vec![(claim, ClaimStatus::Rejected)]);

    let stored = engine.instance(claim).await?.expect("instance survives");
    assert_eq!(stored.state, WorkflowState::Rejected);
    assert!(stored.propagated_at.is_some());

    // The next recovery pass finds nothing to re-deliver.
    let report = engine.recover().await?;
    assert_eq!(report.renotified, 0);
    assert_eq!(claim_store.update_count(claim), 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn sqlite_backed_engine_survives_restart() -> anyhow::Result<()> {
    let registry = Arc::new(SqliteInstanceRegistry::in_memory().await?);
    let claim_store = Arc::new(RecordingClaimStore::new());
    let claim = ClaimId(88);
    let config = short_config(Duration::from_secs(3600));

    let engine = ApprovalEngine::start(registry.clone(), claim_store.clone(), config.clone())
        .await?;
    engine.start_claim(claim).await?;
    let outcome = engine
        .signal(claim, "S9", Decision::Approved, Some("documented".into()))
        .await?;
    assert!(matches!(outcome, SignalOutcome::Applied(_)));
    engine.shutdown().await;

    // Same database, fresh engine: the settled record is found as-is
    // and nothing is re-armed or re-delivered.
    let engine = ApprovalEngine::start(registry.clone(), claim_store.clone(), config).await?;
    let report = engine.recover().await?;
    assert_eq!(report.rearmed, 0);
    assert_eq!(report.renotified, 0);

    let stored = engine.instance(claim).await?.expect("record persisted");
    assert_eq!(stored.state, WorkflowState::Approved);
    assert_eq!(stored.supervisor_id.as_deref(), Some("S9"));
    assert_eq!(stored.version, 2);
    assert!(stored.propagated_at.is_some());
    assert_eq!(claim_store.update_count(claim), 1);

    engine.shutdown().await;
    Ok(())
}
