//! # Approval Engine Example
//!
//! Runs the full approval lifecycle against an in-memory SQLite
//! registry: start a workflow for a claim, deliver a supervisor
//! decision, and inspect the settled record.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --package approval-engine-sqlite --example basic_usage
//! ```

use approval_engine_core::engine::{ApprovalEngine, ApprovalEngineConfig};
use approval_engine_core::instance::{ClaimId, Decision};
use approval_engine_core::port::claim_store::{
    ClaimRecord, ClaimStatus, ClaimStoreClient, ClaimStoreError,
};
use approval_engine_core::router::SignalOutcome;
use approval_engine_sqlite::SqliteInstanceRegistry;
use std::sync::Arc;

/// Stand-in for the real claim service; prints what it receives.
#[derive(Debug, Default)]
struct PrintingClaimStore;

#[async_trait::async_trait]
impl ClaimStoreClient for PrintingClaimStore {
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
        println!("   -> claim store notified: claim {claim_id} is now {status}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting Approval Engine Example\n");

    println!("1. Creating engine with in-memory SQLite registry...");
    let registry = Arc::new(SqliteInstanceRegistry::in_memory().await?);
    let claim_store = Arc::new(PrintingClaimStore);
    let engine = ApprovalEngine::start(
        registry.clone(),
        claim_store,
        ApprovalEngineConfig::default(),
    )
    .await?;
    println!("   ✓ Engine started\n");

    println!("2. Starting the approval workflow for claim 42...");
    let claim_id = ClaimId(42);
    let instance = engine.start_claim(claim_id).await?;
    println!(
        "   ✓ Instance {} awaiting approval until {}\n",
        instance.id, instance.deadline_at
    );

    println!("3. Delivering a supervisor decision...");
    let outcome = engine
        .signal(
            claim_id,
            "supervisor-7",
            Decision::Approved,
            Some("damage assessment confirmed".to_string()),
        )
        .await?;
    match outcome {
        SignalOutcome::Applied(updated) => {
            println!(
                "   ✓ Decision applied: state={} version={}\n",
                updated.state, updated.version
            );
        }
        other => println!("   ! Unexpected outcome: {other:?}\n"),
    }

    println!("4. Inspecting the settled record...");
    let settled = engine.instance(claim_id).await?.expect("instance exists");
    println!("   state:         {}", settled.state);
    println!("   decision:      {:?}", settled.decision);
    println!("   supervisor:    {:?}", settled.supervisor_id);
    println!("   completed_at:  {:?}", settled.completed_at);
    println!("   propagated_at: {:?}\n", settled.propagated_at);

    println!("5. Shutting down...");
    engine.shutdown().await;
    println!("   ✓ Done");

    Ok(())
}
