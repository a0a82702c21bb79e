//! # approval-engine-core
//!
//! Core claim approval workflow engine with zero infrastructure
//! dependencies. Replaces a managed durable-execution platform with
//! explicit persistence, deadline scheduling and signal delivery.
//!
//! ## Architecture
//!
//! One durable [`WorkflowInstance`] record per claim, created when the
//! claim side starts a workflow and resolved exactly once by whichever
//! event lands first: a supervisor decision routed by the
//! [`SignalRouter`] or a deadline expiry driven by the
//! [`TimerScheduler`]. Both paths race through the
//! [`InstanceRegistry`]'s optimistic conditional write; the loser
//! observes the committed terminal state and discards its attempt.
//!
//! ## Modules
//!
//! - [`instance`]: [`WorkflowInstance`], [`WorkflowState`], [`ApprovalSignal`]
//! - [`port`]: [`InstanceRegistry`] and [`ClaimStoreClient`] adapter traits
//! - [`executor`]: terminal transitions and outcome propagation
//! - [`scheduler`]: earliest-first deadline loop
//! - [`router`]: signal-to-instance resolution
//! - [`recovery`]: restart reconstruction and reconciliation
//! - [`engine`]: [`ApprovalEngine`] facade and configuration
//! - [`error`]: engine-level errors
//! - [`telemetry`]: tracing bootstrap

pub mod engine;
pub mod error;
pub mod executor;
pub mod instance;
pub mod port;
pub mod recovery;
pub mod router;
pub mod scheduler;
pub mod telemetry;

pub use engine::{
    ApprovalEngine, ApprovalEngineConfig, WorkflowStarter, DEFAULT_APPROVAL_DEADLINE,
};
pub use error::{EngineError, Result};
pub use executor::{ExecutorConfig, TransitionOutcome, WorkflowExecutor};
pub use instance::{
    ApprovalSignal, ClaimId, Decision, WorkflowId, WorkflowInstance, WorkflowState,
};
pub use port::{
    ClaimRecord, ClaimStatus, ClaimStoreClient, ClaimStoreError, InstanceRegistry, RegistryError,
    TerminalFields,
};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use router::{SignalOutcome, SignalRouter};
pub use scheduler::{SchedulerStopped, TimerHandle, TimerScheduler, TimerSchedulerConfig};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
