//! # approval-engine-sqlite
//!
//! SQLite backend implementation for approval-engine.
//!
//! Provides [`SqliteInstanceRegistry`], a durable
//! [`InstanceRegistry`](approval_engine_core::InstanceRegistry) with
//! ACID conditional writes and embedded migrations. Suitable for
//! single-node deployments and as the durable store the engine relies
//! on across restarts.
//!
//! ## Usage
//!
//! ```ignore
//! use approval_engine_sqlite::SqliteInstanceRegistry;
//!
//! // File-backed, created on first open
//! let registry = SqliteInstanceRegistry::new("/var/lib/approvals.db").await?;
//!
//! // Or in-memory for tests
//! let registry = SqliteInstanceRegistry::in_memory().await?;
//! ```

pub mod instance_registry;

pub use instance_registry::{
    SqliteInstanceRegistry, SqliteInstanceRegistryBuilder, SqliteRegistryConfig,
    SqliteRegistryError,
};
