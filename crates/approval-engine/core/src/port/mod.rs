//! Ports for infrastructure adapters.
//!
//! - [`instance_registry`]: durable workflow instance storage
//! - [`claim_store`]: the consumed claim service interface

pub mod claim_store;
pub mod instance_registry;

pub use claim_store::{ClaimRecord, ClaimStatus, ClaimStoreClient, ClaimStoreError};
pub use instance_registry::{InstanceRegistry, RegistryError, TerminalFields};
