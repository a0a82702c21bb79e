//! Test adapters for approval-engine.
//!
//! - [`MemoryInstanceRegistry`]: in-memory registry with the same
//!   conditional-write semantics as the SQLite backend
//! - [`RecordingClaimStore`]: claim store client that records updates
//!   and can simulate outages

pub mod memory_registry;
pub mod recording_claim_store;

pub use memory_registry::{MemoryInstanceRegistry, MemoryRegistryError};
pub use recording_claim_store::RecordingClaimStore;
