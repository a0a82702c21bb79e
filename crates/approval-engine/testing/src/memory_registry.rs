//! In-memory implementation of InstanceRegistry for testing.
//!
//! Thread-safe and semantically equivalent to the SQLite backend,
//! including the state guard that keeps terminal records immutable.
//! Ideal for unit tests and development.

use approval_engine_core::instance::{WorkflowId, WorkflowInstance, WorkflowState};
use approval_engine_core::port::instance_registry::{
    InstanceRegistry, RegistryError, TerminalFields,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Error type for [`MemoryInstanceRegistry`]. The in-memory backend
/// has no failure modes of its own; this type exists to satisfy the
/// port contract.
#[derive(Debug, thiserror::Error)]
#[error("memory registry error")]
pub struct MemoryRegistryError;

/// In-memory instance registry.
///
/// Uses `parking_lot::RwLock` around a plain map; every mutation runs
/// under the write lock, so the conditional transition is atomic
/// exactly like the database backend's guarded UPDATE.
#[derive(Debug, Default)]
pub struct MemoryInstanceRegistry {
    instances: RwLock<HashMap<WorkflowId, WorkflowInstance>>,
}

impl MemoryInstanceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances (terminal ones included).
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[async_trait]
impl InstanceRegistry for MemoryInstanceRegistry {
    type Error = MemoryRegistryError;

    async fn create(&self, instance: &WorkflowInstance) -> Result<(), RegistryError<Self::Error>> {
        let mut instances = self.instances.write();
        if instances.contains_key(&instance.id) {
            return Err(RegistryError::already_exists(instance.id.clone()));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn load(&self, id: &WorkflowId) -> Result<WorkflowInstance, RegistryError<Self::Error>> {
        self.instances
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(id.clone()))
    }

    async fn transition(
        &self,
        id: &WorkflowId,
        expected_version: u64,
        fields: &TerminalFields,
    ) -> Result<WorkflowInstance, RegistryError<Self::Error>> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(id.clone()))?;

        // Terminal rows never transition again, whatever the version.
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
        let mut awaiting: Vec<WorkflowInstance> = self
            .instances
            .read()
            .values()
            .filter(|i| i.state == WorkflowState::AwaitingApproval)
            .cloned()
            .collect();
        awaiting.sort_by_key(|i| i.deadline_at);
        Ok(awaiting)
    }

    async fn list_unpropagated(
        &self,
    ) -> Result<Vec<WorkflowInstance>, RegistryError<Self::Error>> {
        let mut undelivered: Vec<WorkflowInstance> = self
            .instances
            .read()
            .values()
            .filter(|i| i.is_terminal() && i.propagated_at.is_none())
            .cloned()
            .collect();
        undelivered.sort_by_key(|i| i.completed_at);
        Ok(undelivered)
    }

    async fn mark_propagated(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError<Self::Error>> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(id.clone()))?;
        if instance.propagated_at.is_none() {
            instance.propagated_at = Some(at);
        }
        Ok(())
    }
}
