//! Recording claim store client for assertions in tests.
//!
//! Records every status update it receives and can be told to fail the
//! next N update calls, which is how the propagation-retry and
//! reconciliation paths are exercised.

use approval_engine_core::instance::ClaimId;
use approval_engine_core::port::claim_store::{
    ClaimRecord, ClaimStatus, ClaimStoreClient, ClaimStoreError,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Recording, optionally failing, in-memory claim store.
#[derive(Debug, Default)]
pub struct RecordingClaimStore {
    claims: RwLock<HashMap<ClaimId, ClaimRecord>>,
    updates: RwLock<Vec<(ClaimId, ClaimStatus)>>,
    fail_next_updates: AtomicU32,
}

impl RecordingClaimStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a claim record, status `PENDING`.
    pub fn insert_claim(&self, claim_id: ClaimId) {
        self.claims.write().insert(
            claim_id,
            ClaimRecord {
                claim_id,
                status: "PENDING".to_string(),
                supervisor_id: None,
            },
        );
    }

    /// Fail the next `n` update calls with an unavailability error.
    pub fn fail_next_updates(&self, n: u32) {
        self.fail_next_updates.store(n, Ordering::SeqCst);
    }

    /// Every update received, in order.
    pub fn updates(&self) -> Vec<(ClaimId, ClaimStatus)> {
        self.updates.read().clone()
    }

    /// How many updates were received for one claim.
    pub fn update_count(&self, claim_id: ClaimId) -> usize {
        self.updates
            .read()
            .iter()
            .filter(|(id, _)| *id == claim_id)
            .count()
    }
}

#[async_trait]
impl ClaimStoreClient for RecordingClaimStore {
    type Error = String;

    async fn get_claim(
        &self,
        claim_id: ClaimId,
    ) -> Result<ClaimRecord, ClaimStoreError<Self::Error>> {
        self.claims
            .read()
            .get(&claim_id)
            .cloned()
            .ok_or(ClaimStoreError::ClaimNotFound { claim_id })
    }

    async fn update_claim_status(
        &self,
        claim_id: ClaimId,
        status: ClaimStatus,
    ) -> Result<(), ClaimStoreError<Self::Error>> {
        let remaining = self.fail_next_updates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_updates.store(remaining - 1, Ordering::SeqCst);
            return Err(ClaimStoreError::Unavailable(
                "injected claim store outage".to_string(),
            ));
        }

        self.updates.write().push((claim_id, status));
        if let Some(record) = self.claims.write().get_mut(&claim_id) {
            record.status = status.as_str().to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_updates() {
        let store = RecordingClaimStore::new();
        store.insert_claim(ClaimId(1));

        store
            .update_claim_status(ClaimId(1), ClaimStatus::Approved)
            .await
            .unwrap();

        assert_eq!(store.updates(), vec![(ClaimId(1), ClaimStatus::Approved)]);
        assert_eq!(store.get_claim(ClaimId(1)).await.unwrap().status, "APPROVED");
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovers() {
        let store = RecordingClaimStore::new();
        store.fail_next_updates(2);

        assert!(store
            .update_claim_status(ClaimId(1), ClaimStatus::TimedOut)
            .await
            .is_err());
        assert!(store
            .update_claim_status(ClaimId(1), ClaimStatus::TimedOut)
            .await
            .is_err());
        assert!(store
            .update_claim_status(ClaimId(1), ClaimStatus::TimedOut)
            .await
            .is_ok());
        assert_eq!(store.update_count(ClaimId(1)), 1);
    }

    #[tokio::test]
    async fn test_unknown_claim() {
        let store = RecordingClaimStore::new();
        let err = store.get_claim(ClaimId(9)).await.unwrap_err();
        assert!(matches!(err, ClaimStoreError::ClaimNotFound { .. }));
    }
}
