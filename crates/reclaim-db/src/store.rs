//! Record store seam
//!
//! The engine treats persistence as a keyed document store with
//! field-equality queries and one atomic multi-document write primitive.
//! Per-document reads are expected to observe earlier writes
//! (read-your-writes); cross-record consistency comes exclusively from
//! `apply`, which commits a `RecordBatch` all-or-nothing.

use async_trait::async_trait;

use reclaim_core::error::AppError;
use reclaim_core::models::{Claim, ClaimStatus, FoundItem, Locker, UserAccount};

/// A single write inside an atomic batch. Writes are upserts keyed by the
/// record's business identifier.
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutClaim(Claim),
    PutItem(FoundItem),
    PutLocker(Locker),
}

/// An ordered set of writes committed atomically by [`RecordStore::apply`].
/// Callers observe either the pre-state or the fully-updated post-state,
/// never an intermediate.
#[derive(Debug, Default)]
pub struct RecordBatch {
    ops: Vec<WriteOp>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_claim(mut self, claim: Claim) -> Self {
        self.ops.push(WriteOp::PutClaim(claim));
        self
    }

    pub fn put_item(mut self, item: FoundItem) -> Self {
        self.ops.push(WriteOp::PutItem(item));
        self
    }

    pub fn put_locker(mut self, locker: Locker) -> Self {
        self.ops.push(WriteOp::PutLocker(locker));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Keyed record storage used by the engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Claims
    async fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>, AppError>;
    async fn put_claim(&self, claim: &Claim) -> Result<(), AppError>;
    async fn claims_for_student(&self, student_id: &str) -> Result<Vec<Claim>, AppError>;
    async fn claims_for_item(&self, found_item_id: &str) -> Result<Vec<Claim>, AppError>;
    async fn claims_for_pair(
        &self,
        student_id: &str,
        found_item_id: &str,
    ) -> Result<Vec<Claim>, AppError>;
    async fn claims_with_status(&self, status: ClaimStatus) -> Result<Vec<Claim>, AppError>;
    async fn all_claims(&self) -> Result<Vec<Claim>, AppError>;
    /// Highest claim identifier currently stored, by lexicographic order.
    /// Drives `C####` allocation.
    async fn latest_claim_id(&self) -> Result<Option<String>, AppError>;

    // Found items
    async fn get_item(&self, found_item_id: &str) -> Result<Option<FoundItem>, AppError>;
    async fn put_item(&self, item: &FoundItem) -> Result<(), AppError>;

    // Lockers
    async fn get_locker(&self, locker_id: &str) -> Result<Option<Locker>, AppError>;
    async fn put_locker(&self, locker: &Locker) -> Result<(), AppError>;
    /// Lockers currently in the `open` status, for the auto-close job.
    async fn open_lockers(&self) -> Result<Vec<Locker>, AppError>;

    // User accounts
    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, AppError>;
    async fn put_user(&self, user: &UserAccount) -> Result<(), AppError>;

    /// Commit a batch of writes atomically (all-or-nothing).
    async fn apply(&self, batch: RecordBatch) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reclaim_core::models::LockerStatus;

    #[test]
    fn test_batch_builder_preserves_order() {
        let claim = Claim::new("C0001".into(), "FI0001".into(), "2300001".into());
        let item = FoundItem::new("FI0001".into(), "Wallet".into(), "accessory".into());
        let mut locker = Locker::new("L01".into());
        locker.status = LockerStatus::Occupied;
        locker.updated_at = Utc::now();

        let batch = RecordBatch::new()
            .put_claim(claim)
            .put_item(item)
            .put_locker(locker);

        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[0], WriteOp::PutClaim(_)));
        assert!(matches!(batch.ops()[1], WriteOp::PutItem(_)));
        assert!(matches!(batch.ops()[2], WriteOp::PutLocker(_)));
    }

    #[test]
    fn test_empty_batch() {
        let batch = RecordBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
