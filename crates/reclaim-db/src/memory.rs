//! In-memory record store
//!
//! Backs tests and single-instance kiosk deployments. All four tables live
//! behind one `RwLock`, so a batch applied under the write guard is
//! observed atomically by every reader.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use reclaim_core::error::AppError;
use reclaim_core::models::{Claim, ClaimStatus, FoundItem, Locker, LockerStatus, UserAccount};

use crate::store::{RecordBatch, RecordStore, WriteOp};

#[derive(Default)]
struct Tables {
    claims: HashMap<String, Claim>,
    items: HashMap<String, FoundItem>,
    lockers: HashMap<String, Locker>,
    users: HashMap<String, UserAccount>,
}

/// In-memory implementation of [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored claims; handy for test assertions.
    pub async fn claim_count(&self) -> usize {
        self.tables.read().await.claims.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>, AppError> {
        Ok(self.tables.read().await.claims.get(claim_id).cloned())
    }

    async fn put_claim(&self, claim: &Claim) -> Result<(), AppError> {
        self.tables
            .write()
            .await
            .claims
            .insert(claim.claim_id.clone(), claim.clone());
        Ok(())
    }

    async fn claims_for_student(&self, student_id: &str) -> Result<Vec<Claim>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .claims
            .values()
            .filter(|c| c.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn claims_for_item(&self, found_item_id: &str) -> Result<Vec<Claim>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .claims
            .values()
            .filter(|c| c.found_item_id == found_item_id)
            .cloned()
            .collect())
    }

    async fn claims_for_pair(
        &self,
        student_id: &str,
        found_item_id: &str,
    ) -> Result<Vec<Claim>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .claims
            .values()
            .filter(|c| c.student_id == student_id && c.found_item_id == found_item_id)
            .cloned()
            .collect())
    }

    async fn claims_with_status(&self, status: ClaimStatus) -> Result<Vec<Claim>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .claims
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn all_claims(&self) -> Result<Vec<Claim>, AppError> {
        Ok(self.tables.read().await.claims.values().cloned().collect())
    }

    async fn latest_claim_id(&self) -> Result<Option<String>, AppError> {
        Ok(self.tables.read().await.claims.keys().max().cloned())
    }

    async fn get_item(&self, found_item_id: &str) -> Result<Option<FoundItem>, AppError> {
        Ok(self.tables.read().await.items.get(found_item_id).cloned())
    }

    async fn put_item(&self, item: &FoundItem) -> Result<(), AppError> {
        self.tables
            .write()
            .await
            .items
            .insert(item.found_item_id.clone(), item.clone());
        Ok(())
    }

    async fn get_locker(&self, locker_id: &str) -> Result<Option<Locker>, AppError> {
        Ok(self.tables.read().await.lockers.get(locker_id).cloned())
    }

    async fn put_locker(&self, locker: &Locker) -> Result<(), AppError> {
        self.tables
            .write()
            .await
            .lockers
            .insert(locker.locker_id.clone(), locker.clone());
        Ok(())
    }

    async fn open_lockers(&self) -> Result<Vec<Locker>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .lockers
            .values()
            .filter(|l| l.status == LockerStatus::Open)
            .cloned()
            .collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, AppError> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn put_user(&self, user: &UserAccount) -> Result<(), AppError> {
        self.tables
            .write()
            .await
            .users
            .insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn apply(&self, batch: RecordBatch) -> Result<(), AppError> {
        // One write guard for the whole batch: readers see pre- or
        // post-state, never a partial application.
        let mut tables = self.tables.write().await;
        for op in batch.into_ops() {
            match op {
                WriteOp::PutClaim(claim) => {
                    tables.claims.insert(claim.claim_id.clone(), claim);
                }
                WriteOp::PutItem(item) => {
                    tables.items.insert(item.found_item_id.clone(), item);
                }
                WriteOp::PutLocker(locker) => {
                    tables.lockers.insert(locker.locker_id.clone(), locker);
                }
            }
        }
        Ok(())
    }
}
