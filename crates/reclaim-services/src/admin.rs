//! Admin approval workflow
//!
//! Approve or reject a pending claim on a valuable item. Approval stamps the
//! claim and the item in one batch and auto-cancels every other pending
//! claim on the same item, preserving the one-approved-claim-per-item
//! property.

use chrono::Utc;
use std::sync::Arc;

use reclaim_core::error::AppError;
use reclaim_core::models::{ClaimStatus, ItemStatus, UserRole, UserStatus};
use reclaim_db::{RecordBatch, RecordStore};

use crate::cache::ClaimCache;
use crate::claims::SYSTEM_AUTO_CANCELLATION;

pub struct ApprovalService {
    store: Arc<dyn RecordStore>,
    cache: Arc<ClaimCache>,
}

impl ApprovalService {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<ClaimCache>) -> Self {
        Self { store, cache }
    }

    async fn require_active_admin(&self, admin_id: &str) -> Result<(), AppError> {
        let admin = self
            .store
            .get_user(admin_id)
            .await?
            .ok_or_else(|| AppError::InvalidApprovingAdmin(admin_id.to_string()))?;
        if admin.role != UserRole::Admin {
            return Err(AppError::InsufficientAdminPrivileges {
                admin_id: admin_id.to_string(),
                role: admin.role.to_string(),
            });
        }
        if admin.status != UserStatus::Active {
            return Err(AppError::InactiveApprovingAdmin {
                admin_id: admin_id.to_string(),
                status: admin.status.to_string(),
            });
        }
        Ok(())
    }

    /// Approve a pending claim. Also marks the item `approved` and cancels
    /// sibling pending claims, all in one atomic batch.
    #[tracing::instrument(skip(self, remarks))]
    pub async fn approve(
        &self,
        claim_id: &str,
        admin_id: &str,
        remarks: Option<String>,
    ) -> Result<(), AppError> {
        self.require_active_admin(admin_id).await?;

        let mut claim = self
            .store
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| AppError::ClaimNotFound(claim_id.to_string()))?;
        if !matches!(
            claim.status,
            ClaimStatus::Pending | ClaimStatus::PendingApproval
        ) {
            return Err(AppError::Conflict(format!(
                "Claim already processed (status: {})",
                claim.status
            )));
        }

        let now = Utc::now();
        claim.status = ClaimStatus::Approved;
        claim.approved_by = Some(admin_id.to_string());
        claim.approved_at = Some(now);
        claim.admin_remarks = remarks;
        claim.updated_at = now;

        let mut batch = RecordBatch::new();

        // Stamp the approval on the item so re-validation can verify the
        // approving admin and the approval age.
        if let Some(mut item) = self.store.get_item(&claim.found_item_id).await? {
            item.status = ItemStatus::Approved;
            item.approved_by = Some(admin_id.to_string());
            item.approved_at = Some(now);
            item.updated_at = now;
            batch = batch.put_item(item);
        }

        // Only one claim per item may proceed; the rest are cancelled.
        let siblings = self.store.claims_for_item(&claim.found_item_id).await?;
        for mut sibling in siblings {
            if sibling.claim_id == claim.claim_id {
                continue;
            }
            if matches!(
                sibling.status,
                ClaimStatus::Pending | ClaimStatus::PendingApproval
            ) {
                sibling.status = ClaimStatus::Cancelled;
                sibling.cancelled_by = Some(SYSTEM_AUTO_CANCELLATION.to_string());
                sibling.cancelled_at = Some(now);
                sibling.cancellation_reason =
                    Some("Another claim was approved for this item".to_string());
                sibling.updated_at = now;
                tracing::info!(
                    cancelled = %sibling.claim_id,
                    approved = %claim.claim_id,
                    "auto-cancelling sibling pending claim"
                );
                self.cache.invalidate(&sibling.claim_id);
                batch = batch.put_claim(sibling);
            }
        }

        let batch = batch.put_claim(claim);
        self.store.apply(batch).await?;
        self.cache.invalidate(claim_id);

        tracing::info!(claim_id, admin_id, "claim approved");
        Ok(())
    }

    /// Reject a pending claim.
    #[tracing::instrument(skip(self, remarks))]
    pub async fn reject(
        &self,
        claim_id: &str,
        admin_id: &str,
        remarks: Option<String>,
    ) -> Result<(), AppError> {
        self.require_active_admin(admin_id).await?;

        let mut claim = self
            .store
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| AppError::ClaimNotFound(claim_id.to_string()))?;
        if !matches!(
            claim.status,
            ClaimStatus::Pending | ClaimStatus::PendingApproval
        ) {
            return Err(AppError::Conflict(format!(
                "Claim already processed (status: {})",
                claim.status
            )));
        }

        let now = Utc::now();
        claim.status = ClaimStatus::Rejected;
        claim.rejected_by = Some(admin_id.to_string());
        claim.rejected_at = Some(now);
        claim.admin_remarks = remarks;
        claim.updated_at = now;
        self.store.put_claim(&claim).await?;
        self.cache.invalidate(claim_id);

        tracing::info!(claim_id, admin_id, "claim rejected");
        Ok(())
    }
}
