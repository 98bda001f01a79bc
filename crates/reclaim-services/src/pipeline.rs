//! Claim validation pipeline
//!
//! Four ordered layers deciding whether a claim attempt may proceed:
//!
//! 1. Item availability
//! 2. User eligibility (rate limit, duplicates, global cap, session lock)
//! 3. Valuable-item approval handling
//! 4. Claim-state classification
//!
//! Layers run strictly in order and short-circuit on the first failure; a
//! failure after the session lock was acquired releases it before returning.
//! Each layer is an async method returning `Result`, composed with early
//! return - no panics or exception-style control flow.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use reclaim_core::config::EngineConfig;
use reclaim_core::error::AppError;
use reclaim_core::models::{ClaimStatus, FoundItem, ItemStatus};
use reclaim_db::RecordStore;

use crate::session::SessionGuard;

/// Pipeline layers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    ItemAvailability,
    UserEligibility,
    ValuableItemHandling,
    ClaimStateValidation,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::ItemAvailability => write!(f, "item_availability"),
            Layer::UserEligibility => write!(f, "user_eligibility"),
            Layer::ValuableItemHandling => write!(f, "valuable_item_handling"),
            Layer::ClaimStateValidation => write!(f, "claim_state_validation"),
        }
    }
}

/// Approval classification produced by layers 3 and 4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalState {
    /// Non-valuable item; no admin involvement needed.
    NotRequired,
    /// Valuable item still awaiting admin approval. Informational, not a
    /// failure: the claim may be created and will wait.
    Pending,
    /// Valuable item with a currently valid admin approval.
    Approved { approved_by: String },
}

/// Successful pipeline result.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub item: FoundItem,
    pub layers_passed: Vec<Layer>,
    pub requires_admin_approval: bool,
    pub approval: ApprovalState,
    /// Whether the per-user session lock is held by this validation run.
    /// The caller is responsible for releasing it.
    pub session_locked: bool,
    /// Set when the user already holds an approved claim for this item; the
    /// caller should reuse that claim instead of creating a new one.
    pub existing_approved_claim: Option<String>,
}

struct EligibilityOutcome {
    session_locked: bool,
    existing_approved_claim: Option<String>,
}

pub struct ValidationPipeline {
    store: Arc<dyn RecordStore>,
    session: Arc<SessionGuard>,
    config: EngineConfig,
}

impl ValidationPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        session: Arc<SessionGuard>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            session,
            config,
        }
    }

    /// Run all four layers for a claim attempt by `student_id` on `item_id`.
    #[tracing::instrument(skip(self))]
    pub async fn validate(
        &self,
        student_id: &str,
        item_id: &str,
    ) -> Result<ValidationOutcome, AppError> {
        let mut layers_passed = Vec::with_capacity(4);

        let item = self.check_item_availability(student_id, item_id).await?;
        layers_passed.push(Layer::ItemAvailability);

        let eligibility = self.check_user_eligibility(student_id, item_id).await?;
        layers_passed.push(Layer::UserEligibility);

        let approval = match self.check_valuable_item(&item).await {
            Ok(approval) => approval,
            Err(e) => {
                if eligibility.session_locked {
                    self.session.release_lock(student_id).await;
                }
                return Err(e);
            }
        };
        layers_passed.push(Layer::ValuableItemHandling);

        if let Err(e) = self.check_claim_state(&item) {
            if eligibility.session_locked {
                self.session.release_lock(student_id).await;
            }
            return Err(e);
        }
        layers_passed.push(Layer::ClaimStateValidation);

        tracing::info!(
            student_id,
            item_id,
            layers = layers_passed.len(),
            "all validation layers passed"
        );

        Ok(ValidationOutcome {
            requires_admin_approval: item.is_valuable,
            item,
            layers_passed,
            approval,
            session_locked: eligibility.session_locked,
            existing_approved_claim: eligibility.existing_approved_claim,
        })
    }

    /// Layer 1: the item must exist and be strictly `unclaimed`, with one
    /// carve-out - an item already `approved` passes for the user holding
    /// the approved claim and fails with a distinct code for everyone else.
    async fn check_item_availability(
        &self,
        student_id: &str,
        item_id: &str,
    ) -> Result<FoundItem, AppError> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound(item_id.to_string()))?;

        match item.status {
            ItemStatus::Unclaimed => Ok(item),
            ItemStatus::Claimed => Err(AppError::ItemAlreadyClaimed(item_id.to_string())),
            ItemStatus::Approved => {
                let pair_claims = self.store.claims_for_pair(student_id, item_id).await?;
                if pair_claims
                    .iter()
                    .any(|c| c.status == ClaimStatus::Approved)
                {
                    tracing::debug!(student_id, item_id, "item approved for this user");
                    return Ok(item);
                }

                let item_claims = self.store.claims_for_item(item_id).await?;
                if item_claims.iter().any(|c| c.status == ClaimStatus::Approved) {
                    Err(AppError::ItemApprovedByOtherUser(item_id.to_string()))
                } else {
                    // Stale item status with no approved claim behind it;
                    // let validation continue rather than dead-end the item.
                    Ok(item)
                }
            }
            other => Err(AppError::ItemNotAvailable {
                item_id: item_id.to_string(),
                status: other.to_string(),
            }),
        }
    }

    /// Layer 2: rate limit, duplicate claims, active token, global cap, and
    /// finally the session lock.
    async fn check_user_eligibility(
        &self,
        student_id: &str,
        item_id: &str,
    ) -> Result<EligibilityOutcome, AppError> {
        self.session.check_rate_limit(student_id).await?;

        let now = Utc::now();
        let pair_claims = self.store.claims_for_pair(student_id, item_id).await?;
        for claim in &pair_claims {
            match claim.status {
                ClaimStatus::Pending | ClaimStatus::PendingApproval => {
                    return Err(AppError::DuplicatePendingClaim(item_id.to_string()));
                }
                ClaimStatus::Approved => {
                    // Existing approved claim: proceed without locking; the
                    // caller reuses this claim rather than creating one.
                    return Ok(EligibilityOutcome {
                        session_locked: false,
                        existing_approved_claim: Some(claim.claim_id.clone()),
                    });
                }
                _ => {}
            }
            if claim.has_live_token(now) {
                return Err(AppError::ActiveQrExists(item_id.to_string()));
            }
        }

        let user_claims = self.store.claims_for_student(student_id).await?;
        let pending_elsewhere = user_claims
            .iter()
            .filter(|c| c.found_item_id != item_id)
            .filter(|c| matches!(c.status, ClaimStatus::Pending | ClaimStatus::PendingApproval))
            .count();
        if pending_elsewhere >= self.config.max_concurrent_claims {
            return Err(AppError::MaxConcurrentClaimsExceeded);
        }

        self.session.acquire_lock(student_id).await?;

        Ok(EligibilityOutcome {
            session_locked: true,
            existing_approved_claim: None,
        })
    }

    /// Layer 3: for valuable items with a recorded approval, re-verify the
    /// approving admin and the approval age. A valuable item with no
    /// approval yet passes with `ApprovalState::Pending`.
    async fn check_valuable_item(&self, item: &FoundItem) -> Result<ApprovalState, AppError> {
        if !item.is_valuable {
            return Ok(ApprovalState::NotRequired);
        }

        let approved_by = match &item.approved_by {
            Some(admin_id) => admin_id,
            None => return Ok(ApprovalState::Pending),
        };

        let admin = self
            .store
            .get_user(approved_by)
            .await?
            .ok_or_else(|| AppError::InvalidApprovingAdmin(approved_by.clone()))?;

        if admin.role != reclaim_core::models::UserRole::Admin {
            return Err(AppError::InsufficientAdminPrivileges {
                admin_id: approved_by.clone(),
                role: admin.role.to_string(),
            });
        }
        if admin.status != reclaim_core::models::UserStatus::Active {
            return Err(AppError::InactiveApprovingAdmin {
                admin_id: approved_by.clone(),
                status: admin.status.to_string(),
            });
        }

        if let Some(approved_at) = item.approved_at {
            let expires = approved_at + ChronoDuration::hours(self.config.approval_window_hours);
            if Utc::now() > expires {
                return Err(AppError::ApprovalExpired {
                    valid_hours: self.config.approval_window_hours,
                });
            }
        }

        Ok(ApprovalState::Approved {
            approved_by: approved_by.clone(),
        })
    }

    /// Layer 4: classification only. Non-valuable items need auto-approval
    /// enabled; valuable items pass whether approval is pending or recorded.
    fn check_claim_state(&self, item: &FoundItem) -> Result<(), AppError> {
        if !item.is_valuable && !self.config.auto_approval_enabled {
            return Err(AppError::AutoApprovalDisabled);
        }
        Ok(())
    }
}
