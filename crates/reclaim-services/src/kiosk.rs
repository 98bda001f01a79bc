//! Kiosk finalization and locker control
//!
//! Finalization is the single place where claim, item, and locker state move
//! together, and it does so through one atomic batch write: observers see
//! the pre-state or the post-state, never a partially released item.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

use reclaim_core::config::EngineConfig;
use reclaim_core::error::AppError;
use reclaim_core::models::{ClaimStatus, ItemStatus, Locker, LockerStatus};
use reclaim_db::{RecordBatch, RecordStore};

use crate::cache::ClaimCache;

/// Locker state reported back to the kiosk after finalize/open.
#[derive(Debug, Clone)]
pub struct LockerState {
    pub locker_id: String,
    pub status: LockerStatus,
    pub auto_close_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FinalizeResult {
    pub claim_id: String,
    pub claim_status: ClaimStatus,
    pub locker: Option<LockerState>,
}

pub struct LockerFinalizer {
    store: Arc<dyn RecordStore>,
    cache: Arc<ClaimCache>,
    config: EngineConfig,
}

impl LockerFinalizer {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<ClaimCache>, config: EngineConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    fn clamp_duration(&self, duration_secs: i64) -> i64 {
        if duration_secs <= 0 || duration_secs > self.config.locker_max_open_secs {
            self.config.locker_default_open_secs
        } else {
            duration_secs
        }
    }

    /// Atomically complete an approved claim: claim -> `completed`, item ->
    /// `claimed`, and (when assigned) locker -> `open` with an auto-close
    /// deadline. Intended to be called after token verification and the
    /// identity check have both passed.
    #[tracing::instrument(skip(self))]
    pub async fn finalize(
        &self,
        claim_id: &str,
        duration_secs: i64,
    ) -> Result<FinalizeResult, AppError> {
        let duration_secs = self.clamp_duration(duration_secs);

        let mut claim = self
            .store
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| AppError::ClaimNotFound(claim_id.to_string()))?;

        if claim
            .face_embedding
            .as_ref()
            .map(|e| e.is_empty())
            .unwrap_or(true)
        {
            return Err(AppError::FaceNotCaptured);
        }
        if claim.verification_method.is_none() {
            return Err(AppError::MethodNotSelected);
        }
        if claim.status != ClaimStatus::Approved {
            return Err(AppError::ClaimNotApproved {
                status: claim.status.to_string(),
            });
        }

        let mut item = self
            .store
            .get_item(&claim.found_item_id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound(claim.found_item_id.clone()))?;

        let now = Utc::now();
        let student_id = claim.student_id.clone();

        claim.status = ClaimStatus::Completed;
        claim.verified_at = Some(now);
        claim.updated_at = now;

        item.status = ItemStatus::Claimed;
        item.claimed_by = Some(student_id.clone());
        item.claimed_at = Some(now);
        item.updated_at = now;

        let mut locker_state = None;
        let mut batch = RecordBatch::new();

        if let Some(locker_id) = item.locker_id.clone() {
            let mut locker = self
                .store
                .get_locker(&locker_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Locker {}", locker_id)))?;

            match locker.status {
                LockerStatus::Open => {
                    return Err(AppError::Conflict("Locker is already open".into()));
                }
                LockerStatus::Occupied => {}
                other => {
                    return Err(AppError::Conflict(format!(
                        "Only occupied lockers can be opened (status: {})",
                        other
                    )));
                }
            }

            let auto_close_at = now + ChronoDuration::seconds(duration_secs);
            locker.status = LockerStatus::Open;
            locker.open_started_at = Some(now);
            locker.opened_by = Some(student_id);
            locker.auto_close_at = Some(auto_close_at);
            locker.updated_at = now;

            locker_state = Some(LockerState {
                locker_id: locker.locker_id.clone(),
                status: LockerStatus::Open,
                auto_close_at: Some(auto_close_at),
            });
            batch = batch.put_locker(locker);
        }

        let batch = batch.put_claim(claim).put_item(item);
        self.store.apply(batch).await?;
        self.cache.invalidate(claim_id);

        tracing::info!(
            claim_id,
            locker = locker_state.as_ref().map(|l| l.locker_id.as_str()),
            "claim finalized at kiosk"
        );

        Ok(FinalizeResult {
            claim_id: claim_id.to_string(),
            claim_status: ClaimStatus::Completed,
            locker: locker_state,
        })
    }

    /// Open a locker directly (kiosk maintenance path). Only `occupied`
    /// lockers can be opened.
    #[tracing::instrument(skip(self))]
    pub async fn open_locker(
        &self,
        locker_id: &str,
        duration_secs: i64,
    ) -> Result<LockerState, AppError> {
        let duration_secs = self.clamp_duration(duration_secs);

        let mut locker = self
            .store
            .get_locker(locker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Locker {}", locker_id)))?;

        match locker.status {
            LockerStatus::Open => {
                return Err(AppError::Conflict("Locker is already open".into()));
            }
            LockerStatus::Occupied => {}
            other => {
                return Err(AppError::Conflict(format!(
                    "Only occupied lockers can be opened (status: {})",
                    other
                )));
            }
        }

        let now = Utc::now();
        locker.status = LockerStatus::Open;
        locker.open_started_at = Some(now);
        locker.opened_by = Some("kiosk".to_string());
        locker.auto_close_at = Some(now + ChronoDuration::seconds(duration_secs));
        locker.updated_at = now;
        self.store.put_locker(&locker).await?;

        Ok(LockerState {
            locker_id: locker.locker_id,
            status: LockerStatus::Open,
            auto_close_at: locker.auto_close_at,
        })
    }

    /// Close an open locker, reverting it to `occupied` and clearing the
    /// auto-close deadline.
    #[tracing::instrument(skip(self))]
    pub async fn close_locker(&self, locker_id: &str) -> Result<LockerState, AppError> {
        let mut locker = self
            .store
            .get_locker(locker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Locker {}", locker_id)))?;

        close_in_place(&mut locker);
        self.store.put_locker(&locker).await?;

        Ok(LockerState {
            locker_id: locker.locker_id,
            status: locker.status,
            auto_close_at: None,
        })
    }
}

/// Revert a locker to `occupied`, clearing open metadata. Shared with the
/// auto-close sweep.
pub(crate) fn close_in_place(locker: &mut Locker) {
    locker.status = LockerStatus::Occupied;
    locker.auto_close_at = None;
    locker.open_started_at = None;
    locker.opened_by = None;
    locker.closed_at = Some(Utc::now());
    locker.updated_at = Utc::now();
}
