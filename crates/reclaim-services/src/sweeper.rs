//! Background expiry sweeper
//!
//! Periodic job with two passes: demote approved claims whose token expiry
//! has passed to `expired`, and close lockers whose auto-close deadline has
//! passed. The claim pass is the only path that moves a claim out of
//! `approved` without kiosk or admin action.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::interval;

use reclaim_core::config::EngineConfig;
use reclaim_core::error::AppError;
use reclaim_core::models::ClaimStatus;
use reclaim_db::RecordStore;

use crate::cache::ClaimCache;
use crate::kiosk::close_in_place;

pub struct ExpirySweeper {
    store: Arc<dyn RecordStore>,
    cache: Arc<ClaimCache>,
    config: EngineConfig,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<ClaimCache>, config: EngineConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Start the background sweep loop. Returns a JoinHandle for graceful
    /// shutdown; each tick runs both passes and logs failures without
    /// stopping the loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(self.config.sweep_interval);

            loop {
                tick.tick().await;

                match self.sweep_claims().await {
                    Ok(expired) if expired > 0 => {
                        tracing::info!(expired, "expired stale approved claims");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "claim expiry sweep failed"),
                }

                match self.sweep_lockers().await {
                    Ok(closed) if closed > 0 => {
                        tracing::info!(closed, "auto-closed lockers past their deadline");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "locker auto-close sweep failed"),
                }
            }
        })
    }

    /// One claim pass: `approved` claims holding a token whose expiry has
    /// passed become `expired`. Terminal and never-approved claims are
    /// skipped. Returns the number of claims transitioned.
    pub async fn sweep_claims(&self) -> Result<usize, AppError> {
        let now = Utc::now();
        let mut expired = 0usize;

        for mut claim in self.store.all_claims().await? {
            if claim.status.is_terminal() {
                continue;
            }
            // Pending claims were never approved; they are not the sweeper's
            // to expire.
            if claim.status != ClaimStatus::Approved {
                continue;
            }
            let has_token = claim
                .qr_token
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false);
            if !has_token {
                continue;
            }
            let Some(expires_at) = claim.expires_at else {
                continue;
            };
            if expires_at >= now {
                continue;
            }

            claim.status = ClaimStatus::Expired;
            claim.updated_at = now;
            self.store.put_claim(&claim).await?;
            self.cache.invalidate(&claim.claim_id);
            tracing::debug!(claim_id = %claim.claim_id, "claim expired");
            expired += 1;
        }

        Ok(expired)
    }

    /// One locker pass: open lockers whose auto-close deadline has passed
    /// revert to `occupied`. Returns the number of lockers closed.
    pub async fn sweep_lockers(&self) -> Result<usize, AppError> {
        let now = Utc::now();
        let mut closed = 0usize;

        for mut locker in self.store.open_lockers().await? {
            let due = locker.auto_close_at.map(|at| at <= now).unwrap_or(true);
            if !due {
                continue;
            }
            close_in_place(&mut locker);
            self.store.put_locker(&locker).await?;
            tracing::debug!(locker_id = %locker.locker_id, "locker auto-closed");
            closed += 1;
        }

        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use reclaim_core::models::{Claim, Locker, LockerStatus};
    use reclaim_db::MemoryStore;

    fn sweeper(store: Arc<MemoryStore>) -> ExpirySweeper {
        ExpirySweeper::new(
            store,
            Arc::new(ClaimCache::disabled()),
            EngineConfig::default(),
        )
    }

    fn claim_with(
        id: &str,
        status: ClaimStatus,
        token: Option<&str>,
        expires_in_secs: Option<i64>,
    ) -> Claim {
        let mut claim = Claim::new(id.into(), "FI0001".into(), "2300001".into());
        claim.status = status;
        claim.qr_token = token.map(String::from);
        claim.expires_at = expires_in_secs.map(|s| Utc::now() + ChronoDuration::seconds(s));
        claim
    }

    #[tokio::test]
    async fn test_expires_stale_approved_claims_only() {
        let store = Arc::new(MemoryStore::new());
        let token = Some("abcDEF123ghiJKL456mnoPQR");

        // Should expire: approved, token, past expiry.
        store
            .put_claim(&claim_with("C0001", ClaimStatus::Approved, token, Some(-60)))
            .await
            .unwrap();
        // Should stay: approved but still live.
        store
            .put_claim(&claim_with("C0002", ClaimStatus::Approved, token, Some(60)))
            .await
            .unwrap();
        // Should stay: pending was never approved.
        store
            .put_claim(&claim_with("C0003", ClaimStatus::Pending, token, Some(-60)))
            .await
            .unwrap();
        // Should stay: terminal.
        store
            .put_claim(&claim_with("C0004", ClaimStatus::Completed, token, Some(-60)))
            .await
            .unwrap();
        // Should stay: approved but no token issued.
        store
            .put_claim(&claim_with("C0005", ClaimStatus::Approved, None, Some(-60)))
            .await
            .unwrap();

        let expired = sweeper(store.clone()).sweep_claims().await.unwrap();
        assert_eq!(expired, 1);

        assert_eq!(
            store.get_claim("C0001").await.unwrap().unwrap().status,
            ClaimStatus::Expired
        );
        for (id, status) in [
            ("C0002", ClaimStatus::Approved),
            ("C0003", ClaimStatus::Pending),
            ("C0004", ClaimStatus::Completed),
            ("C0005", ClaimStatus::Approved),
        ] {
            assert_eq!(store.get_claim(id).await.unwrap().unwrap().status, status);
        }
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_claim(&claim_with(
                "C0001",
                ClaimStatus::Approved,
                Some("abcDEF123ghiJKL456mnoPQR"),
                Some(-60),
            ))
            .await
            .unwrap();

        let sweeper = sweeper(store.clone());
        assert_eq!(sweeper.sweep_claims().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_claims().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_locker_auto_close() {
        let store = Arc::new(MemoryStore::new());

        let mut due = Locker::new("L01".into());
        due.status = LockerStatus::Open;
        due.auto_close_at = Some(Utc::now() - ChronoDuration::seconds(5));
        store.put_locker(&due).await.unwrap();

        let mut not_due = Locker::new("L02".into());
        not_due.status = LockerStatus::Open;
        not_due.auto_close_at = Some(Utc::now() + ChronoDuration::seconds(60));
        store.put_locker(&not_due).await.unwrap();

        let closed = sweeper(store.clone()).sweep_lockers().await.unwrap();
        assert_eq!(closed, 1);

        let l01 = store.get_locker("L01").await.unwrap().unwrap();
        assert_eq!(l01.status, LockerStatus::Occupied);
        assert!(l01.auto_close_at.is_none());
        assert_eq!(
            store.get_locker("L02").await.unwrap().unwrap().status,
            LockerStatus::Open
        );
    }

    #[tokio::test]
    async fn test_open_locker_without_deadline_is_closed() {
        // An open locker must always carry a deadline; one without it is
        // inconsistent state and gets closed on the next pass.
        let store = Arc::new(MemoryStore::new());
        let mut locker = Locker::new("L01".into());
        locker.status = LockerStatus::Open;
        store.put_locker(&locker).await.unwrap();

        assert_eq!(sweeper(store.clone()).sweep_lockers().await.unwrap(), 1);
    }
}
