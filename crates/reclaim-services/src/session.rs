//! Per-user claim-creation guards
//!
//! Two in-process maps: a sliding-window rate limiter and a TTL'd session
//! lock. Both are process-local state - safe for a single kiosk-serving
//! instance, not across horizontally scaled instances (see DESIGN.md).
//!
//! The session lock protects only the claim-creation race. It is released
//! explicitly once creation succeeds or fails; holding it for the claim's
//! whole lifecycle would block a user's next unrelated claim for the full
//! TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use reclaim_core::config::EngineConfig;
use reclaim_core::error::AppError;

/// In-process rate limiter and session-lock registry, keyed by user id.
pub struct SessionGuard {
    window: Duration,
    max_requests: usize,
    lock_ttl: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
    locks: Mutex<HashMap<String, Instant>>,
}

impl SessionGuard {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            window: config.rate_limit_window,
            max_requests: config.rate_limit_max_requests,
            lock_ttl: config.session_lock_ttl,
            requests: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `user_id`, rejecting when the trailing window
    /// already holds the maximum. Stale timestamps are pruned on each check.
    pub async fn check_rate_limit(&self, user_id: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        let timestamps = requests.entry(user_id.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            tracing::warn!(user_id, "rate limit exceeded");
            return Err(AppError::RateLimitExceeded);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Acquire the claim-creation lock for `user_id`. Fails fast when the
    /// user already holds a lock that has not yet outlived its TTL.
    pub async fn acquire_lock(&self, user_id: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut locks = self.locks.lock().await;

        if let Some(acquired_at) = locks.get(user_id) {
            if now.duration_since(*acquired_at) < self.lock_ttl {
                tracing::warn!(user_id, "claim session already locked");
                return Err(AppError::ClaimSessionLocked);
            }
        }

        locks.insert(user_id.to_string(), now);
        Ok(())
    }

    /// Release the claim-creation lock. Releasing an unheld lock is a no-op.
    pub async fn release_lock(&self, user_id: &str) {
        self.locks.lock().await.remove(user_id);
    }

    /// Whether `user_id` currently holds an unexpired lock.
    pub async fn lock_held(&self, user_id: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(user_id)
            .map(|t| Instant::now().duration_since(*t) < self.lock_ttl)
            .unwrap_or(false)
    }

    /// Drop expired locks and empty request windows to bound memory.
    pub async fn cleanup_expired(&self) {
        let now = Instant::now();
        {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, acquired_at| now.duration_since(*acquired_at) < self.lock_ttl);
        }
        {
            let mut requests = self.requests.lock().await;
            for timestamps in requests.values_mut() {
                timestamps.retain(|t| now.duration_since(*t) < self.window);
            }
            requests.retain(|_, timestamps| !timestamps.is_empty());
        }
    }
}
