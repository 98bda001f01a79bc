//! Claim read cache
//!
//! A short-lived cache in front of claim reads to cut repeated store
//! round-trips within one request flow. It is an explicit, injected
//! component with bounded capacity and TTL - construct it with capacity 0 to
//! disable caching entirely (tests, or stores where stale reads are
//! unacceptable).

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reclaim_core::models::Claim;

pub struct ClaimCache {
    inner: Option<Mutex<LruCache<String, (Claim, Instant)>>>,
    ttl: Duration,
}

impl ClaimCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            ttl,
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn get(&self, claim_id: &str) -> Option<Claim> {
        let inner = self.inner.as_ref()?;
        let mut cache = inner.lock().ok()?;
        match cache.get(claim_id) {
            Some((claim, cached_at)) if cached_at.elapsed() < self.ttl => Some(claim.clone()),
            Some(_) => {
                cache.pop(claim_id);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, claim: &Claim) {
        if let Some(inner) = self.inner.as_ref() {
            if let Ok(mut cache) = inner.lock() {
                cache.put(claim.claim_id.clone(), (claim.clone(), Instant::now()));
            }
        }
    }

    pub fn invalidate(&self, claim_id: &str) {
        if let Some(inner) = self.inner.as_ref() {
            if let Ok(mut cache) = inner.lock() {
                cache.pop(claim_id);
            }
        }
    }

    pub fn clear(&self) {
        if let Some(inner) = self.inner.as_ref() {
            if let Ok(mut cache) = inner.lock() {
                cache.clear();
            }
        }
    }
}
