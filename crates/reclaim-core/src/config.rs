//! Configuration module
//!
//! Engine configuration with compiled defaults and `RECLAIM_*` environment
//! overrides. The engine itself never reads ambient environment state at
//! request time; everything is resolved once into an `EngineConfig` and
//! injected into the services.

use std::env;
use std::time::Duration;

// Defaults for the claim-creation guards
const RATE_LIMIT_WINDOW_SECS: u64 = 60;
const RATE_LIMIT_MAX_REQUESTS: usize = 10;
const SESSION_LOCK_TTL_SECS: u64 = 30 * 60;
const MAX_CONCURRENT_CLAIMS: usize = 1;

// Defaults for tokens and approvals
const TOKEN_TTL_SECS: i64 = 5 * 60;
const TOKEN_LENGTH: usize = 24;
const APPROVAL_WINDOW_HOURS: i64 = 24;

// Defaults for background jobs and lockers
const SWEEP_INTERVAL_SECS: u64 = 60;
const LOCKER_MAX_OPEN_SECS: i64 = 3600;
const LOCKER_DEFAULT_OPEN_SECS: i64 = 10;

// Identity matching / capture
const MATCH_THRESHOLD: f32 = 0.85;

// Claim read cache
const CLAIM_CACHE_TTL_SECS: u64 = 30;
const CLAIM_CACHE_CAPACITY: usize = 256;

/// Maximum length accepted for student remarks on a claim.
pub const MAX_REMARKS_LEN: usize = 300;

/// Engine-wide configuration, shared by the pipeline, token services, and
/// background jobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Trailing window for the per-user rate limiter.
    pub rate_limit_window: Duration,
    /// Maximum claim requests allowed per user within the window.
    pub rate_limit_max_requests: usize,
    /// TTL after which an abandoned session lock expires on its own.
    pub session_lock_ttl: Duration,
    /// Maximum number of other pending claims a user may hold.
    pub max_concurrent_claims: usize,
    /// Lifetime of an issued QR token.
    pub token_ttl_secs: i64,
    /// Length of the generated alphanumeric token.
    pub token_length: usize,
    /// How long an admin approval of a valuable item remains usable.
    pub approval_window_hours: i64,
    /// Interval between expiry sweeper passes.
    pub sweep_interval: Duration,
    /// Upper bound for a locker's open duration.
    pub locker_max_open_secs: i64,
    /// Open duration applied when the caller provides none or an invalid one.
    pub locker_default_open_secs: i64,
    /// Similarity threshold for identity matching.
    pub match_threshold: f32,
    /// TTL for the injected claim read cache.
    pub claim_cache_ttl: Duration,
    /// Capacity of the claim read cache; zero disables caching.
    pub claim_cache_capacity: usize,
    /// Whether non-valuable claims may be auto-approved at creation.
    pub auto_approval_enabled: bool,
    /// Operational escape hatch: log and continue on token mismatch or
    /// inactive account during verification. Never enable in normal service.
    pub allow_token_mismatch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            rate_limit_max_requests: RATE_LIMIT_MAX_REQUESTS,
            session_lock_ttl: Duration::from_secs(SESSION_LOCK_TTL_SECS),
            max_concurrent_claims: MAX_CONCURRENT_CLAIMS,
            token_ttl_secs: TOKEN_TTL_SECS,
            token_length: TOKEN_LENGTH,
            approval_window_hours: APPROVAL_WINDOW_HOURS,
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
            locker_max_open_secs: LOCKER_MAX_OPEN_SECS,
            locker_default_open_secs: LOCKER_DEFAULT_OPEN_SECS,
            match_threshold: MATCH_THRESHOLD,
            claim_cache_ttl: Duration::from_secs(CLAIM_CACHE_TTL_SECS),
            claim_cache_capacity: CLAIM_CACHE_CAPACITY,
            auto_approval_enabled: true,
            allow_token_mismatch: false,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment, loading a `.env` file when
    /// present. Unset or unparseable variables keep their defaults.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build a configuration from the current process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rate_limit_window: Duration::from_secs(env_parse(
                "RECLAIM_RATE_LIMIT_WINDOW_SECS",
                RATE_LIMIT_WINDOW_SECS,
            )),
            rate_limit_max_requests: env_parse(
                "RECLAIM_RATE_LIMIT_MAX_REQUESTS",
                RATE_LIMIT_MAX_REQUESTS,
            ),
            session_lock_ttl: Duration::from_secs(env_parse(
                "RECLAIM_SESSION_LOCK_TTL_SECS",
                SESSION_LOCK_TTL_SECS,
            )),
            max_concurrent_claims: env_parse(
                "RECLAIM_MAX_CONCURRENT_CLAIMS",
                MAX_CONCURRENT_CLAIMS,
            ),
            token_ttl_secs: env_parse("RECLAIM_TOKEN_TTL_SECS", TOKEN_TTL_SECS),
            token_length: env_parse("RECLAIM_TOKEN_LENGTH", TOKEN_LENGTH).clamp(8, 32),
            approval_window_hours: env_parse(
                "RECLAIM_APPROVAL_WINDOW_HOURS",
                APPROVAL_WINDOW_HOURS,
            ),
            sweep_interval: Duration::from_secs(env_parse(
                "RECLAIM_SWEEP_INTERVAL_SECS",
                SWEEP_INTERVAL_SECS,
            )),
            locker_max_open_secs: env_parse("RECLAIM_LOCKER_MAX_OPEN_SECS", LOCKER_MAX_OPEN_SECS),
            locker_default_open_secs: env_parse(
                "RECLAIM_LOCKER_DEFAULT_OPEN_SECS",
                LOCKER_DEFAULT_OPEN_SECS,
            ),
            match_threshold: env_parse("RECLAIM_MATCH_THRESHOLD", MATCH_THRESHOLD),
            claim_cache_ttl: Duration::from_secs(env_parse(
                "RECLAIM_CLAIM_CACHE_TTL_SECS",
                CLAIM_CACHE_TTL_SECS,
            )),
            claim_cache_capacity: env_parse("RECLAIM_CLAIM_CACHE_CAPACITY", CLAIM_CACHE_CAPACITY),
            auto_approval_enabled: env_bool(
                "RECLAIM_AUTO_APPROVAL_ENABLED",
                defaults.auto_approval_enabled,
            ),
            allow_token_mismatch: env_bool("RECLAIM_ALLOW_TOKEN_MISMATCH", false),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}
