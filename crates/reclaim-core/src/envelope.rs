//! Token crypto envelope
//!
//! Versioned AES-256-GCM encryption for QR token payloads. Keys are loaded
//! from the environment (never hardcoded) as a JSON map of base64-encoded
//! 256-bit keys, so rotation is adding a version, flipping the active
//! pointer, and keeping old versions until their tokens have expired:
//!
//! ```text
//! RECLAIM_TOKEN_KEYS={"v1":"<base64 32-byte key>","v2":"<base64 32-byte key>"}
//! RECLAIM_TOKEN_ACTIVE=v2
//! ```
//!
//! Sealed envelopes are serialized as `{"v":"<version>","d":"<data>"}` where
//! `d` is base64(nonce || ciphertext); the compact `<version>:<data>` form is
//! accepted on open for payloads produced by older issuers.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::error::AppError;

const KEYS_ENV: &str = "RECLAIM_TOKEN_KEYS";
const ACTIVE_ENV: &str = "RECLAIM_TOKEN_ACTIVE";

/// Wire form of a sealed payload.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: String,
    d: String,
}

/// Versioned AEAD cipher ring for QR token payloads.
#[derive(Clone)]
pub struct TokenCipher {
    keys: HashMap<String, Aes256Gcm>,
    active: String,
}

impl TokenCipher {
    /// Load the cipher ring from `RECLAIM_TOKEN_KEYS` / `RECLAIM_TOKEN_ACTIVE`.
    pub fn from_env() -> Result<Self, AppError> {
        let raw = env::var(KEYS_ENV)
            .map_err(|_| AppError::CryptoConfig(format!("Missing env var {}", KEYS_ENV)))?;
        let key_map: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| AppError::CryptoConfig(format!("Invalid {} JSON: {}", KEYS_ENV, e)))?;
        let active = env::var(ACTIVE_ENV).ok().filter(|v| !v.is_empty());
        Self::from_key_map(key_map, active)
    }

    /// Build the ring from an explicit key map (e.g. for tests; avoids env
    /// mutation). Keys are base64-encoded 32-byte values. When `active` is
    /// `None`, the lexically smallest version becomes active.
    pub fn from_key_map(
        key_map: HashMap<String, String>,
        active: Option<String>,
    ) -> Result<Self, AppError> {
        if key_map.is_empty() {
            return Err(AppError::CryptoConfig(format!(
                "{} must be a non-empty JSON object",
                KEYS_ENV
            )));
        }

        let mut keys = HashMap::with_capacity(key_map.len());
        for (version, encoded) in &key_map {
            let key_bytes = general_purpose::STANDARD.decode(encoded).map_err(|e| {
                AppError::CryptoConfig(format!("Invalid key for version {}: {}", version, e))
            })?;
            if key_bytes.len() != 32 {
                return Err(AppError::CryptoConfig(format!(
                    "Key for version {} must be 32 bytes (256 bits)",
                    version
                )));
            }
            let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
            keys.insert(version.clone(), Aes256Gcm::new(key));
        }

        let active = match active {
            Some(version) => version,
            // Deterministic fallback so every process agrees on the same key.
            None => {
                let mut versions: Vec<&String> = key_map.keys().collect();
                versions.sort();
                versions[0].clone()
            }
        };

        if !keys.contains_key(&active) {
            return Err(AppError::CryptoConfig(format!(
                "Active key version {} not found in key map",
                active
            )));
        }

        Ok(Self { keys, active })
    }

    /// Version used for new envelopes.
    pub fn active_version(&self) -> &str {
        &self.active
    }

    /// Versions this ring can open.
    pub fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.keys.keys().cloned().collect();
        versions.sort();
        versions
    }

    /// Seal plaintext bytes under the active key into the JSON envelope form.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, AppError> {
        let cipher = self
            .keys
            .get(&self.active)
            .ok_or_else(|| AppError::CryptoConfig("Active key disappeared from ring".into()))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| AppError::Internal(format!("Envelope encryption failed: {}", e)))?;

        // Combine nonce and ciphertext, then base64 encode
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        let envelope = Envelope {
            v: self.active.clone(),
            d: general_purpose::STANDARD.encode(&combined),
        };

        serde_json::to_string(&envelope)
            .map_err(|e| AppError::Internal(format!("Envelope serialization failed: {}", e)))
    }

    /// Open an envelope in either the JSON or the compact `version:data` form
    /// and return the original plaintext bytes.
    pub fn open(&self, raw: &str) -> Result<Vec<u8>, AppError> {
        let trimmed = raw.trim();

        let (version, data) = if !trimmed.starts_with('{') {
            match trimmed.split_once(':') {
                Some((version, data)) => (version.to_string(), data.to_string()),
                None => return Err(AppError::TokenDecryptFailed),
            }
        } else {
            let envelope: Envelope =
                serde_json::from_str(trimmed).map_err(|_| AppError::TokenDecryptFailed)?;
            (envelope.v, envelope.d)
        };

        let cipher = self.keys.get(&version).ok_or_else(|| {
            AppError::CryptoConfig(format!("Key version {} not configured", version))
        })?;

        let combined = general_purpose::STANDARD
            .decode(&data)
            .map_err(|_| AppError::TokenDecryptFailed)?;
        if combined.len() < 12 {
            return Err(AppError::TokenDecryptFailed);
        }

        // Extract nonce (first 12 bytes) and ciphertext (rest)
        let nonce = Nonce::from_slice(&combined[..12]);
        cipher
            .decrypt(nonce, &combined[12..])
            .map_err(|_| AppError::TokenDecryptFailed)
    }
}

/// Whether a scanned payload is envelope-shaped. Payloads that are not are
/// treated as legacy plaintext JSON by the verifier; payloads that are but
/// fail to open are rejected outright.
pub fn looks_like_envelope(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        serde_json::from_str::<Envelope>(trimmed).is_ok()
    } else {
        trimmed.split_once(':').is_some()
    }
}
