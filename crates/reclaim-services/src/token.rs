//! QR token issuance
//!
//! Builds, encrypts, and persists the time-limited claim token. Encryption
//! goes through the versioned envelope; when the cipher ring is missing or
//! misconfigured the issuer degrades to a plaintext JSON payload instead of
//! failing the operation - an explicit, logged trade-off that favors kiosk
//! availability. Verification never accepts that downgrade silently (see
//! `verify`).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use reclaim_core::config::EngineConfig;
use reclaim_core::envelope::TokenCipher;
use reclaim_core::error::AppError;
use reclaim_core::models::{ClaimStatus, TokenPayload};
use reclaim_db::RecordStore;

use crate::cache::ClaimCache;
use crate::claims::SYSTEM_AUTO_APPROVAL;

/// Renders a QR payload to a scannable artifact and stores it, returning an
/// opaque image reference. Rendering details are outside the engine.
pub trait QrImageSink: Send + Sync {
    fn store_qr(&self, claim_id: &str, payload: &str) -> Result<String, AppError>;
}

/// In-memory sink for tests and single-kiosk deployments without blob
/// storage: remembers the payload and hands back a deterministic-looking
/// reference.
#[derive(Default)]
pub struct MemoryQrSink {
    payloads: Mutex<HashMap<String, String>>,
}

impl MemoryQrSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload most recently stored for a claim.
    pub fn payload_for(&self, claim_id: &str) -> Option<String> {
        self.payloads
            .lock()
            .ok()
            .and_then(|map| map.get(claim_id).cloned())
    }
}

impl QrImageSink for MemoryQrSink {
    fn store_qr(&self, claim_id: &str, payload: &str) -> Result<String, AppError> {
        if let Ok(mut map) = self.payloads.lock() {
            map.insert(claim_id.to_string(), payload.to_string());
        }
        Ok(format!("claims/qrs/qr_{}.png", Uuid::new_v4().simple()))
    }
}

/// Issuance result returned to the student flow.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub claim_id: String,
    pub qr_image_ref: String,
    pub expires_at: DateTime<Utc>,
    /// False when the payload was written in degraded plaintext mode.
    pub encrypted: bool,
}

pub struct TokenIssuer {
    store: Arc<dyn RecordStore>,
    cache: Arc<ClaimCache>,
    cipher: Option<TokenCipher>,
    sink: Arc<dyn QrImageSink>,
    config: EngineConfig,
}

impl TokenIssuer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<ClaimCache>,
        cipher: Option<TokenCipher>,
        sink: Arc<dyn QrImageSink>,
        config: EngineConfig,
    ) -> Self {
        if cipher.is_none() {
            tracing::warn!("token cipher not configured; QR payloads will be plaintext");
        }
        Self {
            store,
            cache,
            cipher,
            sink,
            config,
        }
    }

    /// Issue a time-limited token for an eligible claim.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, claim_id: &str) -> Result<IssuedToken, AppError> {
        let mut claim = self
            .store
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| AppError::ClaimNotFound(claim_id.to_string()))?;

        // Preconditions: identity captured and method selected.
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

        let item = self.store.get_item(&claim.found_item_id).await?;
        let is_valuable = item.as_ref().map(|i| i.is_valuable).unwrap_or(false);

        // Valuable items must carry a recorded approval before any token
        // exists for them.
        if is_valuable && claim.approved_by.is_none() && claim.status != ClaimStatus::Approved {
            return Err(AppError::AdminApprovalRequired);
        }

        // One live token per (student, item) pair: scan for any other claim
        // of the pair holding an unexpired token.
        let now = Utc::now();
        let siblings = self
            .store
            .claims_for_pair(&claim.student_id, &claim.found_item_id)
            .await?;
        if siblings
            .iter()
            .any(|c| c.claim_id != claim.claim_id && c.has_live_token(now))
        {
            return Err(AppError::QrAlreadyRegisteredForUser);
        }

        let token = self.generate_token();
        let expires_at = now + ChronoDuration::seconds(self.config.token_ttl_secs);
        let payload = TokenPayload {
            claim_id: claim.claim_id.clone(),
            student_id: claim.student_id.clone(),
            token: token.clone(),
        };
        let payload_json = serde_json::to_string(&payload)?;

        let (wire_payload, encrypted) = match &self.cipher {
            Some(cipher) => match cipher.seal(payload_json.as_bytes()) {
                Ok(sealed) => (sealed, true),
                Err(e) => {
                    tracing::warn!(
                        claim_id,
                        error = %e,
                        "envelope encryption unavailable; falling back to plaintext payload"
                    );
                    (payload_json.clone(), false)
                }
            },
            None => {
                tracing::warn!(
                    claim_id,
                    "token cipher not configured; issuing plaintext payload"
                );
                (payload_json.clone(), false)
            }
        };

        let qr_image_ref = self.sink.store_qr(&claim.claim_id, &wire_payload)?;

        claim.qr_token = Some(token);
        claim.qr_image_ref = Some(qr_image_ref.clone());
        claim.expires_at = Some(expires_at);
        // Backfill the system approval stamp for non-valuable items issued
        // before the stamp existed.
        if !is_valuable && claim.approved_by.is_none() {
            claim.approved_by = Some(SYSTEM_AUTO_APPROVAL.to_string());
            claim.approved_at = Some(now);
        }
        claim.updated_at = now;
        self.store.put_claim(&claim).await?;
        self.cache.invalidate(&claim.claim_id);

        tracing::info!(
            claim_id,
            expires_at = %expires_at,
            encrypted,
            "token issued"
        );

        Ok(IssuedToken {
            claim_id: claim.claim_id,
            qr_image_ref,
            expires_at,
            encrypted,
        })
    }

    fn generate_token(&self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.config.token_length)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose, Engine as _};
    use reclaim_core::models::{Claim, FoundItem, VerificationMethod};
    use reclaim_core::validation::is_valid_token;
    use reclaim_db::MemoryStore;

    fn cipher() -> TokenCipher {
        let mut map = HashMap::new();
        map.insert(
            "v1".to_string(),
            general_purpose::STANDARD.encode([7u8; 32]),
        );
        TokenCipher::from_key_map(map, None).unwrap()
    }

    async fn seeded_store(valuable: bool) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut item = FoundItem::new("FI0001".into(), "Wallet".into(), "accessory".into());
        item.is_valuable = valuable;
        store.put_item(&item).await.unwrap();

        let mut claim = Claim::new("C0001".into(), "FI0001".into(), "2300001".into());
        claim.face_embedding = Some(vec![0.1; 256]);
        claim.verification_method = Some(VerificationMethod::QrFace);
        claim.status = ClaimStatus::Approved;
        store.put_claim(&claim).await.unwrap();
        store
    }

    fn issuer(
        store: Arc<MemoryStore>,
        cipher: Option<TokenCipher>,
        sink: Arc<MemoryQrSink>,
    ) -> TokenIssuer {
        TokenIssuer::new(
            store,
            Arc::new(ClaimCache::disabled()),
            cipher,
            sink,
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_issue_sets_token_and_expiry() {
        let store = seeded_store(false).await;
        let sink = Arc::new(MemoryQrSink::new());
        let issuer = issuer(store.clone(), Some(cipher()), sink.clone());

        let before = Utc::now();
        let issued = issuer.issue("C0001").await.unwrap();
        assert!(issued.encrypted);

        let claim = store.get_claim("C0001").await.unwrap().unwrap();
        let token = claim.qr_token.unwrap();
        assert_eq!(token.len(), 24);
        assert!(is_valid_token(&token));

        // Expiry is exactly five minutes after the issuance timestamp.
        let expires_at = claim.expires_at.unwrap();
        let ttl = expires_at - before;
        assert!(ttl >= ChronoDuration::seconds(299) && ttl <= ChronoDuration::seconds(301));
        assert_eq!(issued.expires_at, expires_at);

        // The rendered payload is an envelope, not plaintext.
        let payload = sink.payload_for("C0001").unwrap();
        assert!(payload.contains("\"v\":\"v1\""));
        assert!(!payload.contains("C0001"));
    }

    #[tokio::test]
    async fn test_issue_without_capture_or_method_fails() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_item(&FoundItem::new(
                "FI0001".into(),
                "Wallet".into(),
                "accessory".into(),
            ))
            .await
            .unwrap();
        let mut claim = Claim::new("C0001".into(), "FI0001".into(), "2300001".into());
        claim.status = ClaimStatus::Approved;
        store.put_claim(&claim).await.unwrap();

        let issuer = issuer(store.clone(), Some(cipher()), Arc::new(MemoryQrSink::new()));
        assert!(matches!(
            issuer.issue("C0001").await,
            Err(AppError::FaceNotCaptured)
        ));

        claim.face_embedding = Some(vec![0.1; 256]);
        store.put_claim(&claim).await.unwrap();
        assert!(matches!(
            issuer.issue("C0001").await,
            Err(AppError::MethodNotSelected)
        ));
    }

    #[tokio::test]
    async fn test_issue_requires_approval_for_valuable_items() {
        let store = seeded_store(true).await;
        let mut claim = store.get_claim("C0001").await.unwrap().unwrap();
        claim.status = ClaimStatus::Pending;
        claim.approved_by = None;
        store.put_claim(&claim).await.unwrap();

        let issuer = issuer(store.clone(), Some(cipher()), Arc::new(MemoryQrSink::new()));
        assert!(matches!(
            issuer.issue("C0001").await,
            Err(AppError::AdminApprovalRequired)
        ));
    }

    #[tokio::test]
    async fn test_issue_rejects_second_live_token_for_pair() {
        let store = seeded_store(false).await;
        // A sibling claim for the same pair already holds a live token.
        let mut sibling = Claim::new("C0002".into(), "FI0001".into(), "2300001".into());
        sibling.status = ClaimStatus::Approved;
        sibling.qr_token = Some("abcDEF123ghiJKL456mnoPQR".into());
        sibling.expires_at = Some(Utc::now() + ChronoDuration::minutes(4));
        store.put_claim(&sibling).await.unwrap();

        let issuer = issuer(store.clone(), Some(cipher()), Arc::new(MemoryQrSink::new()));
        assert!(matches!(
            issuer.issue("C0001").await,
            Err(AppError::QrAlreadyRegisteredForUser)
        ));
    }

    #[tokio::test]
    async fn test_issue_degrades_to_plaintext_without_cipher() {
        let store = seeded_store(false).await;
        let sink = Arc::new(MemoryQrSink::new());
        let issuer = issuer(store.clone(), None, sink.clone());

        let issued = issuer.issue("C0001").await.unwrap();
        assert!(!issued.encrypted);

        let payload = sink.payload_for("C0001").unwrap();
        let parsed: TokenPayload = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.claim_id, "C0001");
        assert_eq!(parsed.student_id, "2300001");
    }

    #[tokio::test]
    async fn test_issue_backfills_system_approval_for_non_valuable() {
        let store = seeded_store(false).await;
        let mut claim = store.get_claim("C0001").await.unwrap().unwrap();
        claim.approved_by = None;
        claim.approved_at = None;
        store.put_claim(&claim).await.unwrap();

        let issuer = issuer(store.clone(), Some(cipher()), Arc::new(MemoryQrSink::new()));
        issuer.issue("C0001").await.unwrap();

        let claim = store.get_claim("C0001").await.unwrap().unwrap();
        assert_eq!(claim.approved_by.as_deref(), Some(SYSTEM_AUTO_APPROVAL));
        assert!(claim.approved_at.is_some());
    }
}
