//! Kiosk-side token verification
//!
//! Decrypts and cross-checks a scanned QR payload against stored claim and
//! user state, then hands back the context the kiosk needs for the identity
//! comparison. Verification is strict about encryption: an envelope-shaped
//! payload that fails to open is rejected; only payloads that were never
//! envelopes are parsed as legacy plaintext JSON.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use reclaim_core::config::EngineConfig;
use reclaim_core::envelope::{looks_like_envelope, TokenCipher};
use reclaim_core::error::AppError;
use reclaim_core::matching::{is_match, MatchMethod};
use reclaim_core::models::{
    Claim, ClaimStatus, FoundItem, TokenPayload, UserStatus, VerificationMethod,
};
use reclaim_db::RecordStore;

use crate::cache::ClaimCache;

/// Context returned on a successful verification, consumed by the identity
/// check and the finalizer.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub claim: Claim,
    pub item: Option<FoundItem>,
    pub verification_method: Option<VerificationMethod>,
    /// Embedding captured at claim time, compared against the kiosk's live
    /// capture for `qr_face`.
    pub stored_embedding: Option<Vec<f32>>,
    /// RFID tag on the item, compared against the badge scan for `qr_rfid`.
    pub rfid_tag: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenVerifier {
    store: Arc<dyn RecordStore>,
    cache: Arc<ClaimCache>,
    cipher: Option<TokenCipher>,
    config: EngineConfig,
}

impl TokenVerifier {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<ClaimCache>,
        cipher: Option<TokenCipher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            cipher,
            config,
        }
    }

    /// Verify a raw scanned payload end to end.
    #[tracing::instrument(skip(self, raw))]
    pub async fn verify(&self, raw: &str) -> Result<VerifiedToken, AppError> {
        let payload = self.parse_payload(raw)?;
        payload.validate_shape()?;

        let claim = match self.cache.get(&payload.claim_id) {
            Some(claim) => claim,
            None => {
                let claim = self
                    .store
                    .get_claim(&payload.claim_id)
                    .await?
                    .ok_or_else(|| AppError::ClaimNotFound(payload.claim_id.clone()))?;
                self.cache.put(&claim);
                claim
            }
        };

        if claim.student_id != payload.student_id {
            return Err(AppError::StudentMismatch);
        }

        let stored_token = claim
            .qr_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::InvalidTokenPayload("QR token missing for this claim".into())
            })?;
        if stored_token != payload.token {
            if self.config.allow_token_mismatch {
                // Operational recovery path, never the default. The scan is
                // allowed through but leaves a loud trace.
                tracing::warn!(
                    claim_id = %claim.claim_id,
                    "token mismatch ignored: RECLAIM_ALLOW_TOKEN_MISMATCH is enabled"
                );
            } else {
                return Err(AppError::TokenMismatch);
            }
        }

        if claim.status != ClaimStatus::Approved {
            return Err(AppError::ClaimNotApproved {
                status: claim.status.to_string(),
            });
        }

        let user = self
            .store
            .get_user(&claim.student_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(claim.student_id.clone()))?;
        if user.status != UserStatus::Active {
            if self.config.allow_token_mismatch {
                tracing::warn!(
                    student_id = %claim.student_id,
                    status = %user.status,
                    "inactive account ignored: RECLAIM_ALLOW_TOKEN_MISMATCH is enabled"
                );
            } else {
                return Err(AppError::AccountInactive {
                    status: user.status.to_string(),
                });
            }
        }

        let expires_at = claim
            .expires_at
            .ok_or_else(|| AppError::InvalidTokenPayload("QR expiration not set".into()))?;
        // The boundary instant counts as expired.
        if Utc::now() >= expires_at {
            return Err(AppError::TokenExpired);
        }

        let item = self.store.get_item(&claim.found_item_id).await?;

        tracing::info!(claim_id = %claim.claim_id, "token verified");

        Ok(VerifiedToken {
            verification_method: claim.verification_method,
            stored_embedding: claim.face_embedding.clone(),
            rfid_tag: item.as_ref().and_then(|i| i.rfid_tag.clone()),
            item,
            expires_at,
            claim,
        })
    }

    /// Compare a live kiosk capture against the embedding stored on the
    /// verified claim. Returns `(matched, score)`.
    pub fn verify_identity(
        &self,
        verified: &VerifiedToken,
        live_embedding: &[f32],
    ) -> Result<(bool, f32), AppError> {
        let stored = verified
            .stored_embedding
            .as_deref()
            .ok_or(AppError::FaceNotCaptured)?;
        is_match(
            stored,
            live_embedding,
            MatchMethod::Cosine,
            self.config.match_threshold,
        )
    }

    fn parse_payload(&self, raw: &str) -> Result<TokenPayload, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidTokenPayload("Empty QR payload".into()));
        }

        if looks_like_envelope(trimmed) {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                AppError::CryptoConfig(
                    "Envelope payload scanned but no token cipher is configured".into(),
                )
            })?;
            let plaintext = cipher.open(trimmed)?;
            return serde_json::from_slice(&plaintext).map_err(|_| {
                AppError::InvalidTokenPayload("Decrypted payload is not a token object".into())
            });
        }

        // Legacy plaintext payload from a degraded issuer.
        tracing::warn!("verifying legacy plaintext QR payload");
        serde_json::from_str(trimmed).map_err(|_| {
            AppError::InvalidTokenPayload("QR payload cannot be decrypted or parsed".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose, Engine as _};
    use chrono::Duration as ChronoDuration;
    use reclaim_core::models::{UserAccount, UserRole};
    use reclaim_db::MemoryStore;
    use std::collections::HashMap;

    fn cipher() -> TokenCipher {
        let mut map = HashMap::new();
        map.insert(
            "v1".to_string(),
            general_purpose::STANDARD.encode([7u8; 32]),
        );
        TokenCipher::from_key_map(map, None).unwrap()
    }

    const TOKEN: &str = "abcDEF123ghiJKL456mnoPQR";

    async fn seeded_store(active_user: bool) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());

        let mut item = FoundItem::new("FI0001".into(), "Wallet".into(), "accessory".into());
        item.rfid_tag = Some("04A1B2C3".into());
        store.put_item(&item).await.unwrap();

        store
            .put_user(&UserAccount {
                user_id: "2300001".into(),
                name: "Student".into(),
                email: None,
                role: UserRole::Student,
                status: if active_user {
                    UserStatus::Active
                } else {
                    UserStatus::Suspended
                },
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut claim = Claim::new("C0001".into(), "FI0001".into(), "2300001".into());
        claim.status = ClaimStatus::Approved;
        claim.qr_token = Some(TOKEN.into());
        claim.expires_at = Some(Utc::now() + ChronoDuration::minutes(5));
        claim.face_embedding = Some(vec![1.0, 0.0, 0.0]);
        claim.verification_method = Some(VerificationMethod::QrFace);
        store.put_claim(&claim).await.unwrap();

        store
    }

    fn verifier(store: Arc<MemoryStore>, cipher_opt: Option<TokenCipher>) -> TokenVerifier {
        TokenVerifier::new(
            store,
            Arc::new(ClaimCache::disabled()),
            cipher_opt,
            EngineConfig::default(),
        )
    }

    fn sealed_payload(claim_id: &str, student_id: &str, token: &str) -> String {
        let payload = TokenPayload {
            claim_id: claim_id.into(),
            student_id: student_id.into(),
            token: token.into(),
        };
        cipher()
            .seal(serde_json::to_string(&payload).unwrap().as_bytes())
            .unwrap()
    }

    #[tokio::test]
    async fn test_verify_happy_path() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, Some(cipher()));

        let verified = verifier
            .verify(&sealed_payload("C0001", "2300001", TOKEN))
            .await
            .unwrap();
        assert_eq!(verified.claim.claim_id, "C0001");
        assert_eq!(verified.rfid_tag.as_deref(), Some("04A1B2C3"));
        assert_eq!(verified.verification_method, Some(VerificationMethod::QrFace));

        // Identity comparison over the returned context.
        let (matched, score) = verifier
            .verify_identity(&verified, &[1.0, 0.0, 0.0])
            .unwrap();
        assert!(matched);
        assert!((score - 1.0).abs() < 1e-6);

        let (matched, score) = verifier
            .verify_identity(&verified, &[0.0, 1.0, 0.0])
            .unwrap();
        assert!(!matched);
        assert!(score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_verify_accepts_legacy_plaintext() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, Some(cipher()));

        let plaintext = format!(
            r#"{{"claim_id":"C0001","student_id":"2300001","token":"{}"}}"#,
            TOKEN
        );
        let verified = verifier.verify(&plaintext).await.unwrap();
        assert_eq!(verified.claim.claim_id, "C0001");
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, Some(cipher()));
        assert!(matches!(
            verifier.verify("complete garbage").await,
            // Has a colon-free shape, so it is parsed as plaintext and fails.
            Err(AppError::InvalidTokenPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_tampered_envelope() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, Some(cipher()));

        let sealed = sealed_payload("C0001", "2300001", TOKEN);
        // Flip a character inside the data field.
        let tampered = sealed.replacen("\"d\":\"", "\"d\":\"AAAA", 1);
        assert!(matches!(
            verifier.verify(&tampered).await,
            Err(AppError::TokenDecryptFailed)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_shape() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, Some(cipher()));

        let bad = sealed_payload("C1", "2300001", TOKEN);
        assert!(matches!(
            verifier.verify(&bad).await,
            Err(AppError::InvalidTokenPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_student_mismatch() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, Some(cipher()));
        assert!(matches!(
            verifier
                .verify(&sealed_payload("C0001", "2300999", TOKEN))
                .await,
            Err(AppError::StudentMismatch)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_token_mismatch() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, Some(cipher()));
        assert!(matches!(
            verifier
                .verify(&sealed_payload("C0001", "2300001", "WrongToken99"))
                .await,
            Err(AppError::TokenMismatch)
        ));
    }

    #[tokio::test]
    async fn test_escape_hatch_allows_token_mismatch() {
        let store = seeded_store(true).await;
        let config = EngineConfig {
            allow_token_mismatch: true,
            ..EngineConfig::default()
        };
        let verifier = TokenVerifier::new(
            store,
            Arc::new(ClaimCache::disabled()),
            Some(cipher()),
            config,
        );
        assert!(verifier
            .verify(&sealed_payload("C0001", "2300001", "WrongToken99"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_verify_rejects_unapproved_claim() {
        let store = seeded_store(true).await;
        let mut claim = store.get_claim("C0001").await.unwrap().unwrap();
        claim.status = ClaimStatus::Pending;
        store.put_claim(&claim).await.unwrap();

        let verifier = verifier(store, Some(cipher()));
        assert!(matches!(
            verifier
                .verify(&sealed_payload("C0001", "2300001", TOKEN))
                .await,
            Err(AppError::ClaimNotApproved { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_inactive_account() {
        let store = seeded_store(false).await;
        let verifier = verifier(store, Some(cipher()));
        assert!(matches!(
            verifier
                .verify(&sealed_payload("C0001", "2300001", TOKEN))
                .await,
            Err(AppError::AccountInactive { .. })
        ));
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_exclusive() {
        let store = seeded_store(true).await;
        let mut claim = store.get_claim("C0001").await.unwrap().unwrap();
        // Expiry in the past (and "now" itself is past the instant by the
        // time the check runs), so this must fail as expired.
        claim.expires_at = Some(Utc::now());
        store.put_claim(&claim).await.unwrap();

        let verifier = verifier(store, Some(cipher()));
        assert!(matches!(
            verifier
                .verify(&sealed_payload("C0001", "2300001", TOKEN))
                .await,
            Err(AppError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_envelope_without_cipher_is_config_error() {
        let store = seeded_store(true).await;
        let verifier = verifier(store, None);
        assert!(matches!(
            verifier
                .verify(&sealed_payload("C0001", "2300001", TOKEN))
                .await,
            Err(AppError::CryptoConfig(_))
        ));
    }
}
