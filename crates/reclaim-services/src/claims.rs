//! Claim lifecycle service
//!
//! Claim creation (with reuse of existing non-terminal claims), identity
//! capture, verification-method selection, and student cancellation.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use validator::Validate;

use reclaim_core::config::EngineConfig;
use reclaim_core::error::AppError;
use reclaim_core::models::{Claim, ClaimStatus, VerificationMethod};
use reclaim_db::RecordStore;

use crate::cache::ClaimCache;
use crate::capture;
use crate::pipeline::{Layer, ValidationPipeline};
use crate::session::SessionGuard;

/// Actor recorded on system-stamped approvals and cancellations.
pub const SYSTEM_AUTO_APPROVAL: &str = "system_auto_approval";
pub const SYSTEM_AUTO_CANCELLATION: &str = "system_auto_cancellation";

#[derive(Debug, Clone, Validate)]
pub struct StartClaimRequest {
    pub student_id: String,
    pub found_item_id: String,
    #[validate(length(max = 300))]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StartClaimResult {
    pub claim_id: String,
    pub status: ClaimStatus,
    /// True when an existing non-terminal claim was reused instead of
    /// creating a duplicate.
    pub reused: bool,
    pub requires_admin_approval: bool,
    pub layers_passed: Vec<Layer>,
}

/// Result of an identity capture, returned to the client for diagnostics.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub embedding_dim: usize,
    pub metrics: capture::CaptureMetrics,
}

pub struct ClaimService {
    store: Arc<dyn RecordStore>,
    pipeline: ValidationPipeline,
    session: Arc<SessionGuard>,
    cache: Arc<ClaimCache>,
    config: EngineConfig,
}

impl ClaimService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        session: Arc<SessionGuard>,
        cache: Arc<ClaimCache>,
        config: EngineConfig,
    ) -> Self {
        let pipeline = ValidationPipeline::new(store.clone(), session.clone(), config.clone());
        Self {
            store,
            pipeline,
            session,
            cache,
            config,
        }
    }

    /// Read a claim, via the injected cache.
    pub async fn claim(&self, claim_id: &str) -> Result<Claim, AppError> {
        if let Some(claim) = self.cache.get(claim_id) {
            return Ok(claim);
        }
        let claim = self
            .store
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| AppError::ClaimNotFound(claim_id.to_string()))?;
        self.cache.put(&claim);
        Ok(claim)
    }

    /// Create (or reuse) a claim for a student and found item.
    ///
    /// The session lock acquired during validation only protects the
    /// creation race; it is released before returning on every path, so a
    /// user can start their next claim as soon as this one is decided.
    #[tracing::instrument(skip(self, request), fields(student_id = %request.student_id, item_id = %request.found_item_id))]
    pub async fn start_claim(
        &self,
        request: StartClaimRequest,
    ) -> Result<StartClaimResult, AppError> {
        request.validate()?;
        let remarks = request
            .remarks
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from);

        let outcome = self
            .pipeline
            .validate(&request.student_id, &request.found_item_id)
            .await?;
        let session_locked = outcome.session_locked;

        let result = self.create_or_reuse(&request, remarks, &outcome).await;

        if session_locked {
            self.session.release_lock(&request.student_id).await;
        }

        result
    }

    async fn create_or_reuse(
        &self,
        request: &StartClaimRequest,
        remarks: Option<String>,
        outcome: &crate::pipeline::ValidationOutcome,
    ) -> Result<StartClaimResult, AppError> {
        // Reuse an existing non-terminal claim instead of duplicating it.
        if let Some(existing) = self
            .latest_active_claim(&request.student_id, &request.found_item_id)
            .await?
        {
            tracing::info!(
                claim_id = %existing.claim_id,
                status = %existing.status,
                "reusing existing claim"
            );
            return Ok(StartClaimResult {
                claim_id: existing.claim_id,
                status: existing.status,
                reused: true,
                requires_admin_approval: outcome.requires_admin_approval,
                layers_passed: outcome.layers_passed.clone(),
            });
        }

        // Double-check availability close to the write; the session lock
        // already serializes attempts by the same user.
        let item = self
            .store
            .get_item(&request.found_item_id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound(request.found_item_id.clone()))?;
        if item.status != reclaim_core::models::ItemStatus::Unclaimed {
            return Err(AppError::ItemNotAvailable {
                item_id: item.found_item_id.clone(),
                status: item.status.to_string(),
            });
        }

        let claim_id = self.next_claim_id().await?;
        let mut claim = Claim::new(
            claim_id.clone(),
            request.found_item_id.clone(),
            request.student_id.clone(),
        );
        claim.student_remarks = remarks;

        // Non-valuable items are approved automatically at creation;
        // valuable items wait for an admin.
        if item.is_valuable {
            claim.status = ClaimStatus::Pending;
        } else {
            claim.status = ClaimStatus::Approved;
            claim.approved_by = Some(SYSTEM_AUTO_APPROVAL.to_string());
            claim.approved_at = Some(Utc::now());
        }

        self.store.put_claim(&claim).await?;
        self.cache.invalidate(&claim_id);

        tracing::info!(
            claim_id = %claim_id,
            status = %claim.status,
            valuable = item.is_valuable,
            "claim created"
        );

        Ok(StartClaimResult {
            claim_id,
            status: claim.status,
            reused: false,
            requires_admin_approval: outcome.requires_admin_approval,
            layers_passed: outcome.layers_passed.clone(),
        })
    }

    /// Latest non-terminal claim for a (student, item) pair, preferring
    /// pending-like claims over approved ones.
    async fn latest_active_claim(
        &self,
        student_id: &str,
        item_id: &str,
    ) -> Result<Option<Claim>, AppError> {
        let mut claims: Vec<Claim> = self
            .store
            .claims_for_pair(student_id, item_id)
            .await?
            .into_iter()
            .filter(|c| c.status.is_active())
            .collect();
        claims.sort_by(|a, b| {
            let a_pending = matches!(a.status, ClaimStatus::Pending | ClaimStatus::PendingApproval);
            let b_pending = matches!(b.status, ClaimStatus::Pending | ClaimStatus::PendingApproval);
            b_pending
                .cmp(&a_pending)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(claims.into_iter().next())
    }

    /// Allocate the next `C####` identifier. An unparseable latest id falls
    /// back to four random digits so allocations keep the wire shape.
    async fn next_claim_id(&self) -> Result<String, AppError> {
        match self.store.latest_claim_id().await? {
            None => Ok("C0001".to_string()),
            Some(last_id) => match last_id.trim_start_matches('C').parse::<u32>() {
                Ok(num) => Ok(format!("C{:04}", num + 1)),
                Err(_) => {
                    let num: u32 = rand::rng().random_range(0..10_000);
                    Ok(format!("C{:04}", num))
                }
            },
        }
    }

    /// Compute and store the face embedding for a claim from a captured
    /// image. Quality gates are strict for valuable items and lenient
    /// otherwise.
    #[tracing::instrument(skip(self, image_bytes))]
    pub async fn capture_identity(
        &self,
        claim_id: &str,
        image_bytes: &[u8],
    ) -> Result<CaptureResult, AppError> {
        let mut claim = self.claim(claim_id).await?;

        let strict = match self.store.get_item(&claim.found_item_id).await? {
            Some(item) => item.is_valuable,
            // Unknown item: fail safe with the strict thresholds.
            None => true,
        };

        let (embedding, metrics) = capture::compute_embedding(image_bytes)?;
        capture::validate_quality(&embedding, &metrics, strict)?;

        claim.face_embedding = Some(embedding.clone());
        claim.updated_at = Utc::now();
        self.store.put_claim(&claim).await?;
        self.cache.invalidate(claim_id);

        tracing::info!(claim_id, dim = embedding.len(), "face embedding stored");
        Ok(CaptureResult {
            embedding_dim: embedding.len(),
            metrics,
        })
    }

    /// Select how the kiosk will verify the claimant's identity.
    pub async fn select_method(
        &self,
        claim_id: &str,
        method: VerificationMethod,
    ) -> Result<(), AppError> {
        let mut claim = self.claim(claim_id).await?;
        claim.verification_method = Some(method);
        claim.updated_at = Utc::now();
        self.store.put_claim(&claim).await?;
        self.cache.invalidate(claim_id);
        Ok(())
    }

    /// Student-side cancellation; only the owning student, only from
    /// `pending`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_claim(&self, claim_id: &str, student_id: &str) -> Result<(), AppError> {
        let mut claim = self.claim(claim_id).await?;

        if claim.student_id != student_id {
            return Err(AppError::StudentMismatch);
        }
        if !matches!(
            claim.status,
            ClaimStatus::Pending | ClaimStatus::PendingApproval
        ) {
            return Err(AppError::Conflict(format!(
                "Cannot cancel claim in status \"{}\"",
                claim.status
            )));
        }

        claim.status = ClaimStatus::Cancelled;
        claim.cancelled_by = Some(student_id.to_string());
        claim.cancelled_at = Some(Utc::now());
        claim.updated_at = Utc::now();
        self.store.put_claim(&claim).await?;
        self.cache.invalidate(claim_id);

        tracing::info!(claim_id, student_id, "claim cancelled by student");
        Ok(())
    }

    /// Whether the pair currently has a live (unexpired) token registered.
    pub async fn active_token_status(
        &self,
        student_id: &str,
        item_id: &str,
    ) -> Result<Option<String>, AppError> {
        let now = Utc::now();
        let claims = self.store.claims_for_pair(student_id, item_id).await?;
        Ok(claims
            .into_iter()
            .find(|c| c.status.is_active() && c.has_live_token(now))
            .map(|c| c.claim_id))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclaim_core::config::MAX_REMARKS_LEN;
    use reclaim_core::models::{FoundItem, ItemStatus};
    use reclaim_db::MemoryStore;

    async fn service() -> (Arc<MemoryStore>, ClaimService) {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::default();
        let session = Arc::new(SessionGuard::new(&config));
        let cache = Arc::new(ClaimCache::new(
            config.claim_cache_capacity,
            config.claim_cache_ttl,
        ));
        let service = ClaimService::new(store.clone(), session, cache, config);
        (store, service)
    }

    fn request(student_id: &str, item_id: &str) -> StartClaimRequest {
        StartClaimRequest {
            student_id: student_id.into(),
            found_item_id: item_id.into(),
            remarks: None,
        }
    }

    #[tokio::test]
    async fn test_non_valuable_claim_is_auto_approved() {
        let (store, service) = service().await;
        store
            .put_item(&FoundItem::new(
                "FI0010".into(),
                "Umbrella".into(),
                "accessory".into(),
            ))
            .await
            .unwrap();

        let result = service.start_claim(request("2300001", "FI0010")).await.unwrap();
        assert_eq!(result.status, ClaimStatus::Approved);
        assert!(!result.reused);
        assert_eq!(result.claim_id, "C0001");

        let claim = store.get_claim("C0001").await.unwrap().unwrap();
        assert_eq!(claim.approved_by.as_deref(), Some(SYSTEM_AUTO_APPROVAL));
        assert!(claim.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_valuable_claim_starts_pending() {
        let (store, service) = service().await;
        let mut item = FoundItem::new("FI0020".into(), "Laptop".into(), "electronics".into());
        item.is_valuable = true;
        store.put_item(&item).await.unwrap();

        let result = service.start_claim(request("2300001", "FI0020")).await.unwrap();
        assert_eq!(result.status, ClaimStatus::Pending);
        assert!(result.requires_admin_approval);
    }

    #[tokio::test]
    async fn test_start_claim_is_idempotent_for_pending_claim() {
        let (store, service) = service().await;
        let mut item = FoundItem::new("FI0020".into(), "Laptop".into(), "electronics".into());
        item.is_valuable = true;
        store.put_item(&item).await.unwrap();

        let first = service.start_claim(request("2300001", "FI0020")).await.unwrap();
        // The duplicate-pending guard fires before reuse for pending claims,
        // so the second call reports the duplicate rather than a new claim.
        let second = service.start_claim(request("2300001", "FI0020")).await;
        assert!(matches!(second, Err(AppError::DuplicatePendingClaim(_))));
        assert_eq!(store.claim_count().await, 1);
        assert_eq!(first.claim_id, "C0001");
    }

    #[tokio::test]
    async fn test_start_claim_reuses_auto_approved_claim() {
        let (store, service) = service().await;
        store
            .put_item(&FoundItem::new(
                "FI0010".into(),
                "Umbrella".into(),
                "accessory".into(),
            ))
            .await
            .unwrap();

        let first = service.start_claim(request("2300001", "FI0010")).await.unwrap();
        let second = service.start_claim(request("2300001", "FI0010")).await.unwrap();
        assert_eq!(first.claim_id, second.claim_id);
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(store.claim_count().await, 1);
    }

    #[tokio::test]
    async fn test_claim_ids_increment() {
        let (store, service) = service().await;
        for id in ["FI0001", "FI0002"] {
            store
                .put_item(&FoundItem::new(id.into(), "Item".into(), "misc".into()))
                .await
                .unwrap();
        }

        let first = service.start_claim(request("2300001", "FI0001")).await.unwrap();
        // Non-valuable claims auto-approve, so a second claim on another
        // item is not blocked by the global pending cap.
        let second = service.start_claim(request("2300002", "FI0002")).await.unwrap();
        assert_eq!(first.claim_id, "C0001");
        assert_eq!(second.claim_id, "C0002");
    }

    #[tokio::test]
    async fn test_remarks_length_is_validated() {
        let (_store, service) = service().await;
        let mut req = request("2300001", "FI0001");
        req.remarks = Some("x".repeat(MAX_REMARKS_LEN + 1));
        assert!(matches!(
            service.start_claim(req).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_only_pending_claims() {
        let (store, service) = service().await;
        let mut item = FoundItem::new("FI0020".into(), "Laptop".into(), "electronics".into());
        item.is_valuable = true;
        store.put_item(&item).await.unwrap();

        let result = service.start_claim(request("2300001", "FI0020")).await.unwrap();

        // Wrong student cannot cancel.
        assert!(matches!(
            service.cancel_claim(&result.claim_id, "2300002").await,
            Err(AppError::StudentMismatch)
        ));

        service.cancel_claim(&result.claim_id, "2300001").await.unwrap();
        let claim = store.get_claim(&result.claim_id).await.unwrap().unwrap();
        assert_eq!(claim.status, ClaimStatus::Cancelled);

        // Terminal claims cannot be cancelled again.
        assert!(matches!(
            service.cancel_claim(&result.claim_id, "2300001").await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_select_method() {
        let (store, service) = service().await;
        store
            .put_item(&FoundItem::new(
                "FI0001".into(),
                "Wallet".into(),
                "accessory".into(),
            ))
            .await
            .unwrap();
        let result = service.start_claim(request("2300001", "FI0001")).await.unwrap();

        service
            .select_method(&result.claim_id, VerificationMethod::QrFace)
            .await
            .unwrap();
        let claim = store.get_claim(&result.claim_id).await.unwrap().unwrap();
        assert_eq!(claim.verification_method, Some(VerificationMethod::QrFace));
    }

    #[tokio::test]
    async fn test_double_check_item_availability_before_create() {
        let (store, service) = service().await;
        let mut item = FoundItem::new("FI0001".into(), "Wallet".into(), "accessory".into());
        store.put_item(&item).await.unwrap();

        // Simulate the item being taken between validation and creation by
        // flipping its status while no claim exists.
        item.status = ItemStatus::Overdue;
        store.put_item(&item).await.unwrap();

        assert!(matches!(
            service.start_claim(request("2300001", "FI0001")).await,
            Err(AppError::ItemNotAvailable { .. })
        ));
    }
}
