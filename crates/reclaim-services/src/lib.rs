//! Reclaim engine services
//!
//! The claim lifecycle & verification engine: validation pipeline, session
//! guard, claim service, identity capture, token issuance/verification,
//! kiosk finalization, admin approval, and the background expiry sweeper.
//!
//! Services share an `Arc<dyn RecordStore>` and an `EngineConfig`; nothing
//! here depends on a web framework or a concrete database.

pub mod admin;
pub mod cache;
pub mod capture;
pub mod claims;
pub mod kiosk;
pub mod pipeline;
pub mod session;
pub mod sweeper;
pub mod token;
pub mod verify;

pub use admin::ApprovalService;
pub use cache::ClaimCache;
pub use claims::{ClaimService, StartClaimRequest, StartClaimResult};
pub use kiosk::{FinalizeResult, LockerFinalizer};
pub use pipeline::{ApprovalState, Layer, ValidationOutcome, ValidationPipeline};
pub use session::SessionGuard;
pub use sweeper::ExpirySweeper;
pub use token::{IssuedToken, MemoryQrSink, QrImageSink, TokenIssuer};
pub use verify::{TokenVerifier, VerifiedToken};
