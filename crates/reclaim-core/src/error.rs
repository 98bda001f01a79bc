//! Error types module
//!
//! This module provides the core error types used throughout the Reclaim
//! engine. All errors are unified under the `AppError` enum, which covers the
//! validation pipeline layers, token issuance/verification, identity capture,
//! crypto configuration, and store failures.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx`
//! feature so the domain crate can be built without a database driver.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like rate limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
/// This trait allows errors to self-describe their HTTP response
/// characteristics without the engine depending on any web framework.
pub trait ErrorMetadata {
    /// HTTP status code hint for the transport layer
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "RATE_LIMIT_EXCEEDED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    // Layer 1: item availability
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item already claimed: {0}")]
    ItemAlreadyClaimed(String),

    #[error("Item approved for another user: {0}")]
    ItemApprovedByOtherUser(String),

    #[error("Item {item_id} is not available for claiming (status: {status})")]
    ItemNotAvailable { item_id: String, status: String },

    // Layer 2: user eligibility
    #[error("Too many claim attempts")]
    RateLimitExceeded,

    #[error("Duplicate pending claim for item {0}")]
    DuplicatePendingClaim(String),

    #[error("Active QR code exists for item {0}")]
    ActiveQrExists(String),

    #[error("Maximum concurrent claims exceeded")]
    MaxConcurrentClaimsExceeded,

    #[error("Another claim process is already in progress for this account")]
    ClaimSessionLocked,

    // Layer 3: valuable-item approval
    #[error("Approving admin account no longer exists: {0}")]
    InvalidApprovingAdmin(String),

    #[error("Approving user {admin_id} lacks admin privileges (role: {role})")]
    InsufficientAdminPrivileges { admin_id: String, role: String },

    #[error("Approving admin {admin_id} is no longer active (status: {status})")]
    InactiveApprovingAdmin { admin_id: String, status: String },

    #[error("Admin approval has expired (valid for {valid_hours} hours)")]
    ApprovalExpired { valid_hours: i64 },

    #[error("Auto-approval is currently disabled for non-valuable items")]
    AutoApprovalDisabled,

    // Token issuance
    #[error("Face data not captured yet")]
    FaceNotCaptured,

    #[error("Verification method not selected yet")]
    MethodNotSelected,

    #[error("Admin approval required before issuing a token for a valuable item")]
    AdminApprovalRequired,

    #[error("Another active QR is already registered for this item and account")]
    QrAlreadyRegisteredForUser,

    // Token verification
    #[error("Invalid token payload: {0}")]
    InvalidTokenPayload(String),

    #[error("Scanned token does not belong to this student")]
    StudentMismatch,

    #[error("Invalid or mismatched token")]
    TokenMismatch,

    #[error("Claim is not approved (status: {status})")]
    ClaimNotApproved { status: String },

    #[error("User account is not active (status: {status})")]
    AccountInactive { status: String },

    #[error("Token has expired")]
    TokenExpired,

    #[error("Claim not found: {0}")]
    ClaimNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    // Identity capture quality
    #[error("Capture quality too low (dim: {dim}, nonzero: {nonzero}, norm: {norm})")]
    CaptureQualityTooLow {
        dim: usize,
        nonzero: usize,
        norm: f32,
    },

    #[error("Face too small in frame (area ratio: {area_ratio})")]
    FaceTooSmall { area_ratio: f32 },

    // Crypto envelope
    #[error("Crypto configuration error: {0}")]
    CryptoConfig(String),

    #[error("Token envelope could not be decrypted")]
    TokenDecryptFailed,

    // Identity matcher
    #[error("Embedding mismatch: {0}")]
    EmbeddingMismatch(String),

    // Generic
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Error conversion implementations
#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable,
/// suggested_action, sensitive, log_level). Reduces duplication in the
/// ErrorMetadata impl; client_message stays per-variant for dynamic content.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::ItemNotFound(_) => (
            404,
            "ITEM_NOT_FOUND",
            false,
            Some("Verify the item ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::ItemAlreadyClaimed(_) => (
            409,
            "ITEM_ALREADY_CLAIMED",
            false,
            None,
            false,
            LogLevel::Debug,
        ),
        AppError::ItemApprovedByOtherUser(_) => (
            409,
            "ITEM_APPROVED_BY_OTHER_USER",
            false,
            None,
            false,
            LogLevel::Debug,
        ),
        AppError::ItemNotAvailable { .. } => (
            409,
            "ITEM_NOT_AVAILABLE",
            false,
            None,
            false,
            LogLevel::Debug,
        ),
        AppError::RateLimitExceeded => (
            429,
            "RATE_LIMIT_EXCEEDED",
            true,
            Some("Wait before trying again"),
            false,
            LogLevel::Warn,
        ),
        AppError::DuplicatePendingClaim(_) => (
            409,
            "DUPLICATE_PENDING_CLAIM",
            false,
            Some("Complete or cancel the existing claim"),
            false,
            LogLevel::Debug,
        ),
        AppError::ActiveQrExists(_) => (
            409,
            "ACTIVE_QR_EXISTS",
            true,
            Some("Use the active QR code or wait for it to expire"),
            false,
            LogLevel::Debug,
        ),
        AppError::MaxConcurrentClaimsExceeded => (
            409,
            "MAX_CONCURRENT_CLAIMS_EXCEEDED",
            false,
            Some("Complete or cancel your existing claim first"),
            false,
            LogLevel::Debug,
        ),
        AppError::ClaimSessionLocked => (
            409,
            "CLAIM_SESSION_LOCKED",
            true,
            Some("Wait for the in-progress claim attempt to finish"),
            false,
            LogLevel::Warn,
        ),
        AppError::InvalidApprovingAdmin(_) => (
            400,
            "INVALID_APPROVING_ADMIN",
            false,
            Some("Request re-approval from an active admin"),
            false,
            LogLevel::Warn,
        ),
        AppError::InsufficientAdminPrivileges { .. } => (
            400,
            "INSUFFICIENT_ADMIN_PRIVILEGES",
            false,
            Some("Request re-approval from an active admin"),
            false,
            LogLevel::Warn,
        ),
        AppError::InactiveApprovingAdmin { .. } => (
            400,
            "INACTIVE_APPROVING_ADMIN",
            false,
            Some("Request re-approval from an active admin"),
            false,
            LogLevel::Warn,
        ),
        AppError::ApprovalExpired { .. } => (
            400,
            "APPROVAL_EXPIRED",
            true,
            Some("Request re-approval"),
            false,
            LogLevel::Debug,
        ),
        AppError::AutoApprovalDisabled => (
            503,
            "AUTO_APPROVAL_DISABLED",
            true,
            Some("Try again later"),
            false,
            LogLevel::Warn,
        ),
        AppError::FaceNotCaptured => (
            409,
            "FACE_NOT_CAPTURED",
            true,
            Some("Capture identity before issuing a token"),
            false,
            LogLevel::Debug,
        ),
        AppError::MethodNotSelected => (
            409,
            "METHOD_NOT_SELECTED",
            true,
            Some("Select a verification method first"),
            false,
            LogLevel::Debug,
        ),
        AppError::AdminApprovalRequired => (
            403,
            "ADMIN_APPROVAL_REQUIRED",
            true,
            Some("Wait for admin approval"),
            false,
            LogLevel::Debug,
        ),
        AppError::QrAlreadyRegisteredForUser => (
            409,
            "QR_ALREADY_REGISTERED_FOR_USER",
            true,
            Some("Use the active QR code or wait for it to expire"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidTokenPayload(_) => (
            400,
            "INVALID_TOKEN_PAYLOAD",
            false,
            Some("Rescan the QR code"),
            false,
            LogLevel::Warn,
        ),
        AppError::StudentMismatch => (
            403,
            "STUDENT_MISMATCH",
            false,
            None,
            false,
            LogLevel::Warn,
        ),
        AppError::TokenMismatch => (
            403,
            "TOKEN_MISMATCH",
            false,
            Some("Re-issue the token and rescan"),
            false,
            LogLevel::Warn,
        ),
        AppError::ClaimNotApproved { .. } => (
            409,
            "CLAIM_NOT_APPROVED",
            false,
            None,
            false,
            LogLevel::Debug,
        ),
        AppError::AccountInactive { .. } => (
            403,
            "ACCOUNT_INACTIVE",
            false,
            Some("Contact an administrator"),
            false,
            LogLevel::Warn,
        ),
        AppError::TokenExpired => (
            410,
            "TOKEN_EXPIRED",
            true,
            Some("Re-issue the token"),
            false,
            LogLevel::Debug,
        ),
        AppError::ClaimNotFound(_) => (
            404,
            "CLAIM_NOT_FOUND",
            false,
            Some("Verify the claim ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::UserNotFound(_) => (
            404,
            "USER_NOT_FOUND",
            false,
            Some("Verify the user ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::CaptureQualityTooLow { .. } => (
            422,
            "CAPTURE_QUALITY_TOO_LOW",
            true,
            Some("Retake the capture"),
            false,
            LogLevel::Debug,
        ),
        AppError::FaceTooSmall { .. } => (
            422,
            "FACE_TOO_SMALL",
            true,
            Some("Move closer and retry"),
            false,
            LogLevel::Debug,
        ),
        AppError::CryptoConfig(_) => (
            500,
            "CRYPTO_CONFIG_ERROR",
            false,
            Some("Check the token key configuration"),
            true,
            LogLevel::Error,
        ),
        AppError::TokenDecryptFailed => (
            400,
            "TOKEN_DECRYPT_FAILED",
            false,
            Some("Rescan the QR code"),
            false,
            LogLevel::Warn,
        ),
        AppError::EmbeddingMismatch(_) => (
            400,
            "EMBEDDING_MISMATCH",
            false,
            None,
            false,
            LogLevel::Warn,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::Conflict(_) => (409, "CONFLICT", false, None, false, LogLevel::Debug),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access the record store".to_string(),
            AppError::ItemNotFound(_) => "Item not found in the system".to_string(),
            AppError::ItemAlreadyClaimed(_) => {
                "This item has already been claimed by another user".to_string()
            }
            AppError::ItemApprovedByOtherUser(_) => {
                "This item has been approved for claiming by another user".to_string()
            }
            AppError::ItemNotAvailable { status, .. } => {
                format!("Item is not available for claiming (status: {})", status)
            }
            AppError::RateLimitExceeded => {
                "Too many claim attempts. Please wait before trying again".to_string()
            }
            AppError::DuplicatePendingClaim(_) => {
                "You already have a pending claim for this item".to_string()
            }
            AppError::ActiveQrExists(_) => {
                "You have an active QR code for this item. Please use it or wait for expiration"
                    .to_string()
            }
            AppError::MaxConcurrentClaimsExceeded => {
                "You can only have one pending claim at a time".to_string()
            }
            AppError::ClaimSessionLocked => {
                "Another claim process is already in progress for your account".to_string()
            }
            AppError::InvalidApprovingAdmin(_) => {
                "Approving admin account no longer exists".to_string()
            }
            AppError::InsufficientAdminPrivileges { .. } => {
                "Item was approved by a user without admin privileges".to_string()
            }
            AppError::InactiveApprovingAdmin { .. } => {
                "Approving admin account is no longer active".to_string()
            }
            AppError::ApprovalExpired { valid_hours } => format!(
                "Admin approval has expired (valid for {} hours). Please request re-approval",
                valid_hours
            ),
            AppError::AutoApprovalDisabled => {
                "Auto-approval is currently disabled for non-valuable items".to_string()
            }
            AppError::FaceNotCaptured => "Face data not captured yet".to_string(),
            AppError::MethodNotSelected => "Verification method not selected yet".to_string(),
            AppError::AdminApprovalRequired => {
                "Admin approval required before generating a QR for this item".to_string()
            }
            AppError::QrAlreadyRegisteredForUser => {
                "Another active QR is already registered for this item for your account"
                    .to_string()
            }
            AppError::InvalidTokenPayload(ref msg) => msg.clone(),
            AppError::StudentMismatch => "Student mismatch".to_string(),
            AppError::TokenMismatch => "Invalid or mismatched token".to_string(),
            AppError::ClaimNotApproved { status } => {
                format!("Claim is not approved (status: {})", status)
            }
            AppError::AccountInactive { status } => {
                format!("User account is not active (status: {})", status)
            }
            AppError::TokenExpired => "QR code expired".to_string(),
            AppError::ClaimNotFound(_) => "Claim not found".to_string(),
            AppError::UserNotFound(_) => "Student account does not exist".to_string(),
            AppError::CaptureQualityTooLow { .. } => {
                "Face capture quality too low; please retake".to_string()
            }
            AppError::FaceTooSmall { .. } => {
                "Face too small in frame; move closer and retry".to_string()
            }
            AppError::CryptoConfig(_) => "Token encryption is misconfigured".to_string(),
            AppError::TokenDecryptFailed => "Invalid encryption or tampered data".to_string(),
            AppError::EmbeddingMismatch(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Conflict(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}
