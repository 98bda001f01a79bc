use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Claim lifecycle status.
///
/// `Pending` and `PendingApproval` both mean "awaiting admin action";
/// `PendingApproval` is kept as an accepted alias for records written by
/// older deployments. `Rejected`, `Cancelled`, `Expired`, and `Completed`
/// are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    PendingApproval,
    Approved,
    Rejected,
    Cancelled,
    Expired,
    Completed,
}

impl ClaimStatus {
    /// Whether the claim can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Rejected
                | ClaimStatus::Cancelled
                | ClaimStatus::Expired
                | ClaimStatus::Completed
        )
    }

    /// Whether the claim blocks a new claim on the same (student, item) pair.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Pending | ClaimStatus::PendingApproval | ClaimStatus::Approved
        )
    }

    /// Whether `self -> next` is a legal state-machine transition.
    pub fn can_transition_to(&self, next: ClaimStatus) -> bool {
        match (self, next) {
            (ClaimStatus::Pending | ClaimStatus::PendingApproval, ClaimStatus::Approved) => true,
            (ClaimStatus::Pending | ClaimStatus::PendingApproval, ClaimStatus::Rejected) => true,
            (ClaimStatus::Pending | ClaimStatus::PendingApproval, ClaimStatus::Cancelled) => true,
            (ClaimStatus::Approved, ClaimStatus::Expired) => true,
            (ClaimStatus::Approved, ClaimStatus::Completed) => true,
            _ => false,
        }
    }
}

impl Display for ClaimStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ClaimStatus::Pending => write!(f, "pending"),
            ClaimStatus::PendingApproval => write!(f, "pending_approval"),
            ClaimStatus::Approved => write!(f, "approved"),
            ClaimStatus::Rejected => write!(f, "rejected"),
            ClaimStatus::Cancelled => write!(f, "cancelled"),
            ClaimStatus::Expired => write!(f, "expired"),
            ClaimStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for ClaimStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "pending_approval" => Ok(ClaimStatus::PendingApproval),
            "approved" => Ok(ClaimStatus::Approved),
            "rejected" => Ok(ClaimStatus::Rejected),
            "cancelled" => Ok(ClaimStatus::Cancelled),
            "expired" => Ok(ClaimStatus::Expired),
            "completed" => Ok(ClaimStatus::Completed),
            _ => Err(anyhow::anyhow!("Invalid claim status: {}", s)),
        }
    }
}

/// How the kiosk verifies the claimant's identity after the QR scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    QrFace,
    QrRfid,
}

impl Display for VerificationMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VerificationMethod::QrFace => write!(f, "qr_face"),
            VerificationMethod::QrRfid => write!(f, "qr_rfid"),
        }
    }
}

impl FromStr for VerificationMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qr_face" => Ok(VerificationMethod::QrFace),
            "qr_rfid" => Ok(VerificationMethod::QrRfid),
            _ => Err(anyhow::anyhow!("Invalid verification method: {}", s)),
        }
    }
}

/// One student's attempt to retrieve one found item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// Business identifier matching `C\d{4}`.
    pub claim_id: String,
    pub found_item_id: String,
    /// Seven-digit student identifier.
    pub student_id: String,
    pub face_embedding: Option<Vec<f32>>,
    pub verification_method: Option<VerificationMethod>,
    pub status: ClaimStatus,
    /// Opaque QR token; set once at issuance, unique per live claim.
    pub qr_token: Option<String>,
    pub qr_image_ref: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub student_remarks: Option<String>,
    pub admin_remarks: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    /// New claim record with every optional field unset.
    pub fn new(claim_id: String, found_item_id: String, student_id: String) -> Self {
        let now = Utc::now();
        Self {
            claim_id,
            found_item_id,
            student_id,
            face_embedding: None,
            verification_method: None,
            status: ClaimStatus::Pending,
            qr_token: None,
            qr_image_ref: None,
            expires_at: None,
            student_remarks: None,
            admin_remarks: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this claim carries a token whose expiry is still ahead of `now`.
    pub fn has_live_token(&self, now: DateTime<Utc>) -> bool {
        match (&self.qr_token, self.expires_at) {
            (Some(token), Some(expires_at)) => !token.is_empty() && now < expires_at,
            _ => false,
        }
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Claim {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Claim {
            claim_id: row.get("claim_id"),
            found_item_id: row.get("found_item_id"),
            student_id: row.get("student_id"),
            face_embedding: row.get::<Option<Vec<f32>>, _>("face_embedding"),
            verification_method: row
                .get::<Option<String>, _>("verification_method")
                .map(|m| {
                    m.parse().map_err(|e| {
                        sqlx::Error::Decode(
                            format!("Failed to parse verification_method: {}", e).into(),
                        )
                    })
                })
                .transpose()?,
            status: super::parse_status_column(row, "status")?,
            qr_token: row.get("qr_token"),
            qr_image_ref: row.get("qr_image_ref"),
            expires_at: row.get("expires_at"),
            student_remarks: row.get("student_remarks"),
            admin_remarks: row.get("admin_remarks"),
            approved_by: row.get("approved_by"),
            approved_at: row.get("approved_at"),
            rejected_by: row.get("rejected_by"),
            rejected_at: row.get("rejected_at"),
            cancelled_by: row.get("cancelled_by"),
            cancelled_at: row.get("cancelled_at"),
            cancellation_reason: row.get("cancellation_reason"),
            verified_at: row.get("verified_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// The minimal payload embedded in the QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub claim_id: String,
    pub student_id: String,
    pub token: String,
}
