use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Found item status.
///
/// `Approved` is the transient status an item carries once an admin has
/// approved a claim on it and before the kiosk finalizes the handover.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Unclaimed,
    Claimed,
    Approved,
    Overdue,
    Donated,
    Discarded,
    Returned,
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ItemStatus::Unclaimed => write!(f, "unclaimed"),
            ItemStatus::Claimed => write!(f, "claimed"),
            ItemStatus::Approved => write!(f, "approved"),
            ItemStatus::Overdue => write!(f, "overdue"),
            ItemStatus::Donated => write!(f, "donated"),
            ItemStatus::Discarded => write!(f, "discarded"),
            ItemStatus::Returned => write!(f, "returned"),
        }
    }
}

impl FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unclaimed" => Ok(ItemStatus::Unclaimed),
            "claimed" => Ok(ItemStatus::Claimed),
            "approved" => Ok(ItemStatus::Approved),
            "overdue" => Ok(ItemStatus::Overdue),
            "donated" => Ok(ItemStatus::Donated),
            "discarded" => Ok(ItemStatus::Discarded),
            "returned" => Ok(ItemStatus::Returned),
            _ => Err(anyhow::anyhow!("Invalid item status: {}", s)),
        }
    }
}

/// A physically stored found item, owned by the admin intake workflow. The
/// engine reads it during validation and mutates it only on claim completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundItem {
    /// Business identifier, e.g. `FI0010`.
    pub found_item_id: String,
    pub found_item_name: String,
    pub category: String,
    /// Valuable items require explicit admin approval before claiming.
    pub is_valuable: bool,
    pub status: ItemStatus,
    /// Storage locker holding the item, when one is assigned.
    pub locker_id: Option<String>,
    /// RFID tag attached to the item, used by the `qr_rfid` method.
    pub rfid_tag: Option<String>,
    pub image_url: Option<String>,
    /// Approval stamp recorded on the item for valuable-item claims.
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FoundItem {
    pub fn new(found_item_id: String, found_item_name: String, category: String) -> Self {
        let now = Utc::now();
        Self {
            found_item_id,
            found_item_name,
            category,
            is_valuable: false,
            status: ItemStatus::Unclaimed,
            locker_id: None,
            rfid_tag: None,
            image_url: None,
            approved_by: None,
            approved_at: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for FoundItem {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(FoundItem {
            found_item_id: row.get("found_item_id"),
            found_item_name: row.get("found_item_name"),
            category: row.get("category"),
            is_valuable: row.get("is_valuable"),
            status: super::parse_status_column(row, "status")?,
            locker_id: row.get("locker_id"),
            rfid_tag: row.get("rfid_tag"),
            image_url: row.get("image_url"),
            approved_by: row.get("approved_by"),
            approved_at: row.get("approved_at"),
            claimed_by: row.get("claimed_by"),
            claimed_at: row.get("claimed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
