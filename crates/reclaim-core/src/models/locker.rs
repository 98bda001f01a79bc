use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Locker status. `Open` is reachable only from `Occupied` and always
/// carries an auto-close deadline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LockerStatus {
    Available,
    Occupied,
    Open,
}

impl Display for LockerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LockerStatus::Available => write!(f, "available"),
            LockerStatus::Occupied => write!(f, "occupied"),
            LockerStatus::Open => write!(f, "open"),
        }
    }
}

impl FromStr for LockerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(LockerStatus::Available),
            "occupied" => Ok(LockerStatus::Occupied),
            "open" => Ok(LockerStatus::Open),
            _ => Err(anyhow::anyhow!("Invalid locker status: {}", s)),
        }
    }
}

/// A kiosk-controlled storage locker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Locker {
    /// Business identifier, e.g. `L01`.
    pub locker_id: String,
    pub status: LockerStatus,
    pub found_item_id: Option<String>,
    pub location: Option<String>,
    pub open_started_at: Option<DateTime<Utc>>,
    pub opened_by: Option<String>,
    /// Deadline after which the auto-close job reverts the locker to
    /// `occupied`. Present whenever the status is `open`.
    pub auto_close_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Locker {
    pub fn new(locker_id: String) -> Self {
        Self {
            locker_id,
            status: LockerStatus::Available,
            found_item_id: None,
            location: None,
            open_started_at: None,
            opened_by: None,
            auto_close_at: None,
            closed_at: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Locker {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Locker {
            locker_id: row.get("locker_id"),
            status: super::parse_status_column(row, "status")?,
            found_item_id: row.get("found_item_id"),
            location: row.get("location"),
            open_started_at: row.get("open_started_at"),
            opened_by: row.get("opened_by"),
            auto_close_at: row.get("auto_close_at"),
            closed_at: row.get("closed_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
