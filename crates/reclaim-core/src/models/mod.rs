//! Domain models
//!
//! Record structs for the entities handled by the engine, with closed status
//! enums. Status values are parsed (never trusted) when records are read back
//! from the store.

pub mod claim;
pub mod found_item;
pub mod locker;
pub mod user;

pub use claim::{Claim, ClaimStatus, TokenPayload, VerificationMethod};
pub use found_item::{FoundItem, ItemStatus};
pub use locker::{Locker, LockerStatus};
pub use user::{UserAccount, UserRole, UserStatus};

/// Parse a textual status column into its closed enum, surfacing unknown
/// values as decode errors at the store boundary.
#[cfg(feature = "sqlx")]
pub(crate) fn parse_status_column<T: std::str::FromStr>(
    row: &sqlx::postgres::PgRow,
    column: &str,
) -> Result<T, sqlx::Error>
where
    T::Err: std::fmt::Display,
{
    use sqlx::Row;
    row.get::<String, _>(column).parse().map_err(|e: T::Err| {
        sqlx::Error::Decode(format!("Failed to parse {}: {}", column, e).into())
    })
}
