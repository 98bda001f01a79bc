//! Wire-format validation
//!
//! Shape checks for the QR payload fields. These run on every scanned
//! payload before any store lookup, so malformed scans are rejected without
//! touching the record store.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::AppError;
use crate::models::TokenPayload;

static CLAIM_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^C\d{4}$").unwrap());
static STUDENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{7}$").unwrap());
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{8,32}$").unwrap());

/// Whether `id` is a well-formed claim identifier (`C####`).
pub fn is_valid_claim_id(id: &str) -> bool {
    CLAIM_ID_RE.is_match(id)
}

/// Whether `id` is a well-formed seven-digit student identifier.
pub fn is_valid_student_id(id: &str) -> bool {
    STUDENT_ID_RE.is_match(id)
}

/// Whether `token` is a well-formed QR token (8-32 alphanumeric characters).
pub fn is_valid_token(token: &str) -> bool {
    TOKEN_RE.is_match(token)
}

impl TokenPayload {
    /// Validate the payload shape; every field must match its wire format.
    pub fn validate_shape(&self) -> Result<(), AppError> {
        if !is_valid_claim_id(&self.claim_id) {
            return Err(AppError::InvalidTokenPayload(
                "Invalid claim_id format".into(),
            ));
        }
        if !is_valid_student_id(&self.student_id) {
            return Err(AppError::InvalidTokenPayload(
                "Invalid student_id format".into(),
            ));
        }
        if !is_valid_token(&self.token) {
            return Err(AppError::InvalidTokenPayload("Invalid token format".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_id_format() {
        assert!(is_valid_claim_id("C0001"));
        assert!(is_valid_claim_id("C9999"));
        assert!(!is_valid_claim_id("C001"));
        assert!(!is_valid_claim_id("C00001"));
        assert!(!is_valid_claim_id("X0001"));
        assert!(!is_valid_claim_id("c0001"));
    }

    #[test]
    fn test_student_id_format() {
        assert!(is_valid_student_id("2300001"));
        assert!(!is_valid_student_id("230001"));
        assert!(!is_valid_student_id("23000012"));
        assert!(!is_valid_student_id("230000a"));
    }

    #[test]
    fn test_token_format() {
        assert!(is_valid_token("abcd1234"));
        assert!(is_valid_token("A".repeat(32).as_str()));
        assert!(!is_valid_token("short1"));
        assert!(!is_valid_token("A".repeat(33).as_str()));
        assert!(!is_valid_token("has-dashes-in-it"));
    }

    #[test]
    fn test_payload_shape() {
        let payload = TokenPayload {
            claim_id: "C0001".into(),
            student_id: "2300001".into(),
            token: "abcDEF123ghiJKL456mnoPQR".into(),
        };
        assert!(payload.validate_shape().is_ok());

        let bad = TokenPayload {
            claim_id: "nope".into(),
            ..payload.clone()
        };
        assert!(matches!(
            bad.validate_shape(),
            Err(AppError::InvalidTokenPayload(_))
        ));
    }
}
