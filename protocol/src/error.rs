//! Cross-component error taxonomy.
//!
//! Each component owns a `thiserror` enum with the detail it needs. What
//! callers usually want to know is coarser: was my input bad, is the thing
//! missing, did I lose a race, did something fail an integrity check? Every
//! component error answers that through a `kind()` method returning
//! [`ErrorKind`], and the transaction layer turns the pair into a stable
//! numeric code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse error classification shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state change.
    Validation,
    /// Backup, request, guardian, or identity missing.
    NotFound,
    /// Lost a race: duplicate vote, concurrent recovery, version clash.
    Conflict,
    /// Backup, request, or bundle past its validity window.
    Expired,
    /// Hash or signature mismatch. Never retried automatically.
    Integrity,
    /// Attempt budget used up.
    Exhausted,
    /// Caller is not allowed to perform the operation.
    Unauthorized,
    /// Serialization or other plumbing failure.
    Internal,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::Internal)
    }

    /// Whether the failure left state untouched.
    ///
    /// Integrity failures during recovery execution flag the backup as
    /// corrupted; every other kind is rejected before mutation.
    pub fn is_side_effect_free(&self) -> bool {
        !matches!(self, ErrorKind::Integrity)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Expired => "expired",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_and_plumbing_retry() {
        assert!(ErrorKind::Conflict.is_retryable());
        assert!(ErrorKind::Internal.is_retryable());
        assert!(!ErrorKind::Integrity.is_retryable());
        assert!(!ErrorKind::Exhausted.is_retryable());
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
