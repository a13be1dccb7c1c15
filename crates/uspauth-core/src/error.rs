use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::state::SessionState;

/// Maximum length for remote error descriptions kept in error messages
const MAX_ERROR_DETAIL_LENGTH: usize = 500;

/// Errors surfaced by the session lifecycle engine.
///
/// `Clone` so a single refresh outcome can be handed to every coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Transient failure: {0}")]
    TransientFailure(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Operation not allowed while session is {state}")]
    ConcurrentOperation { state: SessionState },

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Clock moved backward from {previous} to {now}")]
    ClockRegression {
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    },
}

impl AuthError {
    /// Build a transient failure, truncating long remote detail
    pub fn transient(detail: impl AsRef<str>) -> Self {
        AuthError::TransientFailure(truncate_detail(detail.as_ref()))
    }

    /// Build an invalid-grant failure, truncating long remote detail
    pub fn invalid_grant(detail: impl AsRef<str>) -> Self {
        AuthError::InvalidGrant(truncate_detail(detail.as_ref()))
    }

    /// Terminal errors cannot be recovered without full re-authentication.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthError::InvalidGrant(_))
    }

    /// Errors that may succeed if the same operation is attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::TransientFailure(_) | AuthError::Store(_))
    }
}

/// Persistence failures reported by a `CredentialStore`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt credential record for session {0}")]
    Corrupt(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

fn truncate_detail(detail: &str) -> String {
    if detail.len() <= MAX_ERROR_DETAIL_LENGTH {
        return detail.to_string();
    }
    let mut end = MAX_ERROR_DETAIL_LENGTH;
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &detail[..end], detail.len())
}
