//! Error types for signing ceremonies

use crate::PartyIndex;
use thiserror::Error;

/// Result type alias for ceremony operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing or running a signing ceremony
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed participating set, duplicate indexes, wrong party count.
    /// Detected before any network I/O and never worth retrying.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Key or share retrieval failed
    #[error("Key custody error: {0}")]
    Custody(String),

    /// Identity attestation / share retrieval signatures unavailable
    #[error("Attestation error: {0}")]
    Attestation(String),

    /// A required endpoint could not be reached or dropped mid-session
    #[error("Connection error: {0}")]
    Connection(String),

    /// Public key, coefficient or signature mismatch. Points at a derivation
    /// bug upstream (wrong index, tag or coefficients), not a transient fault.
    #[error("Consistency check failed: {0}")]
    Consistency(String),

    /// Best-effort cleanup notification failed
    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    /// A remote party rejected a request or answered out of turn
    #[error("Protocol error from party {party}: {reason}")]
    Protocol { party: PartyIndex, reason: String },

    /// Signing engine could not be loaded or failed internally
    #[error("Signing engine error: {0}")]
    Engine(String),

    /// Bounded wait expired
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Ceremony aborted by the operator
    #[error("Signing ceremony aborted")]
    Aborted,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Whether starting over with a brand-new session may succeed.
    ///
    /// Nothing is ever resumed in place: a retry always means a new session
    /// nonce and a new connection set.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Timeout(_) | Error::Aborted | Error::Protocol { .. }
        )
    }

    /// Re-tag a collaborator failure as a custody error
    pub(crate) fn into_custody(self) -> Self {
        match self {
            Error::Custody(_) => self,
            other => Error::Custody(other.to_string()),
        }
    }

    /// Re-tag a collaborator failure as an attestation error
    pub(crate) fn into_attestation(self) -> Self {
        match self {
            Error::Attestation(_) => self,
            other => Error::Attestation(other.to_string()),
        }
    }

    /// Re-tag a transport failure as a connection error
    pub(crate) fn into_connection(self) -> Self {
        match self {
            Error::Connection(_) | Error::Timeout(_) | Error::Aborted => self,
            other => Error::Connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
