//! Unified error handling for wardend.
//!
//! Every core operation returns a discriminated [`OpError`] instead of
//! raising past its own boundary; the gateway layer turns the error kind
//! into user-facing text and an appropriate reply channel.

use thiserror::Error;

/// Errors that can occur while processing an operation.
#[derive(Debug, Clone, Error)]
pub enum OpError {
    /// Bad input: unknown tier, out-of-range duration, bad file, and so on.
    /// Surfaced to the caller with the specific message; no state change.
    #[error("{0}")]
    Validation(String),

    /// The per-user command cooldown has not elapsed yet.
    #[error("cooldown: retry in {seconds}s")]
    Cooldown { seconds: u64 },

    /// Capability check failed. Surfaced, no state change.
    #[error("permission denied")]
    Permission,

    /// Unknown client, ticket, or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The user already has an open ticket; carries its id.
    #[error("ticket already open: {ticket_id}")]
    AlreadyOpen { ticket_id: String },

    /// A collaborator failed (channel ops, transform tool, store I/O).
    /// Logged internally, surfaced as a generic failure.
    #[error("external failure: {0}")]
    External(String),

    /// The transform tool exceeded its hard deadline and was killed.
    #[error("operation timed out")]
    Timeout,

    /// Unclassified failure caught at the dispatch boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OpError {
    /// Static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Cooldown { .. } => "cooldown",
            Self::Permission => "permission",
            Self::NotFound(_) => "not_found",
            Self::AlreadyOpen { .. } => "already_open",
            Self::External(_) => "external",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// The message shown to the requesting user.
    ///
    /// External, timeout, and internal failures collapse to one generic
    /// line; their detail stays in the operational log only.
    pub fn user_message(&self) -> String {
        match self {
            Self::External(_) | Self::Timeout | Self::Internal(_) => {
                "an error occurred while processing your request".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type for core operations.
pub type OpResult<T> = Result<T, OpError>;
