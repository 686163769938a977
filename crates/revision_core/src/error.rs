//! crates/revision_core/src/error.rs
//!
//! Defines the caller-facing error taxonomy for session and metering
//! operations. These are typed results, not exceptions: callers are expected
//! to match on the variant (e.g. to show an upgrade prompt on quota denial
//! versus a session-over screen on expiry).

use uuid::Uuid;

use crate::domain::MeteredAction;
use crate::ports::PortError;

/// The primary error type for practice-session workflows.
#[derive(Debug, thiserror::Error)]
pub enum PracticeError {
    /// Malformed input (empty title, non-positive time limit, wrong or empty
    /// submission payload). Nothing was mutated.
    #[error("Invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// The session is not in the required status for this operation, or a
    /// concurrent request advanced it first. Nothing was mutated by this call.
    #[error("Session {0} is not in a valid state for this operation")]
    InvalidState(Uuid),

    /// A submit arrived past the expiry threshold. The session is marked
    /// `expired` best-effort alongside this result.
    #[error("Session {0} has expired")]
    SessionExpired(Uuid),

    /// The usage ledger denied the metered action. The external gateway was
    /// never called and nothing was charged.
    #[error("Quota exceeded for {0}")]
    QuotaExceeded(MeteredAction),

    /// The external completion call failed or returned unusable content.
    /// Grading treats this as retryable; no partial result is persisted.
    #[error("Completion gateway failure: {0}")]
    GatewayFailure(String),

    /// A conditional write lost a race against another request.
    #[error("Session {0} was concurrently modified")]
    StorageConflict(Uuid),

    /// An error that propagated up from a service port.
    #[error("Service port error: {0}")]
    Port(#[from] PortError),
}
