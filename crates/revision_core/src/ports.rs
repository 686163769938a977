//! crates/revision_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    CreditAccount, GradingResult, MeteredAction, PracticeSession, PracticeSubmission,
    SessionStatus, UsageRecord,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Typed Outcomes for Conditional Storage Operations
//=========================================================================================

/// The outcome of a compare-and-set status update. A transition whose
/// precondition no longer holds at write time must report
/// `PreconditionFailed` rather than overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied,
    PreconditionFailed,
}

/// The outcome of an atomic check-and-deduct. `Denied` means insufficient
/// credits, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Granted,
    Denied,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The storage contract the core requires. Implementations must make
/// `update_session_status` and `deduct_credits` genuinely atomic (a single
/// conditional write / one transaction), not read-then-write pairs.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    // --- Sessions ---
    async fn insert_session(&self, session: PracticeSession) -> PortResult<()>;

    /// Fetches a session. When `owner` is given, a session owned by a
    /// different user yields `PortError::Unauthorized`.
    async fn get_session(
        &self,
        session_id: Uuid,
        owner: Option<Uuid>,
    ) -> PortResult<PracticeSession>;

    /// Compare-and-set on the status column. `stamp` is written to
    /// `started_at` when `new` is `in_progress` and to `submitted_at` when
    /// `new` is `submitted`; it is ignored for other targets.
    async fn update_session_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        stamp: Option<DateTime<Utc>>,
    ) -> PortResult<StatusUpdate>;

    // --- Submissions ---
    async fn insert_submission(&self, submission: PracticeSubmission) -> PortResult<()>;

    async fn get_submission(&self, submission_id: Uuid) -> PortResult<PracticeSubmission>;

    async fn get_submission_for_session(
        &self,
        session_id: Uuid,
    ) -> PortResult<PracticeSubmission>;

    /// Removes a submission row. Used to undo the insert half of a submit
    /// whose status transition lost its race.
    async fn delete_submission(&self, submission_id: Uuid) -> PortResult<()>;

    async fn update_submission_grading(
        &self,
        submission_id: Uuid,
        result: GradingResult,
    ) -> PortResult<()>;

    // --- Credits and Usage ---
    /// Fetches the user's credit account, lazily creating it with
    /// `default_balance` when the user has no row yet.
    async fn get_or_create_credit_account(
        &self,
        user_id: Uuid,
        default_balance: u32,
    ) -> PortResult<CreditAccount>;

    /// Atomically verifies `balance >= cost`, deducts, and appends `record`
    /// in the same transaction.
    async fn deduct_credits(
        &self,
        user_id: Uuid,
        cost: u32,
        record: UsageRecord,
    ) -> PortResult<DebitOutcome>;

    /// Appends a ledger entry without touching any balance.
    async fn insert_usage_record(&self, record: UsageRecord) -> PortResult<()>;

    /// Sums the credits charged for `action` since `since` (inclusive).
    async fn sum_usage_since(
        &self,
        user_id: Uuid,
        action: MeteredAction,
        since: DateTime<Utc>,
    ) -> PortResult<u32>;
}

//=========================================================================================
// AI Completion Gateway
//=========================================================================================

/// The role of one message in a completion prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the ordered prompt sent to the gateway.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A request to the external completion service.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The gateway's reply: generated text plus token-usage metadata.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub total_tokens: u32,
}

/// The external AI completion service, treated as a black box:
/// structured prompt in, text out. May fail or return malformed content.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> PortResult<Completion>;
}
