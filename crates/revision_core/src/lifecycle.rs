//! crates/revision_core/src/lifecycle.rs
//!
//! The session lifecycle manager. Owns the state machine
//! `created -> ready -> in_progress -> submitted -> graded`, with
//! `in_progress -> expired` as the alternate terminal edge. Every transition
//! is guarded by a compare-and-set on the stored status, so concurrent
//! requests cannot skip states or run the machine backwards.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    PracticeSession, PracticeSubmission, QuestionSource, SessionConfig, SessionStatus,
    SubmissionContent,
};
use crate::error::PracticeError;
use crate::expiry;
use crate::ports::{RepositoryService, StatusUpdate};

/// Validates transition preconditions and timestamps transitions. The only
/// component (besides the grading orchestrator) that mutates sessions.
#[derive(Clone)]
pub struct SessionLifecycle {
    repo: Arc<dyn RepositoryService>,
}

impl SessionLifecycle {
    pub fn new(repo: Arc<dyn RepositoryService>) -> Self {
        Self { repo }
    }

    /// Creates a session in `created`. Exactly one row is written.
    pub async fn create(&self, config: SessionConfig) -> Result<PracticeSession, PracticeError> {
        let title = config.title.trim();
        if title.is_empty() {
            return Err(PracticeError::Validation {
                field: "title",
                reason: "must not be empty".to_string(),
            });
        }
        if config.time_limit_minutes == 0 {
            return Err(PracticeError::Validation {
                field: "time_limit_minutes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let QuestionSource::Inline { questions } = &config.questions {
            if questions.is_empty() {
                return Err(PracticeError::Validation {
                    field: "questions",
                    reason: "inline question set must not be empty".to_string(),
                });
            }
        }

        let session = PracticeSession {
            id: Uuid::new_v4(),
            user_id: config.user_id,
            subject_id: config.subject_id,
            title: title.to_string(),
            time_limit_minutes: config.time_limit_minutes,
            questions: config.questions,
            marking_scheme: config.marking_scheme,
            status: SessionStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            submitted_at: None,
        };
        self.repo.insert_session(session.clone()).await?;
        info!(session_id = %session.id, "Created practice session.");
        Ok(session)
    }

    /// Transitions `created -> ready`. Kept separate from `create` so
    /// creation and eligibility confirmation can fail independently without
    /// leaving partial state.
    pub async fn activate(&self, session_id: Uuid, user_id: Uuid) -> Result<(), PracticeError> {
        self.repo.get_session(session_id, Some(user_id)).await?;
        match self
            .repo
            .update_session_status(session_id, SessionStatus::Created, SessionStatus::Ready, None)
            .await?
        {
            StatusUpdate::Applied => Ok(()),
            StatusUpdate::PreconditionFailed => Err(PracticeError::InvalidState(session_id)),
        }
    }

    /// Transitions `ready -> in_progress`, stamping `started_at` exactly
    /// once. A double-start loses the compare-and-set and observes
    /// `InvalidState`.
    pub async fn start(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<PracticeSession, PracticeError> {
        self.repo.get_session(session_id, Some(user_id)).await?;
        let now = Utc::now();
        match self
            .repo
            .update_session_status(
                session_id,
                SessionStatus::Ready,
                SessionStatus::InProgress,
                Some(now),
            )
            .await?
        {
            StatusUpdate::Applied => {
                info!(%session_id, "Session started.");
                self.repo.get_session(session_id, Some(user_id)).await.map_err(Into::into)
            }
            StatusUpdate::PreconditionFailed => Err(PracticeError::InvalidState(session_id)),
        }
    }

    /// Accepts the user's answer and transitions `in_progress -> submitted`.
    ///
    /// Expiry is checked before the payload is accepted: a submission
    /// arriving past the deadline is rejected outright rather than
    /// accepted-then-discarded. Of two concurrent submits, exactly one wins
    /// the status transition; the loser's row is removed and it observes
    /// `InvalidState`.
    pub async fn submit(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        content: SubmissionContent,
    ) -> Result<PracticeSubmission, PracticeError> {
        let session = self.repo.get_session(session_id, Some(user_id)).await?;
        if session.status != SessionStatus::InProgress {
            return Err(PracticeError::InvalidState(session_id));
        }

        let now = Utc::now();
        if let Some(started_at) = session.started_at {
            if expiry::is_expired(started_at, session.time_limit_minutes, now) {
                // The computed expiry is authoritative for this call; the
                // persisted status is updated best-effort and may lag.
                if let Err(e) = self
                    .repo
                    .update_session_status(
                        session_id,
                        SessionStatus::InProgress,
                        SessionStatus::Expired,
                        None,
                    )
                    .await
                {
                    warn!(%session_id, error = %e, "Failed to persist expired status.");
                }
                return Err(PracticeError::SessionExpired(session_id));
            }
        }

        if content.is_empty() {
            return Err(PracticeError::Validation {
                field: "content",
                reason: "submission must not be empty".to_string(),
            });
        }

        let submission = PracticeSubmission {
            id: Uuid::new_v4(),
            session_id,
            content,
            submitted_at: now,
            grading: None,
        };
        self.repo.insert_submission(submission.clone()).await?;

        match self
            .repo
            .update_session_status(
                session_id,
                SessionStatus::InProgress,
                SessionStatus::Submitted,
                Some(now),
            )
            .await?
        {
            StatusUpdate::Applied => {
                info!(%session_id, submission_id = %submission.id, "Submission accepted.");
                Ok(submission)
            }
            StatusUpdate::PreconditionFailed => {
                // Another submit (or the expiry path) won the race; undo our
                // insert so the session keeps a single submission.
                if let Err(e) = self.repo.delete_submission(submission.id).await {
                    warn!(submission_id = %submission.id, error = %e, "Failed to remove losing submission.");
                }
                Err(PracticeError::InvalidState(session_id))
            }
        }
    }

    /// Fetches a session, applying the expiry monitor lazily. A session
    /// found past its deadline is returned as `expired` and the stored
    /// status is updated best-effort.
    pub async fn fetch(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<PracticeSession, PracticeError> {
        let mut session = self.repo.get_session(session_id, Some(user_id)).await?;
        let now = Utc::now();
        if expiry::effective_status(&session, now) == SessionStatus::Expired
            && session.status == SessionStatus::InProgress
        {
            if let Err(e) = self
                .repo
                .update_session_status(
                    session_id,
                    SessionStatus::InProgress,
                    SessionStatus::Expired,
                    None,
                )
                .await
            {
                warn!(%session_id, error = %e, "Failed to persist expired status on read.");
            }
            session.status = SessionStatus::Expired;
        }
        Ok(session)
    }
}
