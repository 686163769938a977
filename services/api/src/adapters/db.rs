//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `RepositoryService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! The two operations the core relies on for correctness are implemented as
//! single server-side statements: the status compare-and-set is one
//! conditional UPDATE, and the credit deduction is one conditional UPDATE
//! plus the ledger INSERT inside a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use revision_core::domain::{
    CreditAccount, GradingResult, MarkingScheme, MeteredAction, PracticeSession,
    PracticeSubmission, QuestionSource, SessionStatus, SubmissionContent, UsageRecord,
};
use revision_core::ports::{
    DebitOutcome, PortError, PortResult, RepositoryService, StatusUpdate,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `RepositoryService` port.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Creates a new `PgRepository`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    subject_id: Option<Uuid>,
    title: String,
    time_limit_minutes: i32,
    questions: serde_json::Value,
    marking_scheme: Option<serde_json::Value>,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn to_domain(self) -> PortResult<PracticeSession> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| unexpected(format!("unknown session status '{}'", self.status)))?;
        let questions: QuestionSource =
            serde_json::from_value(self.questions).map_err(unexpected)?;
        let marking_scheme: Option<MarkingScheme> = self
            .marking_scheme
            .map(serde_json::from_value)
            .transpose()
            .map_err(unexpected)?;
        Ok(PracticeSession {
            id: self.id,
            user_id: self.user_id,
            subject_id: self.subject_id,
            title: self.title,
            time_limit_minutes: self.time_limit_minutes as u32,
            questions,
            marking_scheme,
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            submitted_at: self.submitted_at,
        })
    }
}

#[derive(FromRow)]
struct SubmissionRecord {
    id: Uuid,
    session_id: Uuid,
    content: serde_json::Value,
    submitted_at: DateTime<Utc>,
    grading: Option<serde_json::Value>,
}

impl SubmissionRecord {
    fn to_domain(self) -> PortResult<PracticeSubmission> {
        let content: SubmissionContent =
            serde_json::from_value(self.content).map_err(unexpected)?;
        let grading: Option<GradingResult> = self
            .grading
            .map(serde_json::from_value)
            .transpose()
            .map_err(unexpected)?;
        Ok(PracticeSubmission {
            id: self.id,
            session_id: self.session_id,
            content,
            submitted_at: self.submitted_at,
            grading,
        })
    }
}

#[derive(FromRow)]
struct CreditAccountRecord {
    user_id: Uuid,
    balance: i64,
    created_at: DateTime<Utc>,
}

impl CreditAccountRecord {
    fn to_domain(self) -> CreditAccount {
        CreditAccount {
            user_id: self.user_id,
            balance: self.balance.max(0) as u32,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// `RepositoryService` Trait Implementation
//=========================================================================================

#[async_trait]
impl RepositoryService for PgRepository {
    async fn insert_session(&self, session: PracticeSession) -> PortResult<()> {
        let questions = serde_json::to_value(&session.questions).map_err(unexpected)?;
        let marking_scheme = session
            .marking_scheme
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(unexpected)?;
        sqlx::query(
            "INSERT INTO practice_sessions \
             (id, user_id, subject_id, title, time_limit_minutes, questions, marking_scheme, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.subject_id)
        .bind(&session.title)
        .bind(session.time_limit_minutes as i32)
        .bind(questions)
        .bind(marking_scheme)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_session(
        &self,
        session_id: Uuid,
        owner: Option<Uuid>,
    ) -> PortResult<PracticeSession> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, user_id, subject_id, title, time_limit_minutes, questions, \
             marking_scheme, status, created_at, started_at, submitted_at \
             FROM practice_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Session {} not found", session_id))
            }
            _ => unexpected(e),
        })?;

        let session = record.to_domain()?;
        if let Some(owner) = owner {
            if session.user_id != owner {
                return Err(PortError::Unauthorized);
            }
        }
        Ok(session)
    }

    async fn update_session_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        stamp: Option<DateTime<Utc>>,
    ) -> PortResult<StatusUpdate> {
        // One conditional UPDATE keyed on the expected status; the row count
        // tells us whether the precondition held at write time.
        let result = match new {
            SessionStatus::InProgress => {
                sqlx::query(
                    "UPDATE practice_sessions SET status = $1, started_at = $2 \
                     WHERE id = $3 AND status = $4",
                )
                .bind(new.as_str())
                .bind(stamp)
                .bind(session_id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
            }
            SessionStatus::Submitted => {
                sqlx::query(
                    "UPDATE practice_sessions SET status = $1, submitted_at = $2 \
                     WHERE id = $3 AND status = $4",
                )
                .bind(new.as_str())
                .bind(stamp)
                .bind(session_id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
            }
            _ => {
                sqlx::query(
                    "UPDATE practice_sessions SET status = $1 WHERE id = $2 AND status = $3",
                )
                .bind(new.as_str())
                .bind(session_id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(unexpected)?;

        if result.rows_affected() == 1 {
            Ok(StatusUpdate::Applied)
        } else {
            Ok(StatusUpdate::PreconditionFailed)
        }
    }

    async fn insert_submission(&self, submission: PracticeSubmission) -> PortResult<()> {
        let content = serde_json::to_value(&submission.content).map_err(unexpected)?;
        sqlx::query(
            "INSERT INTO practice_submissions (id, session_id, content, submitted_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(submission.id)
        .bind(submission.session_id)
        .bind(content)
        .bind(submission.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_submission(&self, submission_id: Uuid) -> PortResult<PracticeSubmission> {
        let record = sqlx::query_as::<_, SubmissionRecord>(
            "SELECT id, session_id, content, submitted_at, grading \
             FROM practice_submissions WHERE id = $1",
        )
        .bind(submission_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Submission {} not found", submission_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn get_submission_for_session(
        &self,
        session_id: Uuid,
    ) -> PortResult<PracticeSubmission> {
        let record = sqlx::query_as::<_, SubmissionRecord>(
            "SELECT id, session_id, content, submitted_at, grading \
             FROM practice_submissions WHERE session_id = $1 \
             ORDER BY submitted_at ASC LIMIT 1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("No submission for session {}", session_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn delete_submission(&self, submission_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM practice_submissions WHERE id = $1")
            .bind(submission_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn update_submission_grading(
        &self,
        submission_id: Uuid,
        result: GradingResult,
    ) -> PortResult<()> {
        let grading = serde_json::to_value(&result).map_err(unexpected)?;
        let outcome = sqlx::query(
            "UPDATE practice_submissions SET grading = $1 WHERE id = $2",
        )
        .bind(grading)
        .bind(submission_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if outcome.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Submission {} not found",
                submission_id
            )));
        }
        Ok(())
    }

    async fn get_or_create_credit_account(
        &self,
        user_id: Uuid,
        default_balance: u32,
    ) -> PortResult<CreditAccount> {
        sqlx::query(
            "INSERT INTO credit_accounts (user_id, balance, created_at) \
             VALUES ($1, $2, $3) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(default_balance as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, CreditAccountRecord>(
            "SELECT user_id, balance, created_at FROM credit_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Credit account for {} not found", user_id))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn deduct_credits(
        &self,
        user_id: Uuid,
        cost: u32,
        record: UsageRecord,
    ) -> PortResult<DebitOutcome> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let updated = sqlx::query(
            "UPDATE credit_accounts SET balance = balance - $1 \
             WHERE user_id = $2 AND balance >= $1",
        )
        .bind(cost as i64)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(DebitOutcome::Denied);
        }

        sqlx::query(
            "INSERT INTO usage_records (id, user_id, action, credits, occurred_at, session_id) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.action.as_str())
        .bind(record.credits as i32)
        .bind(record.occurred_at)
        .bind(record.session_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(DebitOutcome::Granted)
    }

    async fn insert_usage_record(&self, record: UsageRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO usage_records (id, user_id, action, credits, occurred_at, session_id) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.action.as_str())
        .bind(record.credits as i32)
        .bind(record.occurred_at)
        .bind(record.session_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn sum_usage_since(
        &self,
        user_id: Uuid,
        action: MeteredAction,
        since: DateTime<Utc>,
    ) -> PortResult<u32> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(credits), 0) FROM usage_records \
             WHERE user_id = $1 AND action = $2 AND occurred_at >= $3",
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(total.max(0) as u32)
    }
}
