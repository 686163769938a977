//! Shared test doubles: an in-memory repository with genuine
//! compare-and-set semantics and a scripted completion gateway that counts
//! its calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use revision_core::domain::{
    CreditAccount, GradingResult, MeteredAction, PracticeSession, PracticeSubmission, Question,
    QuestionSource, SessionConfig, SessionStatus, UsageRecord,
};
use revision_core::ports::{
    Completion, CompletionRequest, CompletionService, DebitOutcome, PortError, PortResult,
    RepositoryService, StatusUpdate,
};

//=========================================================================================
// In-Memory Repository
//=========================================================================================

#[derive(Default)]
struct Store {
    sessions: HashMap<Uuid, PracticeSession>,
    submissions: HashMap<Uuid, PracticeSubmission>,
    accounts: HashMap<Uuid, CreditAccount>,
    usage: Vec<UsageRecord>,
}

/// All operations take the single lock, so the conditional update and the
/// check-and-deduct are exactly as atomic as their production counterparts.
#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewinds a session's `started_at`, simulating time passing.
    pub fn backdate_start(&self, session_id: Uuid, minutes: i64) {
        let mut store = self.inner.lock().unwrap();
        let session = store.sessions.get_mut(&session_id).unwrap();
        session.started_at = session.started_at.map(|t| t - Duration::minutes(minutes));
    }

    /// Pins a user's credit balance, creating the account if needed.
    pub fn set_balance(&self, user_id: Uuid, balance: u32) {
        let mut store = self.inner.lock().unwrap();
        store
            .accounts
            .entry(user_id)
            .and_modify(|a| a.balance = balance)
            .or_insert(CreditAccount {
                user_id,
                balance,
                created_at: Utc::now(),
            });
    }

    pub fn balance(&self, user_id: Uuid) -> u32 {
        self.inner.lock().unwrap().accounts[&user_id].balance
    }

    /// Appends a ledger row as-is, bypassing metering. For seeding history.
    pub fn push_usage(&self, record: UsageRecord) {
        self.inner.lock().unwrap().usage.push(record);
    }

    pub fn usage_len(&self) -> usize {
        self.inner.lock().unwrap().usage.len()
    }

    pub fn submission_count_for(&self, session_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .values()
            .filter(|s| s.session_id == session_id)
            .count()
    }

    pub fn stored_status(&self, session_id: Uuid) -> SessionStatus {
        self.inner.lock().unwrap().sessions[&session_id].status
    }
}

#[async_trait]
impl RepositoryService for InMemoryRepository {
    async fn insert_session(&self, session: PracticeSession) -> PortResult<()> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(session.id, session);
        Ok(())
    }

    async fn get_session(
        &self,
        session_id: Uuid,
        owner: Option<Uuid>,
    ) -> PortResult<PracticeSession> {
        let store = self.inner.lock().unwrap();
        let session = store
            .sessions
            .get(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        if let Some(owner) = owner {
            if session.user_id != owner {
                return Err(PortError::Unauthorized);
            }
        }
        Ok(session.clone())
    }

    async fn update_session_status(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        new: SessionStatus,
        stamp: Option<DateTime<Utc>>,
    ) -> PortResult<StatusUpdate> {
        let mut store = self.inner.lock().unwrap();
        let session = store
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        if session.status != expected {
            return Ok(StatusUpdate::PreconditionFailed);
        }
        session.status = new;
        match new {
            SessionStatus::InProgress => session.started_at = stamp,
            SessionStatus::Submitted => session.submitted_at = stamp,
            _ => {}
        }
        Ok(StatusUpdate::Applied)
    }

    async fn insert_submission(&self, submission: PracticeSubmission) -> PortResult<()> {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .insert(submission.id, submission);
        Ok(())
    }

    async fn get_submission(&self, submission_id: Uuid) -> PortResult<PracticeSubmission> {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .get(&submission_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn get_submission_for_session(
        &self,
        session_id: Uuid,
    ) -> PortResult<PracticeSubmission> {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .values()
            .find(|s| s.session_id == session_id)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("No submission for session {}", session_id))
            })
    }

    async fn delete_submission(&self, submission_id: Uuid) -> PortResult<()> {
        self.inner.lock().unwrap().submissions.remove(&submission_id);
        Ok(())
    }

    async fn update_submission_grading(
        &self,
        submission_id: Uuid,
        result: GradingResult,
    ) -> PortResult<()> {
        let mut store = self.inner.lock().unwrap();
        let submission = store
            .submissions
            .get_mut(&submission_id)
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))?;
        submission.grading = Some(result);
        Ok(())
    }

    async fn get_or_create_credit_account(
        &self,
        user_id: Uuid,
        default_balance: u32,
    ) -> PortResult<CreditAccount> {
        let mut store = self.inner.lock().unwrap();
        let account = store.accounts.entry(user_id).or_insert(CreditAccount {
            user_id,
            balance: default_balance,
            created_at: Utc::now(),
        });
        Ok(account.clone())
    }

    async fn deduct_credits(
        &self,
        user_id: Uuid,
        cost: u32,
        record: UsageRecord,
    ) -> PortResult<DebitOutcome> {
        let mut store = self.inner.lock().unwrap();
        let account = store
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("No credit account for {}", user_id)))?;
        if account.balance < cost {
            return Ok(DebitOutcome::Denied);
        }
        account.balance -= cost;
        store.usage.push(record);
        Ok(DebitOutcome::Granted)
    }

    async fn insert_usage_record(&self, record: UsageRecord) -> PortResult<()> {
        self.inner.lock().unwrap().usage.push(record);
        Ok(())
    }

    async fn sum_usage_since(
        &self,
        user_id: Uuid,
        action: MeteredAction,
        since: DateTime<Utc>,
    ) -> PortResult<u32> {
        let store = self.inner.lock().unwrap();
        Ok(store
            .usage
            .iter()
            .filter(|r| r.user_id == user_id && r.action == action && r.occurred_at >= since)
            .map(|r| r.credits)
            .sum())
    }
}

//=========================================================================================
// Scripted Completion Gateway
//=========================================================================================

/// Replays scripted replies in order and counts every call, so tests can
/// assert the gateway was (or was not) reached.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<PortResult<Completion>>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, content: &str) {
        self.replies.lock().unwrap().push_back(Ok(Completion {
            content: content.to_string(),
            total_tokens: 128,
        }));
    }

    pub fn push_failure(&self, reason: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(PortError::Unexpected(reason.to_string())));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedGateway {
    async fn complete(&self, _request: CompletionRequest) -> PortResult<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PortError::Unexpected("no scripted reply".to_string())))
    }
}

//=========================================================================================
// Fixture Helpers
//=========================================================================================

/// A 60-minute paper worth 100 marks for `user_id`.
pub fn bio_mock_config(user_id: Uuid) -> SessionConfig {
    SessionConfig {
        user_id,
        subject_id: None,
        title: "Bio Mock".to_string(),
        time_limit_minutes: 60,
        questions: QuestionSource::Inline {
            questions: vec![
                Question {
                    id: Uuid::new_v4(),
                    number: "1".to_string(),
                    text: "Describe the stages of mitosis.".to_string(),
                    points: 40.0,
                    sub_questions: vec![],
                },
                Question {
                    id: Uuid::new_v4(),
                    number: "2".to_string(),
                    text: "Explain osmosis with an example.".to_string(),
                    points: 60.0,
                    sub_questions: vec![],
                },
            ],
        },
        marking_scheme: None,
    }
}
