//! crates/revision_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport representation;
//! serde derives exist only because question sets, submissions and grading
//! results are persisted and exchanged as structured JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Session Status
//=========================================================================================

/// The lifecycle state of a practice session.
///
/// Transitions only move forward along
/// `created -> ready -> in_progress -> submitted -> graded`, with
/// `in_progress -> expired` as the alternate terminal edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Ready,
    InProgress,
    Submitted,
    Graded,
    Expired,
}

impl SessionStatus {
    /// Terminal states are retained for history and never advance again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Graded | SessionStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Ready => "ready",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Graded => "graded",
            SessionStatus::Expired => "expired",
        }
    }

    /// Parses one of the six wire tokens. Case-sensitive.
    pub fn parse(s: &str) -> Option<SessionStatus> {
        match s {
            "created" => Some(SessionStatus::Created),
            "ready" => Some(SessionStatus::Ready),
            "in_progress" => Some(SessionStatus::InProgress),
            "submitted" => Some(SessionStatus::Submitted),
            "graded" => Some(SessionStatus::Graded),
            "expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Questions and Marking Schemes
//=========================================================================================

/// A single question within an inline question set.
/// `number` is the display label ("1", "2a", ...), distinct from the opaque id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub number: String,
    pub text: String,
    pub points: f64,
    #[serde(default)]
    pub sub_questions: Vec<Question>,
}

impl Question {
    /// Points carried by this question: its own when it is a leaf, otherwise
    /// the sum of its sub-questions.
    pub fn total_points(&self) -> f64 {
        if self.sub_questions.is_empty() {
            self.points
        } else {
            self.sub_questions.iter().map(Question::total_points).sum()
        }
    }
}

/// Where the questions for a session come from: an uploaded document
/// (opaque reference, handled outside the core) or an inline ordered set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionSource {
    Document { document_id: Uuid },
    Inline { questions: Vec<Question> },
}

impl QuestionSource {
    /// The maximum attainable score, when it is derivable.
    /// Document-backed sets carry no inline point values.
    pub fn max_points(&self) -> Option<f64> {
        match self {
            QuestionSource::Document { .. } => None,
            QuestionSource::Inline { questions } => {
                Some(questions.iter().map(Question::total_points).sum())
            }
        }
    }
}

/// Optional marking scheme attached to a session at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkingScheme {
    Inline { scheme: serde_json::Value },
    Document { document_id: Uuid },
}

//=========================================================================================
// Practice Session
//=========================================================================================

/// The immutable configuration supplied when creating a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub title: String,
    pub time_limit_minutes: u32,
    pub questions: QuestionSource,
    pub marking_scheme: Option<MarkingScheme>,
}

/// Represents one timed exam attempt.
///
/// `started_at` is set iff the session has ever reached `in_progress`;
/// `submitted_at` iff it has reached `submitted` or later. Both are stamped
/// at most once.
#[derive(Debug, Clone)]
pub struct PracticeSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub title: String,
    pub time_limit_minutes: u32,
    pub questions: QuestionSource,
    pub marking_scheme: Option<MarkingScheme>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Submissions and Grading Results
//=========================================================================================

/// The answer payload for a submission: a document reference or inline text.
/// Exactly one of the two shapes is populated, matching the declared kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionContent {
    Document { document_id: Uuid },
    Text { text: String },
}

impl SubmissionContent {
    pub fn is_empty(&self) -> bool {
        match self {
            SubmissionContent::Document { .. } => false,
            SubmissionContent::Text { text } => text.trim().is_empty(),
        }
    }
}

/// The user's answer artifact for one session. One submission per session.
#[derive(Debug, Clone)]
pub struct PracticeSubmission {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: SubmissionContent,
    pub submitted_at: DateTime<Utc>,
    /// Populated exactly once by the grading orchestrator; null until then,
    /// and left null when grading fails (the session stays `submitted`).
    pub grading: Option<GradingResult>,
}

/// A per-question grade within a grading result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionGrade {
    pub question_number: String,
    pub marks_awarded: f64,
    pub marks_possible: f64,
    pub feedback: String,
    pub student_answer: String,
}

/// The validated, clamped result of one grading run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub overall_score: f64,
    pub max_score: f64,
    pub feedback: String,
    pub questions: Vec<QuestionGrade>,
    pub graded_at: DateTime<Utc>,
    pub processing_ms: u64,
    pub total_tokens: u32,
}

//=========================================================================================
// Usage Ledger Entries and Credit Accounts
//=========================================================================================

/// The kinds of metered actions the ledger accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeteredAction {
    GradeSubmission,
    ChatMessage,
}

impl MeteredAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeteredAction::GradeSubmission => "grade_submission",
            MeteredAction::ChatMessage => "chat_message",
        }
    }

    pub fn parse(s: &str) -> Option<MeteredAction> {
        match s {
            "grade_submission" => Some(MeteredAction::GradeSubmission),
            "chat_message" => Some(MeteredAction::ChatMessage),
            _ => None,
        }
    }
}

impl std::fmt::Display for MeteredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable ledger entry for one metered action. Never mutated; quota
/// computations sum over these rather than maintaining running counters.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: MeteredAction,
    pub credits: u32,
    pub occurred_at: DateTime<Utc>,
    pub session_id: Option<Uuid>,
}

impl UsageRecord {
    pub fn new(
        user_id: Uuid,
        action: MeteredAction,
        credits: u32,
        session_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action,
            credits,
            occurred_at: Utc::now(),
            session_id,
        }
    }
}

/// A user's spendable credit balance. Rows are created lazily with the
/// free-tier default the first time a metered action is attempted.
#[derive(Debug, Clone)]
pub struct CreditAccount {
    pub user_id: Uuid,
    pub balance: u32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_tokens_are_exact() {
        let cases = [
            (SessionStatus::Created, "created"),
            (SessionStatus::Ready, "ready"),
            (SessionStatus::InProgress, "in_progress"),
            (SessionStatus::Submitted, "submitted"),
            (SessionStatus::Graded, "graded"),
            (SessionStatus::Expired, "expired"),
        ];
        for (status, token) in cases {
            assert_eq!(status.as_str(), token);
            assert_eq!(SessionStatus::parse(token), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", token));
        }
        assert_eq!(SessionStatus::parse("In_Progress"), None);
        assert_eq!(SessionStatus::parse("done"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Graded.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
        assert!(!SessionStatus::Submitted.is_terminal());
    }

    #[test]
    fn inline_max_points_sums_nested_questions() {
        let source = QuestionSource::Inline {
            questions: vec![
                Question {
                    id: Uuid::new_v4(),
                    number: "1".to_string(),
                    text: "Define osmosis.".to_string(),
                    points: 4.0,
                    sub_questions: vec![],
                },
                Question {
                    id: Uuid::new_v4(),
                    number: "2".to_string(),
                    text: "Answer all parts.".to_string(),
                    // Parent points are ignored when sub-questions exist.
                    points: 0.0,
                    sub_questions: vec![
                        Question {
                            id: Uuid::new_v4(),
                            number: "2a".to_string(),
                            text: "Part a.".to_string(),
                            points: 3.0,
                            sub_questions: vec![],
                        },
                        Question {
                            id: Uuid::new_v4(),
                            number: "2b".to_string(),
                            text: "Part b.".to_string(),
                            points: 5.0,
                            sub_questions: vec![],
                        },
                    ],
                },
            ],
        };
        assert_eq!(source.max_points(), Some(12.0));
    }

    #[test]
    fn document_backed_sets_have_no_derivable_max() {
        let source = QuestionSource::Document {
            document_id: Uuid::new_v4(),
        };
        assert_eq!(source.max_points(), None);
    }

    #[test]
    fn text_submission_emptiness() {
        let blank = SubmissionContent::Text {
            text: "   ".to_string(),
        };
        assert!(blank.is_empty());
        let doc = SubmissionContent::Document {
            document_id: Uuid::new_v4(),
        };
        assert!(!doc.is_empty());
    }
}
