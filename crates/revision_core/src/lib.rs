pub mod chat;
pub mod domain;
pub mod error;
pub mod expiry;
pub mod grading;
pub mod ledger;
pub mod lifecycle;
pub mod ports;
pub mod worker;

pub use domain::{
    CreditAccount, GradingResult, MarkingScheme, MeteredAction, PracticeSession,
    PracticeSubmission, Question, QuestionGrade, QuestionSource, SessionConfig, SessionStatus,
    SubmissionContent, UsageRecord,
};
pub use error::PracticeError;
pub use ports::{
    ChatMessage, ChatRole, Completion, CompletionRequest, CompletionService, DebitOutcome,
    PortError, PortResult, RepositoryService, StatusUpdate,
};
