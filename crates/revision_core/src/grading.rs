//! crates/revision_core/src/grading.rs
//!
//! The grading orchestrator. Runs after a submission is accepted, detached
//! from the submitting request: reserves credits, builds a deterministic
//! grading prompt, calls the completion gateway, validates the structured
//! output it claims to return, clamps scores, and persists the result. Any
//! failure between the gateway call and validation persists nothing and
//! leaves the session in `submitted`, so grading can be retried.

const GRADING_INSTRUCTIONS: &str = r#"You are an examiner marking a student's practice exam submission.

You will receive the exam questions, the student's submitted answers, an optional marking scheme, and the maximum attainable score.

Mark strictly and consistently:
- Award marks per question according to the marking scheme when one is provided.
- Without a marking scheme, award marks proportionally to how completely and correctly each question is answered.
- Never award more marks for a question than it is worth, and never a negative number.
- Quote the fragment of the student's answer each per-question judgement refers to.

Respond with ONLY a JSON object in exactly this shape, and no other text:

{
  "overall_score": <number>,
  "max_score": <number>,
  "feedback": "<two or three sentences of overall feedback>",
  "questions": [
    {
      "question_number": "<display number, e.g. \"2a\">",
      "marks_awarded": <number>,
      "marks_possible": <number>,
      "feedback": "<one or two sentences>",
      "student_answer": "<short quote from the student's answer>"
    }
  ]
}

Every question in the paper must appear once in "questions", in order."#;

const GRADING_INPUT_TEMPLATE: &str = r#"QUESTIONS:
{questions}

STUDENT SUBMISSION:
{answer}

MARKING SCHEME:
{scheme}

MAXIMUM SCORE: {max_score}"#;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    GradingResult, MarkingScheme, MeteredAction, PracticeSession, PracticeSubmission,
    QuestionGrade, QuestionSource, SessionStatus, SubmissionContent,
};
use crate::error::PracticeError;
use crate::ledger::UsageLedger;
use crate::ports::{ChatMessage, CompletionRequest, CompletionService, RepositoryService, StatusUpdate};

/// Gateway call settings for grading runs. Temperature stays low: grading
/// favours consistency over creative variation.
#[derive(Debug, Clone)]
pub struct GradingSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

//=========================================================================================
// The Orchestrator
//=========================================================================================

pub struct GradingOrchestrator {
    repo: Arc<dyn RepositoryService>,
    gateway: Arc<dyn CompletionService>,
    ledger: UsageLedger,
    settings: GradingSettings,
}

impl GradingOrchestrator {
    pub fn new(
        repo: Arc<dyn RepositoryService>,
        gateway: Arc<dyn CompletionService>,
        ledger: UsageLedger,
        settings: GradingSettings,
    ) -> Self {
        Self {
            repo,
            gateway,
            ledger,
            settings,
        }
    }

    /// Grades one submission end to end.
    ///
    /// Safe to re-run against the same submission: an already-graded
    /// submission returns without charging or calling the gateway, which is
    /// the recovery path after a gateway failure.
    pub async fn grade(
        &self,
        session_id: Uuid,
        submission_id: Uuid,
    ) -> Result<(), PracticeError> {
        let started = Instant::now();

        let submission = self.repo.get_submission(submission_id).await?;
        if submission.grading.is_some() {
            info!(%submission_id, "Submission already graded; nothing to do.");
            return Ok(());
        }
        let session = self.repo.get_session(session_id, None).await?;
        let declared_max = session.questions.max_points();

        // 1. Reserve the grading cost before any external call.
        self.ledger
            .reserve(session.user_id, MeteredAction::GradeSubmission, Some(session_id))
            .await?;

        // 2-3. Build the deterministic prompt and call the gateway.
        let messages = build_grading_prompt(&session, &submission);
        let completion = self
            .gateway
            .complete(CompletionRequest {
                messages,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            })
            .await
            .map_err(|e| PracticeError::GatewayFailure(e.to_string()))?;

        // 4-5. Parse, validate, clamp. The raw text is logged on failure so
        // malformed gateway output can be diagnosed later.
        let parsed = match parse_grading_response(&completion.content, declared_max) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(%submission_id, raw = %completion.content, "Grading response rejected.");
                return Err(e);
            }
        };

        let result = GradingResult {
            overall_score: parsed.overall_score,
            max_score: parsed.max_score,
            feedback: parsed.feedback,
            questions: parsed.questions,
            graded_at: Utc::now(),
            processing_ms: started.elapsed().as_millis() as u64,
            total_tokens: completion.total_tokens,
        };

        // 6. Persist the result, then flip the session.
        self.repo
            .update_submission_grading(submission_id, result)
            .await?;
        match self
            .repo
            .update_session_status(
                session_id,
                SessionStatus::Submitted,
                SessionStatus::Graded,
                None,
            )
            .await?
        {
            StatusUpdate::Applied => {
                info!(%session_id, %submission_id, "Submission graded.");
                Ok(())
            }
            StatusUpdate::PreconditionFailed => Err(PracticeError::StorageConflict(session_id)),
        }
    }
}

//=========================================================================================
// Prompt Construction
//=========================================================================================

/// Builds the grading prompt: system rubric plus the serialized paper,
/// answer, scheme and declared maximum. Deterministic for a given session
/// and submission.
fn build_grading_prompt(
    session: &PracticeSession,
    submission: &PracticeSubmission,
) -> Vec<ChatMessage> {
    let questions = match &session.questions {
        QuestionSource::Inline { questions } => {
            serde_json::to_string_pretty(questions).unwrap_or_else(|_| "[]".to_string())
        }
        QuestionSource::Document { document_id } => {
            format!("(question paper from uploaded document {})", document_id)
        }
    };

    let answer = match &submission.content {
        SubmissionContent::Text { text } => text.clone(),
        SubmissionContent::Document { document_id } => {
            format!("(answers from uploaded document {})", document_id)
        }
    };

    let scheme = match &session.marking_scheme {
        Some(MarkingScheme::Inline { scheme }) => {
            serde_json::to_string_pretty(scheme).unwrap_or_else(|_| "null".to_string())
        }
        Some(MarkingScheme::Document { document_id }) => {
            format!("(marking scheme from uploaded document {})", document_id)
        }
        None => "(none provided)".to_string(),
    };

    let max_score = match session.questions.max_points() {
        Some(max) => format!("{}", max),
        None => "(as stated on the paper)".to_string(),
    };

    let input = GRADING_INPUT_TEMPLATE
        .replace("{questions}", &questions)
        .replace("{answer}", &answer)
        .replace("{scheme}", &scheme)
        .replace("{max_score}", &max_score);

    vec![
        ChatMessage::system(GRADING_INSTRUCTIONS),
        ChatMessage::user(input),
    ]
}

//=========================================================================================
// Response Parsing and Validation
//=========================================================================================

/// The raw shape the gateway must produce. `overall_score` and `questions`
/// are required; a response missing either is rejected rather than coerced.
#[derive(Debug, Deserialize)]
struct RawGradingResponse {
    overall_score: f64,
    max_score: Option<f64>,
    #[serde(default)]
    feedback: String,
    questions: Vec<RawQuestionGrade>,
}

#[derive(Debug, Deserialize)]
struct RawQuestionGrade {
    question_number: String,
    marks_awarded: f64,
    marks_possible: f64,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    student_answer: String,
}

/// A validated, clamped grading payload, not yet stamped with timing data.
#[derive(Debug)]
pub struct ParsedGrading {
    pub overall_score: f64,
    pub max_score: f64,
    pub feedback: String,
    pub questions: Vec<QuestionGrade>,
}

/// Extracts the first balanced JSON object from free text. The gateway is
/// not guaranteed to return only JSON; prose before or after the object is
/// tolerated. Braces inside string literals do not count towards balance.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the gateway's text into a validated grading payload.
///
/// `declared_max` is the maximum derived from the session's question set,
/// when derivable; the model's own `max_score` claim is only trusted when no
/// declared maximum exists. Scores are clamped because the external model is
/// untrusted to respect numeric bounds.
pub fn parse_grading_response(
    text: &str,
    declared_max: Option<f64>,
) -> Result<ParsedGrading, PracticeError> {
    let json = extract_json_object(text).ok_or_else(|| {
        PracticeError::GatewayFailure("response contained no JSON object".to_string())
    })?;

    let raw: RawGradingResponse = serde_json::from_str(json).map_err(|e| {
        PracticeError::GatewayFailure(format!("response failed schema validation: {}", e))
    })?;

    let max_score = declared_max.or(raw.max_score).unwrap_or(0.0);
    if max_score <= 0.0 {
        return Err(PracticeError::GatewayFailure(
            "response carried no usable max_score".to_string(),
        ));
    }

    let overall_score = raw.overall_score.clamp(0.0, max_score);
    if overall_score != raw.overall_score {
        warn!(
            reported = raw.overall_score,
            max_score, "Clamped out-of-bounds overall score."
        );
    }

    let questions = raw
        .questions
        .into_iter()
        .map(|q| {
            let possible = q.marks_possible.max(0.0);
            QuestionGrade {
                marks_awarded: q.marks_awarded.clamp(0.0, possible),
                marks_possible: possible,
                question_number: q.question_number,
                feedback: q.feedback,
                student_answer: q.student_answer,
            }
        })
        .collect();

    Ok(ParsedGrading {
        overall_score,
        max_score,
        feedback: raw.feedback,
        questions,
    })
}
