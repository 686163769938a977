//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Handlers are a thin transport layer: every rule lives in the core, and
//! each error kind maps to a distinguishable status and message so clients
//! can tell a quota denial from an expired session.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use revision_core::domain::{
    GradingResult, MarkingScheme, PracticeSession, PracticeSubmission, QuestionSource,
    SessionConfig, SubmissionContent,
};
use revision_core::error::PracticeError;
use revision_core::ports::{ChatMessage, PortError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        get_session_handler,
        start_session_handler,
        submit_session_handler,
        get_submission_handler,
        chat_handler,
    ),
    components(
        schemas(
            CreateSessionRequest,
            SessionResponse,
            SubmitRequest,
            SubmissionResponse,
            ChatRequest,
            ChatTurn,
            ChatResponse,
        )
    ),
    tags(
        (name = "Revision API", description = "API endpoints for timed practice sessions and AI marking.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

/// The payload for creating a new practice session.
#[derive(Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub title: String,
    pub time_limit_minutes: u32,
    pub subject_id: Option<Uuid>,
    /// Either `{"kind": "document", "document_id": ...}` or
    /// `{"kind": "inline", "questions": [...]}`.
    #[schema(value_type = Object)]
    pub questions: QuestionSource,
    #[schema(value_type = Option<Object>)]
    pub marking_scheme: Option<MarkingScheme>,
}

/// A practice session as seen by the client. `status` is one of
/// `created | ready | in_progress | submitted | graded | expired`.
#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub title: String,
    pub time_limit_minutes: u32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SessionResponse {
    fn from_domain(session: PracticeSession) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            subject_id: session.subject_id,
            title: session.title,
            time_limit_minutes: session.time_limit_minutes,
            status: session.status.as_str().to_string(),
            created_at: session.created_at,
            started_at: session.started_at,
            submitted_at: session.submitted_at,
        }
    }
}

/// The payload for submitting answers to a session.
#[derive(Deserialize, ToSchema)]
pub struct SubmitRequest {
    /// Either `{"kind": "document", "document_id": ...}` or
    /// `{"kind": "text", "text": ...}`.
    #[schema(value_type = Object)]
    pub content: SubmissionContent,
    /// When true (the default), grading is queued as soon as the submission
    /// is accepted. Poll the submission endpoint to observe completion.
    #[serde(default = "default_true")]
    pub request_grading: bool,
}

fn default_true() -> bool {
    true
}

/// A submission, with its grading result once the detached grading run has
/// completed.
#[derive(Serialize, ToSchema)]
pub struct SubmissionResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    #[schema(value_type = Option<Object>)]
    pub grading: Option<GradingResult>,
}

impl SubmissionResponse {
    fn from_domain(submission: PracticeSubmission) -> Self {
        Self {
            id: submission.id,
            session_id: submission.session_id,
            submitted_at: submission.submitted_at,
            grading: submission.grading,
        }
    }
}

/// One prior turn of a teacher-chat conversation.
#[derive(Deserialize, ToSchema)]
pub struct ChatTurn {
    /// Either "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// The payload for a teacher-chat message.
#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChatResponse {
    pub reply: String,
}

//=========================================================================================
// Shared Handler Helpers
//=========================================================================================

/// Extracts the calling user's id from the `x-user-id` header. Identity is
/// established upstream; the service only needs to know who is asking.
fn require_user_id(headers: &HeaderMap) -> Result<Uuid, (StatusCode, String)> {
    let user_id_str = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "x-user-id header is required".to_string(),
            )
        })?;

    Uuid::parse_str(user_id_str).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "Invalid x-user-id format".to_string(),
        )
    })
}

/// Maps a core error to a status code and a client-facing message. Quota
/// denials and expired sessions get explicit messages so the client can show
/// an upgrade prompt or a session-over screen respectively.
fn error_response(err: PracticeError) -> (StatusCode, String) {
    match &err {
        PracticeError::Validation { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        PracticeError::InvalidState(_) | PracticeError::StorageConflict(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        PracticeError::SessionExpired(_) => (
            StatusCode::GONE,
            "This session's time is up and it can no longer accept submissions.".to_string(),
        ),
        PracticeError::QuotaExceeded(_) => (
            StatusCode::PAYMENT_REQUIRED,
            "You have run out of credits for this action. Upgrade your plan to continue."
                .to_string(),
        ),
        PracticeError::GatewayFailure(_) => (
            StatusCode::BAD_GATEWAY,
            "The marking service is temporarily unavailable. Please try again.".to_string(),
        ),
        PracticeError::Port(PortError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
        PracticeError::Port(PortError::Unauthorized) => (
            StatusCode::FORBIDDEN,
            "You do not own this session.".to_string(),
        ),
        PracticeError::Port(PortError::Unexpected(_)) => {
            error!("Unexpected port error: {:?}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred.".to_string(),
            )
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Create a new practice session.
///
/// The session is created and then activated in one request; it is returned
/// in the `ready` state, waiting for an explicit start.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created and activated", body = SessionResponse),
        (status = 400, description = "Malformed configuration"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    let config = SessionConfig {
        user_id,
        subject_id: payload.subject_id,
        title: payload.title,
        time_limit_minutes: payload.time_limit_minutes,
        questions: payload.questions,
        marking_scheme: payload.marking_scheme,
    };

    let lifecycle = &app_state.lifecycle;
    let result = async {
        let session = lifecycle.create(config).await?;
        lifecycle.activate(session.id, user_id).await?;
        lifecycle.fetch(session.id, user_id).await
    }
    .await;

    match result {
        Ok(session) => Ok((
            StatusCode::CREATED,
            Json(SessionResponse::from_domain(session)),
        )),
        Err(e) => Err(error_response(e)),
    }
}

/// Fetch a session, with expiry applied lazily.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "The session", body = SessionResponse),
        (status = 404, description = "No such session")
    ),
    params(
        ("id" = Uuid, Path, description = "The session ID."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;
    match app_state.lifecycle.fetch(session_id, user_id).await {
        Ok(session) => Ok(Json(SessionResponse::from_domain(session))),
        Err(e) => Err(error_response(e)),
    }
}

/// Start a ready session, beginning its timer.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    responses(
        (status = 200, description = "Session started", body = SessionResponse),
        (status = 409, description = "Session is not ready to start")
    ),
    params(
        ("id" = Uuid, Path, description = "The session ID."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn start_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;
    match app_state.lifecycle.start(session_id, user_id).await {
        Ok(session) => Ok(Json(SessionResponse::from_domain(session))),
        Err(e) => Err(error_response(e)),
    }
}

/// Submit answers to an in-progress session.
///
/// Returns as soon as the submission is durably recorded; grading runs
/// detached. Poll the submission endpoint for the result.
#[utoipa::path(
    post,
    path = "/sessions/{id}/submit",
    request_body = SubmitRequest,
    responses(
        (status = 202, description = "Submission accepted; grading queued", body = SubmissionResponse),
        (status = 409, description = "Session is not accepting submissions"),
        (status = 410, description = "Session has expired")
    ),
    params(
        ("id" = Uuid, Path, description = "The session ID."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn submit_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    let submission = app_state
        .lifecycle
        .submit(session_id, user_id, payload.content)
        .await
        .map_err(error_response)?;

    if payload.request_grading {
        if let Err(e) = app_state
            .grading_queue
            .enqueue(session_id, submission.id)
            .await
        {
            // The submission is already accepted; a dead worker only means
            // grading must be re-requested later.
            error!("Failed to enqueue grading job: {:?}", e);
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmissionResponse::from_domain(submission)),
    ))
}

/// Fetch the submission for a session, including its grading result once
/// grading has completed.
#[utoipa::path(
    get,
    path = "/sessions/{id}/submission",
    responses(
        (status = 200, description = "The submission", body = SubmissionResponse),
        (status = 404, description = "No submission yet")
    ),
    params(
        ("id" = Uuid, Path, description = "The session ID."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_submission_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    // Ownership is enforced by the session fetch before the submission is read.
    app_state
        .lifecycle
        .fetch(session_id, user_id)
        .await
        .map_err(error_response)?;

    match app_state.repo.get_submission_for_session(session_id).await {
        Ok(submission) => Ok(Json(SubmissionResponse::from_domain(submission))),
        Err(e) => Err(error_response(PracticeError::Port(e))),
    }
}

/// Send a message to the teacher chat.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The teacher's reply", body = ChatResponse),
        (status = 402, description = "Daily chat allowance exhausted"),
        (status = 502, description = "Completion service unavailable")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = require_user_id(&headers)?;

    let mut history = Vec::with_capacity(payload.history.len());
    for turn in payload.history {
        let message = match turn.role.as_str() {
            "user" => ChatMessage::user(turn.content),
            "assistant" => ChatMessage::assistant(turn.content),
            other => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    format!("Invalid chat role '{}'", other),
                ))
            }
        };
        history.push(message);
    }

    match app_state
        .chat
        .send_message(user_id, payload.session_id, &history, &payload.message)
        .await
    {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(e) => Err(error_response(e)),
    }
}
