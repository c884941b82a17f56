//! JSON API over the conversation runtime.
//!
//! Endpoints:
//! - `POST /api/chat`: process one customer message and return the round
//! - `GET /api/sessions?limit=`: most recently updated sessions
//! - `GET /api/sessions/{id}`: one persisted session with its round records
//! - `POST /api/feedback`: score the round identified by its trace id

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use airloop_agent::{ConversationRuntime, Feedback, TurnRequest};
use airloop_core::errors::{ApplicationError, InterfaceError};

const DEFAULT_SESSION_LIMIT: u32 = 20;
const MAX_SESSION_LIMIT: u32 = 200;

#[derive(Clone)]
pub struct ApiState {
    runtime: ConversationRuntime,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub enum ApiError {
    Interface(InterfaceError),
    NotFound { message: String, correlation_id: String },
}

impl ApiError {
    fn from_application(
        error: ApplicationError,
        correlation_id: &str,
        session_id: Option<&str>,
    ) -> Self {
        warn!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            session_id = session_id.unwrap_or("unknown"),
            error = %error,
            "request failed"
        );
        Self::Interface(error.into_interface(correlation_id))
    }

    fn malformed(rejection: JsonRejection, correlation_id: String) -> Self {
        Self::Interface(InterfaceError::BadRequest {
            message: rejection.body_text(),
            correlation_id,
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::NotFound { message, correlation_id } => (
                StatusCode::NOT_FOUND,
                ApiErrorBody { error: "not_found", message, correlation_id },
            ),
            Self::Interface(error) => {
                let (status, code) = match &error {
                    InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
                    InterfaceError::ServiceUnavailable { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
                    }
                    InterfaceError::Internal { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                    }
                };
                // Bad requests echo the validation detail; other failures stay generic.
                let message = match &error {
                    InterfaceError::BadRequest { message, .. } => message.clone(),
                    _ => error.user_message().to_string(),
                };
                let correlation_id = error.correlation_id().to_string();
                (status, ApiErrorBody { error: code, message, correlation_id })
            }
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackAccepted {
    pub status: &'static str,
    pub trace_id: String,
}

pub fn router(runtime: ConversationRuntime) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/feedback", post(submit_feedback))
        .with_state(ApiState { runtime })
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

async fn chat(
    State(state): State<ApiState>,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation_id();
    let Json(request) =
        payload.map_err(|error| ApiError::malformed(error, correlation_id.clone()))?;
    let session_id = request.session_id.clone();

    let response = state.runtime.process_turn(request).await.map_err(|error| {
        ApiError::from_application(error, &correlation_id, session_id.as_deref())
    })?;

    info!(
        event_name = "api.chat.completed",
        correlation_id = %correlation_id,
        session_id = %response.session_id,
        trace_id = %response.trace_id,
        round = response.round,
        active_agent = %response.active_agent,
        "chat round served"
    );
    Ok(Json(response))
}

async fn list_sessions(
    State(state): State<ApiState>,
    Query(query): Query<SessionListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation_id();
    let limit = query.limit.unwrap_or(DEFAULT_SESSION_LIMIT).clamp(1, MAX_SESSION_LIMIT);

    let sessions = state
        .runtime
        .list_sessions(limit)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id, None))?;
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation_id();

    let session = state
        .runtime
        .session(&id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id, Some(&id)))?
        .ok_or_else(|| ApiError::NotFound {
            message: format!("session `{id}` does not exist"),
            correlation_id: correlation_id.clone(),
        })?;
    Ok(Json(session))
}

async fn submit_feedback(
    State(state): State<ApiState>,
    payload: Result<Json<Feedback>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation_id();
    let Json(feedback) =
        payload.map_err(|error| ApiError::malformed(error, correlation_id.clone()))?;
    let trace_id = feedback.trace_id.clone();

    state
        .runtime
        .submit_feedback(feedback)
        .map_err(|error| ApiError::from_application(error, &correlation_id, None))?;
    Ok((StatusCode::ACCEPTED, Json(FeedbackAccepted { status: "recorded", trace_id })))
}
