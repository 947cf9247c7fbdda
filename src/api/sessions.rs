//! Session control endpoints
//!
//! Every manager call may block (stopping waits for the worker), so each one
//! runs on the blocking pool.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::session::{SessionLifecycleManager, SessionStatus};

/// Build session router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/{user_id}", get(session_status))
        .route("/{user_id}/start", post(start_session))
        .route("/{user_id}/stop", post(stop_session))
        .route("/{user_id}/pause", post(pause_listening))
        .route("/{user_id}/resume", post(resume_listening))
        .route("/{user_id}/listen", post(trigger_listening))
        .with_state(state)
}

/// Query for `POST /{user_id}/start`
#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    /// Record immediately instead of waiting for the wake trigger
    #[serde(default)]
    pub listen_now: bool,
}

/// Outcome of a session command
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub user_id: String,
    pub ok: bool,
}

/// Running sessions
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<String>,
}

/// Session API errors
#[derive(Debug)]
pub enum SessionError {
    NotFound(String),
    AlreadyRunning(String),
    Internal(String),
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotFound(user_id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("no session or user for {user_id}"),
            ),
            Self::AlreadyRunning(user_id) => (
                StatusCode::CONFLICT,
                "already_running",
                format!("session for {user_id} is already running"),
            ),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

async fn blocking<T, F>(state: &ApiState, call: F) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce(&SessionLifecycleManager) -> T + Send + 'static,
{
    let manager = Arc::clone(&state.sessions);
    tokio::task::spawn_blocking(move || call(&manager))
        .await
        .map_err(|e| SessionError::Internal(e.to_string()))
}

async fn list_sessions(State(state): State<Arc<ApiState>>) -> Result<Json<SessionListResponse>, SessionError> {
    let sessions = blocking(&state, SessionLifecycleManager::running_sessions).await?;
    Ok(Json(SessionListResponse { sessions }))
}

async fn session_status(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionStatus>, SessionError> {
    let id = user_id.clone();
    blocking(&state, move |manager| manager.status(&id))
        .await?
        .map(Json)
        .ok_or(SessionError::NotFound(user_id))
}

async fn start_session(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<(StatusCode, Json<ActionResponse>), SessionError> {
    let id = user_id.clone();
    let (started, running) = blocking(&state, move |manager| {
        let started = manager.start_session(&id, params.listen_now);
        (started, manager.is_running(&id))
    })
    .await?;

    match (started, running) {
        (true, _) => Ok((StatusCode::CREATED, Json(ActionResponse { user_id, ok: true }))),
        (false, true) => Err(SessionError::AlreadyRunning(user_id)),
        (false, false) => Err(SessionError::NotFound(user_id)),
    }
}

async fn stop_session(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<ActionResponse>), SessionError> {
    let id = user_id.clone();
    let (known, stopped) = blocking(&state, move |manager| {
        let known = manager.status(&id).is_some();
        (known, known && manager.stop_session(&id))
    })
    .await?;

    if !known {
        return Err(SessionError::NotFound(user_id));
    }

    // A worker abandoned after the stop timeout is reported as accepted, not done
    let status = if stopped { StatusCode::OK } else { StatusCode::ACCEPTED };
    Ok((status, Json(ActionResponse { user_id, ok: stopped })))
}

async fn pause_listening(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ActionResponse>, SessionError> {
    steer(&state, user_id, SessionLifecycleManager::pause_listening).await
}

async fn resume_listening(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ActionResponse>, SessionError> {
    steer(&state, user_id, SessionLifecycleManager::resume_listening).await
}

async fn trigger_listening(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ActionResponse>, SessionError> {
    steer(&state, user_id, SessionLifecycleManager::trigger_listening).await
}

async fn steer(
    state: &ApiState,
    user_id: String,
    action: fn(&SessionLifecycleManager, &str) -> bool,
) -> Result<Json<ActionResponse>, SessionError> {
    let id = user_id.clone();
    if blocking(state, move |manager| action(manager, &id)).await? {
        Ok(Json(ActionResponse { user_id, ok: true }))
    } else {
        Err(SessionError::NotFound(user_id))
    }
}
