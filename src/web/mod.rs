//! HTTP adapter
//!
//! Exposes the dispatcher over JSON. Every command goes through
//! `POST /api/commands`; the read-only listings have their own GET routes.

use crate::core::{ParticipantId, RunError};
use crate::dispatch::{DispatchError, Dispatcher, Invocation, Reply};
use crate::leaderboard::LeaderboardReport;
use crate::registry::RunView;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Run(RunError),
    Internal(String),
}

impl From<RunError> for WebError {
    fn from(err: RunError) -> Self {
        WebError::Run(err)
    }
}

impl From<DispatchError> for WebError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Run(err) => WebError::Run(err),
            DispatchError::History(err) => WebError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Run(err) => {
                let status = match err {
                    RunError::NotFound | RunError::NotPresent => StatusCode::NOT_FOUND,
                    RunError::HostAlreadyActive | RunError::AlreadyInARun | RunError::Full => {
                        StatusCode::CONFLICT
                    }
                    RunError::NotHost => StatusCode::FORBIDDEN,
                    RunError::SelfTargetInvalid => StatusCode::UNPROCESSABLE_ENTITY,
                    RunError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.to_string(), err.code().to_string())
            }
            WebError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    msg,
                    "internal_error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

// ============================================================================
// Router
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/api/commands", post(handle_command))
        .route("/api/runs", get(list_runs))
        .route("/api/leaderboard", get(leaderboard))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { dispatcher })
}

async fn handle_command(
    State(state): State<AppState>,
    Json(invocation): Json<Invocation>,
) -> Result<Json<Reply>> {
    Ok(Json(state.dispatcher.handle(invocation).await?))
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    viewer: Option<u64>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Json<Vec<RunView>> {
    let viewer = query.viewer.map(ParticipantId);
    Json(state.dispatcher.registry().view_for(viewer).await)
}

async fn leaderboard(State(state): State<AppState>) -> Result<Json<LeaderboardReport>> {
    let report = state
        .dispatcher
        .leaderboard()
        .report()
        .await
        .map_err(|e| WebError::Internal(e.to_string()))?;
    Ok(Json(report))
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_run_errors_map_to_statuses() {
        let cases = [
            (RunError::NotFound, StatusCode::NOT_FOUND),
            (RunError::NotPresent, StatusCode::NOT_FOUND),
            (RunError::Full, StatusCode::CONFLICT),
            (RunError::HostAlreadyActive, StatusCode::CONFLICT),
            (RunError::NotHost, StatusCode::FORBIDDEN),
            (RunError::SelfTargetInvalid, StatusCode::UNPROCESSABLE_ENTITY),
            (RunError::Closed, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            let response = WebError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_body_has_code() {
        let response = WebError::from(RunError::Full).into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, "full");
        assert_eq!(body.error, "Run is full");
    }
}
