//! HTTP request handlers for the task API.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::tasks::{CancelOutcome, ErrorCode, NoteInput, TaskError, TaskStatus};

use super::AppState;

/// SSE heartbeat interval.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Caller identity from the `x-user-id` header. Authentication lives in
/// front of this service; absent or malformed ids map to the nil UUID.
fn owner_from(headers: &HeaderMap) -> Uuid {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or(Uuid::nil())
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    json!({ "error": code, "message": message })
}

fn submit_error(err: TaskError) -> Response {
    let status = match err.code {
        ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error_body(err.code.as_str(), &err.message))).into_response()
}

fn created(task_id: Uuid) -> Response {
    (StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))).into_response()
}

/// Query parameters for image submission (the body is the raw image).
#[derive(Debug, Deserialize)]
pub struct ImageParams {
    pub title: Option<String>,
    #[serde(default)]
    pub public: bool,
}

/// POST /api/tasks/smart-note/image
pub async fn submit_smart_note_image(
    State(state): State<AppState>,
    Query(params): Query<ImageParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let owner = owner_from(&headers);
    match state.orchestrator.submit_smart_note_image(
        owner,
        body.to_vec(),
        params.title,
        params.public,
    ) {
        Ok(task_id) => created(task_id),
        Err(err) => submit_error(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct TextSubmission {
    pub text: String,
    pub title: Option<String>,
    #[serde(default)]
    pub public: bool,
}

/// POST /api/tasks/smart-note/text
pub async fn submit_smart_note_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<TextSubmission>,
) -> Response {
    let owner = owner_from(&headers);
    match state.orchestrator.submit_smart_note_text(
        owner,
        submission.text,
        submission.title,
        submission.public,
    ) {
        Ok(task_id) => created(task_id),
        Err(err) => submit_error(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct MultiSubmission {
    pub notes: Vec<NoteInput>,
    pub min_notes_threshold: Option<usize>,
}

/// POST /api/tasks/multi-summary
pub async fn submit_multi_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<MultiSubmission>,
) -> Response {
    let owner = owner_from(&headers);
    match state.orchestrator.submit_multi_summary(
        owner,
        submission.notes,
        submission.min_notes_threshold,
    ) {
        Ok(task_id) => created(task_id),
        Err(err) => submit_error(err),
    }
}

/// Filter parameters for task listing.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<TaskStatus>,
}

/// GET /api/tasks — snapshots of the caller's tasks, newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Response {
    let owner = owner_from(&headers);
    Json(state.registry.list(owner, params.status)).into_response()
}

/// GET /api/tasks/{id} — snapshot without input payload; oversized
/// intermediates are elided.
pub async fn get_task(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Response {
    match state.registry.snapshot(task_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(error_body("not_found", "no such task")),
        )
            .into_response(),
    }
}

/// GET /api/tasks/{id}/result — terminal result; 409 while non-terminal.
pub async fn get_task_result(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Response {
    let Some(entry) = state.registry.get(task_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(error_body("not_found", "no such task")),
        )
            .into_response();
    };
    let snapshot = entry.snapshot();
    if !snapshot.status.is_terminal() {
        return (
            StatusCode::CONFLICT,
            Json(error_body("not_terminal", "task is still in progress")),
        )
            .into_response();
    }
    match entry.result() {
        Some(result) => Json(result).into_response(),
        None => {
            let error = snapshot.error.unwrap_or_else(|| {
                if snapshot.status == TaskStatus::Cancelled {
                    TaskError::cancelled()
                } else {
                    TaskError::internal("task ended without result")
                }
            });
            Json(json!({
                "status": snapshot.status,
                "error": error,
            }))
            .into_response()
        }
    }
}

/// GET /api/tasks/{id}/stream — server-sent progress events until terminal.
pub async fn stream_task(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Response {
    let Some(entry) = state.registry.get(task_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(error_body("not_found", "no such task")),
        )
            .into_response();
    };

    let subscription = entry.subscribe();
    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","error":{"code":"internal","message":"serialization failed"}}"#.to_string());
        Some((Ok::<Event, Infallible>(Event::default().data(data)), subscription))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

/// DELETE /api/tasks/{id} — request cooperative cancellation.
pub async fn cancel_task(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Response {
    match state.registry.cancel(task_id) {
        CancelOutcome::Accepted => StatusCode::NO_CONTENT.into_response(),
        CancelOutcome::AlreadyTerminal => (
            StatusCode::CONFLICT,
            Json(error_body("already_terminal", "task already finished")),
        )
            .into_response(),
        CancelOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(error_body("not_found", "no such task")),
        )
            .into_response(),
    }
}
