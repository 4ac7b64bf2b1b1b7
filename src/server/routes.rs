//! Router configuration for the task API.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::MAX_IMAGE_BYTES;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Submission
        .route(
            "/api/tasks/smart-note/image",
            post(handlers::submit_smart_note_image),
        )
        .route(
            "/api/tasks/smart-note/text",
            post(handlers::submit_smart_note_text),
        )
        .route(
            "/api/tasks/multi-summary",
            post(handlers::submit_multi_summary),
        )
        // Task queries and cancellation
        .route("/api/tasks", get(handlers::list_tasks))
        .route(
            "/api/tasks/:task_id",
            get(handlers::get_task).delete(handlers::cancel_task),
        )
        .route("/api/tasks/:task_id/result", get(handlers::get_task_result))
        .route("/api/tasks/:task_id/stream", get(handlers::stream_task))
        // Image uploads may exceed the default body limit
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 1024))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
