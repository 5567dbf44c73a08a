//! API routes for the job server

pub mod jobs;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_document_bytes: usize) -> Router<AppState> {
    // Base64 inflates binary payloads by a third; leave room for the JSON envelope
    let body_limit = max_document_bytes / 3 * 4 + 64 * 1024;

    Router::new()
        .route(
            "/jobs",
            post(jobs::submit_job)
                .layer(DefaultBodyLimit::max(body_limit))
                .get(jobs::list_jobs),
        )
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/events", get(jobs::job_events))
        .route("/jobs/:id/partials", get(jobs::job_partials))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config();
    Json(serde_json::json!({
        "name": "extract-jobs",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document extraction job engine with progress streaming",
        "extractor": state.extractor_name(),
        "sections": config.pipeline.sections,
        "stages": config.pipeline.stages,
        "admission_windows": config.admission.windows,
        "endpoints": {
            "POST /api/jobs": "Submit a document (mode: poll | stream | sync)",
            "GET /api/jobs": "List jobs and queue stats",
            "GET /api/jobs/:id": "Job status (?include_result=true for the artifact)",
            "GET /api/jobs/:id/events": "Server-sent event stream of job frames",
            "GET /api/jobs/:id/partials": "Section results recorded so far",
            "POST /api/jobs/:id/cancel": "Request cooperative cancellation"
        }
    }))
}
