//! Job submission, status, streaming and cancellation endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::{
    CancelAck, DocumentPayload, Job, JobError, JobOptions, JobStatus, PartialResult, QueueStats,
};
use crate::providers::ArtifactRef;
use crate::server::identity::{caller_identity, ANONYMOUS};
use crate::server::state::AppState;
use crate::streaming::{self, StreamFrame};

/// How the caller wants to follow the job
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Return the job id immediately and poll for status
    #[default]
    Poll,
    /// Keep the connection open as a server-sent event stream
    Stream,
    /// Wait for the terminal state and return it
    Sync,
}

/// Options accepted alongside the document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub mode: SubmitMode,
    /// Subset of the configured sections to extract
    #[serde(default)]
    pub sections: Option<Vec<String>>,
}

/// Request body of POST /api/jobs
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub document: DocumentPayload,
    #[serde(default)]
    pub options: SubmitOptions,
}

/// Response for poll-mode submissions
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub mode: SubmitMode,
    pub status_url: String,
    pub events_url: String,
}

/// Final artifact attached to a status response
#[derive(Debug, Serialize)]
pub struct JobResultView {
    pub artifact: ArtifactRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Job status response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub current_stage: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultView>,
}

impl JobStatusResponse {
    fn from_job(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress_percent: job.progress_percent,
            current_stage: job.current_stage,
            owner_id: job.owner_id,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            cancel_requested: job.cancel_requested,
            error: job.error,
            result: None,
        }
    }
}

/// Query parameters of GET /api/jobs/:id
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub include_result: bool,
}

/// Query parameters of GET /api/jobs
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub owner: Option<String>,
}

/// Job summary for listing
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub current_stage: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: String,
}

/// Job list response
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub stats: QueueStats,
}

/// Partial results response
#[derive(Debug, Serialize)]
pub struct PartialsResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub partials: Vec<PartialResult>,
}

/// Job ids are opaque to callers; anything that is not one of ours is unknown
fn parse_job_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::NotFound(format!("job {}", raw)))
}

/// A requested section subset must be non-empty, known and free of repeats
fn check_sections(requested: &[String], configured: &[String]) -> Result<()> {
    if requested.is_empty() {
        return Err(Error::validation("sections must not be empty"));
    }
    for (i, section) in requested.iter().enumerate() {
        if !configured.contains(section) {
            return Err(Error::validation(format!("unknown section '{}'", section)));
        }
        if requested[..i].contains(section) {
            return Err(Error::validation(format!("duplicate section '{}'", section)));
        }
    }
    Ok(())
}

/// POST /api/jobs - Submit a document for extraction
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<Response> {
    let config = state.config();

    let identity = caller_identity(&headers, &config.server.identity_header);
    if identity.is_none() && config.server.require_identity {
        return Err(Error::Unauthorized(format!(
            "missing '{}' header or bearer token",
            config.server.identity_header
        )));
    }

    let Json(request) = payload.map_err(|e| Error::validation(e.body_text()))?;
    let document = request
        .document
        .into_document(config.server.max_document_bytes)?;
    if let Some(sections) = &request.options.sections {
        check_sections(sections, &config.pipeline.sections)?;
    }

    let admission_key = identity.as_deref().unwrap_or(ANONYMOUS);
    state
        .gate()
        .check(admission_key, &config.admission.windows)
        .into_result()?;

    let mode = request.options.mode;
    let options = JobOptions {
        sections: request.options.sections,
    };
    let job = state.queue().submit(identity, document, options).await?;

    match mode {
        SubmitMode::Poll => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitJobResponse {
                job_id: job.id,
                status: job.status,
                mode,
                status_url: format!("/api/jobs/{}", job.id),
                events_url: format!("/api/jobs/{}/events", job.id),
            }),
        )
            .into_response()),
        SubmitMode::Stream => Ok(event_stream(&state, job.id)?.into_response()),
        SubmitMode::Sync => {
            let job = streaming::wait_for_final(state.registry(), job.id).await?;
            Ok(Json(status_view(&state, job, true).await?).into_response())
        }
    }
}

/// GET /api/jobs/:id - Get job status
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    query: std::result::Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let Query(query) = query.map_err(|e| Error::validation(e.body_text()))?;
    let job = state.registry().get(job_id)?;
    Ok(Json(status_view(&state, job, query.include_result).await?))
}

/// GET /api/jobs - List jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<JobListResponse>> {
    let Query(query) = query.map_err(|e| Error::validation(e.body_text()))?;
    let jobs = state
        .registry()
        .list(query.owner.as_deref())
        .into_iter()
        .map(|job| JobSummary {
            job_id: job.id,
            status: job.status,
            progress_percent: job.progress_percent,
            current_stage: job.current_stage,
            owner_id: job.owner_id,
            created_at: job.created_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(JobListResponse {
        jobs,
        stats: state.queue().stats(),
    }))
}

/// GET /api/jobs/:id/events - Stream job frames
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response> {
    let job_id = parse_job_id(&job_id)?;
    Ok(event_stream(&state, job_id)?.into_response())
}

/// GET /api/jobs/:id/partials - Section results recorded so far
pub async fn job_partials(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<PartialsResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.registry().get(job_id)?;
    let partials = state.registry().partial_results(job_id)?;
    Ok(Json(PartialsResponse {
        job_id,
        status: job.status,
        partials,
    }))
}

/// POST /api/jobs/:id/cancel - Request cancellation
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<CancelAck>> {
    let job_id = parse_job_id(&job_id)?;
    let requester = caller_identity(&headers, &state.config().server.identity_header);
    let ack = state
        .registry()
        .request_cancellation(job_id, requester.as_deref())?;
    Ok(Json(ack))
}

/// SSE projection of a job's frames; the event id is the log sequence number
fn event_stream(
    state: &AppState,
    job_id: Uuid,
) -> Result<Sse<impl futures_util::Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let events = streaming::subscribe_events(state.registry(), job_id)?.map(|event| {
        let frame = StreamFrame::from(&event);
        Event::default()
            .id(event.seq.to_string())
            .event(frame.event_name())
            .json_data(&frame)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn status_view(state: &AppState, job: Job, include_result: bool) -> Result<JobStatusResponse> {
    let artifact = match (&job.result, job.status) {
        (Some(artifact), JobStatus::Completed) if include_result => Some(artifact.clone()),
        _ => None,
    };

    let mut view = JobStatusResponse::from_job(job);
    if let Some(artifact) = artifact {
        let data = state.artifacts().get(&artifact).await?;
        view.result = Some(JobResultView { artifact, data });
    }
    Ok(view)
}
