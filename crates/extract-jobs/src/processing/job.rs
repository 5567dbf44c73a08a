//! Job record, lifecycle status and the per-job event log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StageKind;
use crate::error::Error;
use crate::providers::ArtifactRef;

/// Opaque job identifier
pub type JobId = Uuid;

/// Job status
///
/// Transitions: `Queued -> Running -> {Completed, Failed, Cancelled}` and
/// `Queued -> Cancelled`. Terminal states never change again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Classification of a job failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Extractor rejected the work permanently
    Upstream,
    /// Transient extractor failures outlasted the retry budget
    RetriesExhausted,
    /// Input turned out to be unusable mid-pipeline
    Validation,
    /// Engine-side failure
    Internal,
}

/// Failure stored on a `Failed` job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKind>,
    /// Underlying cause was transient; resubmitting may succeed
    pub retryable: bool,
    pub attempts: u32,
}

impl JobError {
    /// Classify an error raised while running `stage`
    pub fn from_error(err: &Error, stage: Option<StageKind>, attempts: u32) -> Self {
        let kind = match err {
            Error::Upstream { retryable: true, .. } => JobErrorKind::RetriesExhausted,
            Error::Upstream { .. } | Error::Http(_) => JobErrorKind::Upstream,
            Error::Validation(_) | Error::Json(_) => JobErrorKind::Validation,
            _ => JobErrorKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
            stage,
            retryable: err.is_retryable(),
            attempts,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Internal,
            message: message.into(),
            stage: None,
            retryable: false,
            attempts: 0,
        }
    }
}

/// The authoritative job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Name of the stage in progress (or last reached)
    pub current_stage: Option<String>,
    /// 0-100, never decreasing
    pub progress_percent: u8,
    /// Once set, never reset
    pub cancel_requested: bool,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub result: Option<ArtifactRef>,
    pub error: Option<JobError>,
}

impl Job {
    pub fn new(owner_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            owner_id,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            current_stage: None,
            progress_percent: 0,
            cancel_requested: false,
            cancel_requested_at: None,
            result: None,
            error: None,
        }
    }
}

/// Cumulative progress report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub stage: String,
    pub percent: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Output for one completed section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartialResult {
    pub job_id: JobId,
    pub section: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Terminal outcome, appended exactly once per job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Option<ArtifactRef>,
    pub error: Option<JobError>,
    pub timestamp: DateTime<Utc>,
}

/// Body of a log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventKind {
    Progress(ProgressEvent),
    PartialResult(PartialResult),
    Finished(JobOutcome),
}

/// Append-only per-job log entry; `seq` is strictly increasing per job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub seq: u64,
    pub kind: JobEventKind,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, JobEventKind::Finished(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_error_classification() {
        let exhausted = JobError::from_error(
            &Error::transient("throttled"),
            Some(StageKind::Recognition),
            3,
        );
        assert_eq!(exhausted.kind, JobErrorKind::RetriesExhausted);
        assert_eq!(exhausted.attempts, 3);

        let rejected = JobError::from_error(&Error::terminal("malformed"), None, 1);
        assert_eq!(rejected.kind, JobErrorKind::Upstream);
        assert!(!rejected.retryable);

        let internal = JobError::from_error(&Error::internal("boom"), None, 0);
        assert_eq!(internal.kind, JobErrorKind::Internal);
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new(Some("owner".into()));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress_percent, 0);
        assert!(!job.cancel_requested);
        assert!(job.started_at.is_none());
    }
}
