//! Authoritative job store with a per-job lock and append-only event log

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::{
    CancellationContext, Job, JobError, JobEvent, JobEventKind, JobId, JobOutcome, JobStatus,
    PartialResult, ProgressEvent,
};
use crate::error::{Error, Result};
use crate::providers::ArtifactRef;

/// Live delivery buffer per job; slower subscribers fall back to the stored log
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything the registry keeps for one job, guarded by one lock
struct JobSlot {
    job: Job,
    partials: Vec<PartialResult>,
    events: Vec<JobEvent>,
    next_seq: u64,
    events_tx: broadcast::Sender<JobEvent>,
    cancel_tx: watch::Sender<bool>,
}

impl JobSlot {
    fn new(job: Job) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            job,
            partials: Vec::new(),
            events: Vec::new(),
            next_seq: 1,
            events_tx,
            cancel_tx,
        }
    }

    fn append(&mut self, kind: JobEventKind) {
        let event = JobEvent {
            seq: self.next_seq,
            kind,
        };
        self.next_seq += 1;
        self.events.push(event.clone());
        // No receivers is fine: the log still holds the event
        let _ = self.events_tx.send(event);
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.job.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "cannot {} job {}: already {}",
                operation,
                self.job.id,
                self.job.status.as_str()
            )));
        }
        Ok(())
    }

    fn finish(&mut self, status: JobStatus) {
        let now = Utc::now();
        self.job.status = status;
        self.job.completed_at = Some(now);
        let outcome = JobOutcome {
            job_id: self.job.id,
            status,
            result: self.job.result.clone(),
            error: self.job.error.clone(),
            timestamp: now,
        };
        self.append(JobEventKind::Finished(outcome));
    }
}

/// Acknowledgement returned by [`JobRegistry::request_cancellation`]
#[derive(Debug, Clone, Serialize)]
pub struct CancelAck {
    pub job_id: JobId,
    pub cancel_requested: bool,
    /// The flag was already set before this call
    pub already_requested: bool,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

/// Job counts by status
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Execution slots; zero when read straight from the registry
    pub max_concurrent: usize,
}

/// In-process job registry
///
/// Writes to one job are serialized through that job's mutex; different
/// jobs never contend beyond the map shard lookup.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<Mutex<JobSlot>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, job_id: JobId) -> Result<Arc<Mutex<JobSlot>>> {
        self.jobs
            .get(&job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Register a new `Queued` job
    pub fn create(&self, owner_id: Option<String>) -> Job {
        let job = Job::new(owner_id);
        tracing::info!(job_id = %job.id, owner = ?job.owner_id, "Job created");
        self.jobs
            .insert(job.id, Arc::new(Mutex::new(JobSlot::new(job.clone()))));
        job
    }

    /// `Queued -> Running`
    ///
    /// A job whose cancellation was requested while queued is refused with
    /// [`Error::Cancelled`] so the caller can settle it as cancelled instead.
    pub fn mark_running(&self, job_id: JobId) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let mut slot = slot.lock();

        if slot.job.status != JobStatus::Queued {
            return Err(Error::invalid_state(format!(
                "job {} cannot start from {}",
                job_id,
                slot.job.status.as_str()
            )));
        }
        if slot.job.cancel_requested {
            return Err(Error::Cancelled(format!(
                "job {} was cancelled before it started",
                job_id
            )));
        }

        slot.job.status = JobStatus::Running;
        slot.job.started_at = Some(Utc::now());
        tracing::info!(job_id = %job_id, "Job running");
        Ok(slot.job.clone())
    }

    /// Append a progress event; `percent` never moves backwards
    pub fn record_progress(
        &self,
        job_id: JobId,
        stage: &str,
        percent: u8,
        message: impl Into<String>,
    ) -> Result<u8> {
        let slot = self.slot(job_id)?;
        let mut slot = slot.lock();
        slot.ensure_active("record progress for")?;

        let percent = percent.min(100).max(slot.job.progress_percent);
        slot.job.progress_percent = percent;
        slot.job.current_stage = Some(stage.to_string());

        let event = ProgressEvent {
            job_id,
            stage: stage.to_string(),
            percent,
            message: message.into(),
            timestamp: Utc::now(),
        };
        slot.append(JobEventKind::Progress(event));
        Ok(percent)
    }

    /// Upsert the output of one section
    pub fn record_partial_result(
        &self,
        job_id: JobId,
        section: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let slot = self.slot(job_id)?;
        let mut slot = slot.lock();
        slot.ensure_active("record partial result for")?;

        let partial = PartialResult {
            job_id,
            section: section.to_string(),
            data,
            timestamp: Utc::now(),
        };
        match slot.partials.iter().position(|p| p.section == section) {
            Some(index) => slot.partials[index] = partial.clone(),
            None => slot.partials.push(partial.clone()),
        }
        slot.append(JobEventKind::PartialResult(partial));
        tracing::debug!(job_id = %job_id, section, "Partial result recorded");
        Ok(())
    }

    /// `Running -> Completed`; repeated terminal calls return the stored job
    pub fn mark_completed(&self, job_id: JobId, result: ArtifactRef) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let mut slot = slot.lock();
        if slot.job.status.is_terminal() {
            return Ok(slot.job.clone());
        }
        if slot.job.status != JobStatus::Running {
            return Err(Error::invalid_state(format!(
                "job {} cannot complete from {}",
                job_id,
                slot.job.status.as_str()
            )));
        }

        slot.job.result = Some(result);
        slot.job.progress_percent = 100;
        slot.finish(JobStatus::Completed);
        tracing::info!(job_id = %job_id, "Job completed");
        Ok(slot.job.clone())
    }

    /// `Running -> Failed`; repeated terminal calls return the stored job
    pub fn mark_failed(&self, job_id: JobId, error: JobError) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let mut slot = slot.lock();
        if slot.job.status.is_terminal() {
            return Ok(slot.job.clone());
        }
        if slot.job.status != JobStatus::Running {
            return Err(Error::invalid_state(format!(
                "job {} cannot fail from {}",
                job_id,
                slot.job.status.as_str()
            )));
        }

        tracing::error!(
            job_id = %job_id,
            kind = ?error.kind,
            stage = ?error.stage,
            attempts = error.attempts,
            "Job failed: {}",
            error.message
        );
        slot.job.error = Some(error);
        slot.finish(JobStatus::Failed);
        Ok(slot.job.clone())
    }

    /// `Queued | Running -> Cancelled`; repeated terminal calls return the stored job
    pub fn mark_cancelled(&self, job_id: JobId) -> Result<Job> {
        let slot = self.slot(job_id)?;
        let mut slot = slot.lock();
        if slot.job.status.is_terminal() {
            return Ok(slot.job.clone());
        }

        let from = slot.job.status;
        slot.finish(JobStatus::Cancelled);
        tracing::info!(
            job_id = %job_id,
            from = from.as_str(),
            partials = slot.partials.len(),
            "Job cancelled"
        );
        Ok(slot.job.clone())
    }

    /// Set the cancellation flag; idempotent until the job is terminal
    pub fn request_cancellation(
        &self,
        job_id: JobId,
        requested_by: Option<&str>,
    ) -> Result<CancelAck> {
        let slot = self.slot(job_id)?;
        let mut slot = slot.lock();
        slot.ensure_active("cancel")?;

        let already_requested = slot.job.cancel_requested;
        if !already_requested {
            slot.job.cancel_requested = true;
            slot.job.cancel_requested_at = Some(Utc::now());
            slot.cancel_tx.send_replace(true);
            tracing::info!(job_id = %job_id, requested_by = ?requested_by, "Cancellation requested");
        }

        Ok(CancelAck {
            job_id,
            cancel_requested: true,
            already_requested,
            status: slot.job.status,
            requested_by: requested_by.map(str::to_string),
        })
    }

    /// Snapshot of a job, `None` if unknown
    pub fn get_status(&self, job_id: JobId) -> Option<Job> {
        self.slot(job_id).ok().map(|slot| slot.lock().job.clone())
    }

    /// Snapshot of a job, `NotFound` if unknown
    pub fn get(&self, job_id: JobId) -> Result<Job> {
        Ok(self.slot(job_id)?.lock().job.clone())
    }

    /// Result reference, present only for `Completed` jobs
    pub fn get_result(&self, job_id: JobId) -> Result<Option<ArtifactRef>> {
        let slot = self.slot(job_id)?;
        let slot = slot.lock();
        Ok(match slot.job.status {
            JobStatus::Completed => slot.job.result.clone(),
            _ => None,
        })
    }

    /// Partial results in the order their sections were first recorded
    pub fn partial_results(&self, job_id: JobId) -> Result<Vec<PartialResult>> {
        Ok(self.slot(job_id)?.lock().partials.clone())
    }

    /// Logged events with `seq > after`
    pub fn events_since(&self, job_id: JobId, after: u64) -> Result<Vec<JobEvent>> {
        let slot = self.slot(job_id)?;
        let slot = slot.lock();
        Ok(slot
            .events
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect())
    }

    /// Log snapshot plus a live receiver, taken atomically
    ///
    /// Every event is either in the snapshot or delivered to the receiver,
    /// never both and never neither (barring receiver lag).
    pub fn subscribe(
        &self,
        job_id: JobId,
    ) -> Result<(Vec<JobEvent>, broadcast::Receiver<JobEvent>)> {
        let slot = self.slot(job_id)?;
        let slot = slot.lock();
        Ok((slot.events.clone(), slot.events_tx.subscribe()))
    }

    /// Checkpoint handle for the runner
    pub fn cancellation(&self, job_id: JobId) -> Result<CancellationContext> {
        let slot = self.slot(job_id)?;
        let slot = slot.lock();
        Ok(CancellationContext::new(job_id, slot.cancel_tx.subscribe()))
    }

    /// Jobs newest first, optionally restricted to one owner
    pub fn list(&self, owner_id: Option<&str>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .map(|entry| entry.value().lock().job.clone())
            .filter(|job| owner_id.map_or(true, |owner| job.owner_id.as_deref() == Some(owner)))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job counts by status
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in self.jobs.iter() {
            stats.total += 1;
            match entry.value().lock().job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
