//! Job submission queue and the dispatcher that executes queued jobs

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use super::{Document, Job, JobId, JobRegistry, JobRunner, QueueStats};
use crate::error::{Error, Result};

/// Per-job options supplied at submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Sections to extract; `None` means every configured section
    #[serde(default)]
    pub sections: Option<Vec<String>>,
}

/// A job handed to the dispatcher
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub document: Document,
    pub options: JobOptions,
}

/// Front door for new jobs
pub struct JobQueue {
    registry: Arc<JobRegistry>,
    sender: mpsc::Sender<JobRequest>,
    max_concurrent: usize,
}

impl JobQueue {
    /// Create a new job queue
    pub fn new(
        registry: Arc<JobRegistry>,
        capacity: usize,
        max_concurrent: usize,
    ) -> (Self, mpsc::Receiver<JobRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                registry,
                sender,
                max_concurrent,
            },
            receiver,
        )
    }

    /// Create a `Queued` job and hand it to the dispatcher
    ///
    /// A queue slot is reserved first so a closed dispatcher never leaves a
    /// job stuck in `Queued`.
    pub async fn submit(
        &self,
        owner_id: Option<String>,
        document: Document,
        options: JobOptions,
    ) -> Result<Job> {
        let slot = self
            .sender
            .reserve()
            .await
            .map_err(|_| Error::internal("job dispatcher is not running"))?;

        let job = self.registry.create(owner_id);
        tracing::info!(
            "Queued job {} for {} ({} bytes)",
            job.id,
            document.filename,
            document.size_bytes()
        );
        slot.send(JobRequest {
            job_id: job.id,
            document,
            options,
        });
        Ok(job)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Registry counts plus the execution slot count
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            max_concurrent: self.max_concurrent,
            ..self.registry.stats()
        }
    }
}

/// Receives queued jobs and runs them, at most `max_concurrent` at a time
pub struct JobDispatcher {
    runner: Arc<JobRunner>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl JobDispatcher {
    pub fn new(runner: Arc<JobRunner>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            runner,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Start dispatching on a background task
    pub fn spawn(self, receiver: mpsc::Receiver<JobRequest>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Dispatch until every queue handle is dropped
    pub async fn run(self, mut receiver: mpsc::Receiver<JobRequest>) {
        tracing::info!(
            "Job dispatcher started: {} concurrent jobs",
            self.max_concurrent
        );

        while let Some(request) = receiver.recv().await {
            self.dispatch(request);
        }

        tracing::info!("Job dispatcher stopped");
    }

    fn dispatch(&self, request: JobRequest) {
        let runner = Arc::clone(&self.runner);
        let semaphore = Arc::clone(&self.semaphore);

        tokio::spawn(async move {
            let job_id = request.job_id;
            let mut cancel = match runner.registry().cancellation(job_id) {
                Ok(cancel) => cancel,
                Err(e) => {
                    tracing::error!("Dropping job {}: {}", job_id, e);
                    return;
                }
            };

            // Jobs waiting for a slot stay Queued and can be cancelled directly
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = cancel.requested() => {
                    if let Err(e) = runner.cancel_queued(job_id) {
                        tracing::error!("Failed to cancel queued job {}: {}", job_id, e);
                    }
                    return;
                }
            };
            let _permit = match permit {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::error!("Execution slots closed, job {} left queued", job_id);
                    return;
                }
            };

            if let Err(e) = runner.run(request).await {
                tracing::error!("Job {} could not be run: {}", job_id, e);
            }
        });
    }
}
