//! Cooperative cancellation handle passed through the pipeline

use tokio::sync::watch;

use super::JobId;

/// Read side of a job's `cancel_requested` flag
///
/// The flag is written only by [`JobRegistry::request_cancellation`](super::JobRegistry::request_cancellation)
/// under the job's lock. The runner consults it at checkpoints; nothing here
/// aborts work already in flight.
#[derive(Debug, Clone)]
pub struct CancellationContext {
    job_id: JobId,
    flag: watch::Receiver<bool>,
}

impl CancellationContext {
    pub(crate) fn new(job_id: JobId, flag: watch::Receiver<bool>) -> Self {
        Self { job_id, flag }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Checkpoint read
    pub fn is_requested(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolve once cancellation has been requested
    pub async fn requested(&mut self) {
        if self.flag.wait_for(|requested| *requested).await.is_err() {
            // Registry dropped the job; nothing will ever cancel it
            std::future::pending::<()>().await;
        }
    }
}
