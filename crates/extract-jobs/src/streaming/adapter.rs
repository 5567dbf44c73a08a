//! Ordered, gap-free subscriptions over the registry's event log

use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::StreamFrame;
use crate::error::{Error, Result};
use crate::processing::{Job, JobEvent, JobId, JobRegistry};

/// Log entries of one job, in append order, ending after the terminal entry
pub type EventStream = BoxStream<'static, JobEvent>;

/// Frames of one job, ending after `final_result`
pub type JobStream = BoxStream<'static, StreamFrame>;

struct Cursor {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    pending: VecDeque<JobEvent>,
    live: broadcast::Receiver<JobEvent>,
    last_seq: u64,
    finished: bool,
}

impl Cursor {
    async fn advance(mut self) -> Option<(JobEvent, Self)> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(event) = self.pending.pop_front() {
                // Backlog and live delivery may overlap after a lag recovery
                if event.seq <= self.last_seq {
                    continue;
                }
                self.last_seq = event.seq;
                self.finished = event.is_terminal();
                return Some((event, self));
            }

            match self.live.recv().await {
                Ok(event) => self.pending.push_back(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Subscriber for job {} lagged by {} events, replaying from the log",
                        self.job_id,
                        skipped
                    );
                    self.pending
                        .extend(self.registry.events_since(self.job_id, self.last_seq).ok()?);
                }
                Err(RecvError::Closed) => {
                    let rest = self.registry.events_since(self.job_id, self.last_seq).ok()?;
                    if rest.is_empty() {
                        return None;
                    }
                    self.pending.extend(rest);
                }
            }
        }
    }
}

/// Subscribe to a job's log: everything recorded so far, then live entries
///
/// Subscribing has no side effects and can be repeated any number of times;
/// a terminal job replays its whole log and ends.
pub fn subscribe_events(registry: &Arc<JobRegistry>, job_id: JobId) -> Result<EventStream> {
    let (backlog, live) = registry.subscribe(job_id)?;
    let cursor = Cursor {
        registry: Arc::clone(registry),
        job_id,
        pending: backlog.into(),
        live,
        last_seq: 0,
        finished: false,
    };
    Ok(stream::unfold(cursor, Cursor::advance).boxed())
}

/// Subscribe to a job's frames
pub fn subscribe(registry: &Arc<JobRegistry>, job_id: JobId) -> Result<JobStream> {
    Ok(subscribe_events(registry, job_id)?
        .map(|event| StreamFrame::from(&event))
        .boxed())
}

/// Wait until the job is terminal and return its final record
pub async fn wait_for_final(registry: &Arc<JobRegistry>, job_id: JobId) -> Result<Job> {
    let mut events = subscribe_events(registry, job_id)?;
    while let Some(event) = events.next().await {
        if event.is_terminal() {
            return registry.get(job_id);
        }
    }
    Err(Error::internal(format!(
        "event log for job {} ended without a terminal entry",
        job_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{JobError, JobStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_backlog_then_live_until_final() {
        let registry = Arc::new(JobRegistry::new());
        let job = registry.create(None);
        registry.mark_running(job.id).unwrap();
        registry.record_progress(job.id, "acquisition", 10, "acquired").unwrap();

        let stream = subscribe(&registry, job.id).unwrap();

        let writer = Arc::clone(&registry);
        let id = job.id;
        tokio::spawn(async move {
            writer.record_partial_result(id, "parties", json!({"lender": "Acme"})).unwrap();
            writer.mark_failed(id, JobError::internal("boom")).unwrap();
        });

        let frames: Vec<StreamFrame> = stream.collect().await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].event_name(), "progress");
        assert_eq!(frames[1].event_name(), "partial_result");
        assert!(matches!(
            frames[2],
            StreamFrame::FinalResult { status: JobStatus::Failed, .. }
        ));
    }

    #[tokio::test]
    async fn test_resubscribe_after_terminal_replays() {
        let registry = Arc::new(JobRegistry::new());
        let job = registry.create(None);
        registry.request_cancellation(job.id, None).unwrap();
        registry.mark_cancelled(job.id).unwrap();

        for _ in 0..2 {
            let frames: Vec<StreamFrame> = subscribe(&registry, job.id).unwrap().collect().await;
            assert_eq!(frames.len(), 1);
            assert!(frames[0].is_final());
        }

        let job = wait_for_final(&registry, job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_recovers_from_log() {
        let registry = Arc::new(JobRegistry::new());
        let job = registry.create(None);
        registry.mark_running(job.id).unwrap();

        let stream = subscribe_events(&registry, job.id).unwrap();
        // Overflow the live channel before the subscriber reads anything
        for percent in 0..600u32 {
            registry
                .record_progress(job.id, "extraction", (percent / 6) as u8, "working")
                .unwrap();
        }
        registry.mark_failed(job.id, JobError::internal("stop")).unwrap();

        let seqs: Vec<u64> = stream.map(|e| e.seq).collect().await;
        assert_eq!(seqs.len(), 601);
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_unknown_job() {
        let registry = Arc::new(JobRegistry::new());
        assert!(matches!(
            subscribe(&registry, uuid::Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }
}
