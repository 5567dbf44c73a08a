//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use extract_jobs::config::ExtractConfig;
use extract_jobs::processing::{
    Job, JobDispatcher, JobId, JobQueue, JobRegistry, JobRunner, StageKind,
};
use extract_jobs::providers::{
    ArtifactStore, Extractor, InMemoryArtifactStore, StageOutput, StageRequest,
};
use extract_jobs::{Error, Result};

pub const AGREEMENT: &str = "LOAN AGREEMENT made by and between Acme Bank and Jane Doe. \
    The interest rate is 5%. Repayment schedule: 12 monthly installments. \
    IN WITNESS WHEREOF the parties have signed.";

/// Engine config with millisecond backoff so retry tests stay fast
pub fn test_config() -> ExtractConfig {
    let mut config = ExtractConfig::default();
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.pipeline.max_concurrent_jobs = 2;
    config.admission.sweep_interval_secs = 3600;
    config
}

fn echo(request: &StageRequest) -> StageOutput {
    StageOutput::data(json!({
        "section": request.section,
        "offset": request.section_offset,
    }))
}

/// Replies from a script in call order, then echoes the section
#[derive(Default)]
pub struct ScriptedExtractor {
    replies: Mutex<VecDeque<Result<StageOutput>>>,
    calls: Mutex<Vec<StageRequest>>,
}

impl ScriptedExtractor {
    pub fn new(replies: Vec<Result<StageOutput>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<StageRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn run_stage(&self, request: &StageRequest) -> Result<StageOutput> {
        self.calls.lock().push(request.clone());
        match self.replies.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(echo(request)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Blocks every call until the test hands out a permit
pub struct GatedExtractor {
    permits: Semaphore,
    started: AtomicUsize,
}

impl GatedExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(0),
            started: AtomicUsize::new(0),
        })
    }

    /// Let `n` more calls finish
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    pub fn open(&self) {
        self.permits.add_permits(10_000);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls have reached the extractor
    pub async fn wait_started(&self, n: usize) {
        for _ in 0..500 {
            if self.started() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("extractor saw {} calls, expected {}", self.started(), n);
    }
}

#[async_trait]
impl Extractor for GatedExtractor {
    async fn run_stage(&self, request: &StageRequest) -> Result<StageOutput> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::internal("gate closed"))?;
        permit.forget();
        Ok(echo(request))
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Registry, queue and a running dispatcher wired like the server does
pub struct Engine {
    pub registry: Arc<JobRegistry>,
    pub queue: JobQueue,
    pub artifacts: Arc<InMemoryArtifactStore>,
}

pub fn engine(extractor: Arc<dyn Extractor>, config: &ExtractConfig) -> Engine {
    let registry = Arc::new(JobRegistry::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let (queue, receiver) = JobQueue::new(
        Arc::clone(&registry),
        config.pipeline.queue_capacity,
        config.pipeline.max_concurrent_jobs,
    );
    let store: Arc<dyn ArtifactStore> = artifacts.clone();
    let runner = Arc::new(JobRunner::new(Arc::clone(&registry), extractor, store, config));
    JobDispatcher::new(runner, config.pipeline.max_concurrent_jobs).spawn(receiver);

    Engine {
        registry,
        queue,
        artifacts,
    }
}

/// Poll until the job is terminal
pub async fn wait_terminal(registry: &JobRegistry, job_id: JobId) -> Job {
    for _ in 0..500 {
        let job = registry.get(job_id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

pub fn extraction_calls(calls: &[StageRequest]) -> usize {
    calls
        .iter()
        .filter(|c| c.stage == StageKind::Extraction)
        .count()
}
