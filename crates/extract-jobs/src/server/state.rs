//! Application state for the job server

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::admission::AdmissionGate;
use crate::config::ExtractConfig;
use crate::error::Result;
use crate::processing::{JobDispatcher, JobQueue, JobRegistry, JobRunner};
use crate::providers::{ArtifactStore, Extractor, HttpExtractor, InMemoryArtifactStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: ExtractConfig,
    /// Authoritative job store
    registry: Arc<JobRegistry>,
    /// Submission queue feeding the dispatcher
    queue: Arc<JobQueue>,
    /// Per-caller admission control
    gate: Arc<AdmissionGate>,
    /// Final artifacts
    artifacts: Arc<dyn ArtifactStore>,
    /// Extractor name for diagnostics
    extractor_name: String,
    /// Background dispatcher task
    dispatcher: JoinHandle<()>,
}

impl AppState {
    /// Create state with the HTTP extractor and an in-memory artifact store
    pub fn new(config: ExtractConfig) -> Result<Self> {
        let extractor = Arc::new(HttpExtractor::new(&config.extractor)?);
        tracing::info!("HTTP extractor configured at {}", config.extractor.base_url);
        Self::with_providers(config, extractor, Arc::new(InMemoryArtifactStore::new()))
    }

    /// Create state with explicit collaborators and start the background tasks
    pub fn with_providers(
        config: ExtractConfig,
        extractor: Arc<dyn Extractor>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(JobRegistry::new());
        let max_concurrent = config.pipeline.max_concurrent_jobs;
        let (queue, receiver) = JobQueue::new(
            Arc::clone(&registry),
            config.pipeline.queue_capacity,
            max_concurrent,
        );
        let extractor_name = extractor.name().to_string();

        let runner = Arc::new(JobRunner::new(
            Arc::clone(&registry),
            extractor,
            Arc::clone(&artifacts),
            &config,
        ));
        let dispatcher = JobDispatcher::new(runner, max_concurrent).spawn(receiver);
        tracing::info!("Job queue initialized with {} execution slots", max_concurrent);

        let gate = Arc::new(AdmissionGate::new());
        // Ends on its own once the gate is dropped
        gate.spawn_sweeper(Duration::from_secs(
            config.admission.sweep_interval_secs.max(1),
        ));
        tracing::info!(
            "Admission gate initialized with {} windows",
            config.admission.windows.len()
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                queue: Arc::new(queue),
                gate,
                artifacts,
                extractor_name,
                dispatcher,
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &ExtractConfig {
        &self.inner.config
    }

    /// Get job registry
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// Get job queue
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    /// Get admission gate
    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.inner.gate
    }

    /// Get artifact store
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.inner.artifacts
    }

    pub fn extractor_name(&self) -> &str {
        &self.inner.extractor_name
    }

    /// Ready while the dispatcher is still accepting work
    pub fn is_ready(&self) -> bool {
        !self.inner.dispatcher.is_finished()
    }
}
