//! Drives one job through the weighted stage pipeline

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::{
    CancellationContext, DocumentContent, Job, JobError, JobErrorKind, JobId, JobRegistry,
    JobRequest, StageKind, StagePlan,
};
use crate::config::{ExtractConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::providers::{ArtifactRef, ArtifactStore, Extractor, StageOutput, StageRequest};
use crate::sizing::{ContentLocator, DocumentSizer, DocumentSizingResult, SizingPolicy};

/// Why the pipeline stopped early
enum Interrupt {
    Cancelled,
    Failed(JobError),
}

impl Interrupt {
    fn from_error(err: Error, stage: StageKind) -> Self {
        Interrupt::Failed(JobError::from_error(&err, Some(stage), 0))
    }
}

type StageResult<T> = std::result::Result<T, Interrupt>;

/// Text and section outputs carried between stages of one job
#[derive(Default)]
struct PipelineState {
    text: Option<String>,
    sections: Map<String, Value>,
    sizing: Option<DocumentSizingResult>,
    artifact: Option<ArtifactRef>,
}

/// Executes jobs against the extractor and records everything in the registry
///
/// Stages run strictly in order. Cancellation is checked before every stage,
/// before every section and before every retry; an extractor call already in
/// flight is never aborted.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    extractor: Arc<dyn Extractor>,
    artifacts: Arc<dyn ArtifactStore>,
    sizer: Arc<dyn SizingPolicy>,
    locator: ContentLocator,
    plan: StagePlan,
    sections: Vec<String>,
    budget: usize,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        extractor: Arc<dyn Extractor>,
        artifacts: Arc<dyn ArtifactStore>,
        config: &ExtractConfig,
    ) -> Self {
        Self {
            registry,
            extractor,
            artifacts,
            sizer: Arc::new(DocumentSizer::from_config(&config.sizing)),
            locator: ContentLocator::with_defaults(),
            plan: StagePlan::from_config(&config.pipeline),
            sections: config.pipeline.sections.clone(),
            budget: config.sizing.budget_chars,
            retry: config.retry.clone(),
            call_timeout: Duration::from_secs(config.extractor.timeout_secs),
        }
    }

    /// Replace the sizing policy
    pub fn with_sizer(mut self, sizer: Arc<dyn SizingPolicy>) -> Self {
        self.sizer = sizer;
        self
    }

    /// Replace the section locator
    pub fn with_locator(mut self, locator: ContentLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Bound each extractor call
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Settle a job that was cancelled before it got an execution slot
    pub fn cancel_queued(&self, job_id: JobId) -> Result<Job> {
        tracing::info!("Job {} cancelled while queued", job_id);
        self.registry.mark_cancelled(job_id)
    }

    /// Run a job to a terminal state and return the stored record
    pub async fn run(&self, request: JobRequest) -> Result<Job> {
        let job_id = request.job_id;
        let cancel = self.registry.cancellation(job_id)?;

        match self.registry.mark_running(job_id) {
            Ok(_) => {}
            Err(Error::Cancelled(_)) => return self.cancel_queued(job_id),
            Err(e) => return Err(e),
        }

        tracing::info!(
            "Processing job {} ({}, {} bytes) with extractor '{}'",
            job_id,
            request.document.filename,
            request.document.size_bytes(),
            self.extractor.name()
        );
        let started = std::time::Instant::now();

        let outcome = match self.execute(&request, &cancel).await {
            Ok(artifact) => self.registry.mark_completed(job_id, artifact),
            Err(Interrupt::Cancelled) => self.registry.mark_cancelled(job_id),
            Err(Interrupt::Failed(error)) => self.registry.mark_failed(job_id, error),
        }?;

        tracing::info!(
            "Job {} finished as {} in {:?}",
            job_id,
            outcome.status.as_str(),
            started.elapsed()
        );
        Ok(outcome)
    }

    async fn execute(
        &self,
        request: &JobRequest,
        cancel: &CancellationContext,
    ) -> StageResult<ArtifactRef> {
        let job_id = request.job_id;
        let document = &request.document;
        let encoded = match &document.content {
            DocumentContent::Binary(bytes) => Some(BASE64.encode(bytes)),
            DocumentContent::Text(_) => None,
        };
        let sections = request
            .options
            .sections
            .clone()
            .unwrap_or_else(|| self.sections.clone());

        let mut state = PipelineState {
            text: document.embedded_text().map(str::to_string),
            ..PipelineState::default()
        };

        for (index, weight) in self.plan.stages().iter().enumerate() {
            let stage = weight.kind;
            self.checkpoint(cancel, stage)?;
            self.progress(
                job_id,
                stage,
                self.plan.percent_before(index),
                format!("Starting {}", stage),
            )?;

            let base = StageRequest {
                job_id,
                stage,
                filename: document.filename.clone(),
                mime_type: document.mime_type.clone(),
                content_base64: encoded.clone(),
                text: None,
                section: None,
                section_offset: None,
                attempt: 1,
            };

            match stage {
                StageKind::Acquisition => {
                    if state.text.is_none() {
                        let (output, _) = self.call_with_retry(cancel, base).await?;
                        state.text = usable_text(output);
                    }
                }
                StageKind::Recognition => {
                    if state.text.is_some() {
                        tracing::debug!("Job {}: text layer present, skipping recognition", job_id);
                    } else {
                        let (output, attempts) = self.call_with_retry(cancel, base).await?;
                        let text = usable_text(output).ok_or_else(|| {
                            Interrupt::Failed(JobError {
                                kind: JobErrorKind::Upstream,
                                message: "recognition produced no text".to_string(),
                                stage: Some(stage),
                                retryable: false,
                                attempts,
                            })
                        })?;
                        state.text = Some(text);
                    }
                }
                StageKind::Extraction => {
                    self.extract_sections(index, &sections, base, cancel, &mut state)
                        .await?;
                }
                StageKind::Assembly => {
                    let artifact = assemble(job_id, &state);
                    let reference = self
                        .artifacts
                        .put(job_id, &artifact)
                        .await
                        .map_err(|e| Interrupt::from_error(e, stage))?;
                    tracing::debug!(
                        "Job {}: artifact stored in '{}' at {}",
                        job_id,
                        self.artifacts.name(),
                        reference.uri
                    );
                    state.artifact = Some(reference);
                }
            }

            self.progress(
                job_id,
                stage,
                self.plan.percent_after(index),
                format!("Finished {}", stage),
            )?;
        }

        state
            .artifact
            .ok_or_else(|| Interrupt::Failed(JobError::internal("pipeline produced no artifact")))
    }

    async fn extract_sections(
        &self,
        index: usize,
        sections: &[String],
        base: StageRequest,
        cancel: &CancellationContext,
        state: &mut PipelineState,
    ) -> StageResult<()> {
        let stage = base.stage;
        let job_id = base.job_id;
        let text = state.text.as_deref().ok_or_else(|| {
            Interrupt::Failed(JobError {
                kind: JobErrorKind::Validation,
                message: "document has no text to extract from".to_string(),
                stage: Some(stage),
                retryable: false,
                attempts: 0,
            })
        })?;

        let sized = self.sizer.prepare(text, self.budget);
        if sized.was_truncated {
            tracing::info!(
                "Job {}: document sized from {} to {} chars ({})",
                job_id,
                sized.original_length,
                sized.text.chars().count(),
                sized.method.as_str()
            );
        }

        for (done, section) in sections.iter().enumerate() {
            self.checkpoint(cancel, stage)?;

            let request = StageRequest {
                text: Some(sized.text.clone()),
                section: Some(section.clone()),
                section_offset: self.locator.locate(&sized.text, section),
                content_base64: None,
                ..base.clone()
            };
            let (output, _) = self.call_with_retry(cancel, request).await?;

            self.registry
                .record_partial_result(job_id, section, output.data.clone())
                .map_err(|e| Interrupt::from_error(e, stage))?;
            state.sections.insert(section.clone(), output.data);

            self.progress(
                job_id,
                stage,
                self.plan.percent_within(index, done + 1, sections.len()),
                format!("Extracted {}", section),
            )?;
        }

        state.sizing = Some(sized);
        Ok(())
    }

    /// Call the extractor with a per-call timeout, retrying transient failures
    ///
    /// Returns the output together with the number of attempts it took.
    async fn call_with_retry(
        &self,
        cancel: &CancellationContext,
        mut request: StageRequest,
    ) -> StageResult<(StageOutput, u32)> {
        let stage = request.stage;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            request.attempt = attempt;
            let result = match timeout(self.call_timeout, self.extractor.run_stage(&request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::transient(format!(
                    "{} call timed out after {:?}",
                    stage, self.call_timeout
                ))),
            };

            match result {
                Ok(output) => return Ok((output, attempt)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        "Job {}: {} failed (attempt {}/{}), retrying in {:?}: {}",
                        request.job_id,
                        stage,
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    let mut wake = cancel.clone();
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = wake.requested() => {}
                    }
                    self.checkpoint(cancel, stage)?;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Interrupt::Failed(JobError::from_error(&e, Some(stage), attempt)));
                }
            }
        }
    }

    fn checkpoint(&self, cancel: &CancellationContext, stage: StageKind) -> StageResult<()> {
        if cancel.is_requested() {
            tracing::info!("Job {}: cancellation observed before {}", cancel.job_id(), stage);
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    fn progress(&self, job_id: JobId, stage: StageKind, percent: u8, message: String) -> StageResult<()> {
        self.registry
            .record_progress(job_id, stage.as_str(), percent, message)
            .map(|_| ())
            .map_err(|e| Interrupt::from_error(e, stage))
    }
}

fn usable_text(output: StageOutput) -> Option<String> {
    output.text.filter(|text| !text.trim().is_empty())
}

/// Final artifact: section outputs plus how the text was sized
fn assemble(job_id: JobId, state: &PipelineState) -> Value {
    let sizing = state.sizing.as_ref().map(|s| {
        json!({
            "original_length": s.original_length,
            "was_truncated": s.was_truncated,
            "method": s.method,
        })
    });
    json!({
        "job_id": job_id,
        "sections": state.sections,
        "sizing": sizing,
        "completed_at": Utc::now(),
    })
}
