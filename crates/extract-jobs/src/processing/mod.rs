//! Job lifecycle: registry, queue, runner and the data they share

mod cancel;
mod document;
mod job;
mod queue;
mod registry;
mod runner;
mod stage;

pub use cancel::CancellationContext;
pub use document::{Document, DocumentContent, DocumentPayload};
pub use job::{
    Job, JobError, JobErrorKind, JobEvent, JobEventKind, JobId, JobOutcome, JobStatus,
    PartialResult, ProgressEvent,
};
pub use queue::{JobDispatcher, JobOptions, JobQueue, JobRequest};
pub use registry::{CancelAck, JobRegistry, QueueStats};
pub use runner::JobRunner;
pub use stage::{StageKind, StagePlan, StageWeight};
