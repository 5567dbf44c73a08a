//! extract-jobs: Document extraction job engine
//!
//! Admits submissions through a multi-window rate limiter, runs each document
//! through a weighted stage pipeline against an external extraction service,
//! and exposes progress and per-section partial results as a replayable
//! event stream. Cancellation is cooperative and checked between stages.

pub mod admission;
pub mod config;
pub mod error;
pub mod processing;
pub mod providers;
pub mod server;
pub mod sizing;
pub mod streaming;

pub use admission::{AdmissionDecision, AdmissionGate, WindowConfig};
pub use config::ExtractConfig;
pub use error::{Error, Result};
pub use processing::{Job, JobId, JobQueue, JobRegistry, JobRunner, JobStatus};
pub use sizing::{DocumentSizer, DocumentSizingResult, SizingPolicy};
pub use streaming::StreamFrame;
