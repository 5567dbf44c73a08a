//! Admission control: per-identifier, multi-window rate limiting for job submission

mod gate;

pub use gate::{AdmissionDecision, AdmissionGate, RateLimitEntry, WindowConfig};
