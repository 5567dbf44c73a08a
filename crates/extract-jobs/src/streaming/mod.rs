//! Read-side projection of a job's event log into stream frames

mod adapter;
mod frames;

pub use adapter::{subscribe, subscribe_events, wait_for_final, EventStream, JobStream};
pub use frames::StreamFrame;
