//! Collaborator abstractions: the extraction service and the artifact store
//!
//! The runner only talks to these traits, so tests and deployments can swap
//! implementations without touching the pipeline.

pub mod artifact_store;
pub mod extractor;
pub mod http;

pub use artifact_store::{ArtifactRef, ArtifactStore, InMemoryArtifactStore};
pub use extractor::{Extractor, StageOutput, StageRequest};
pub use http::HttpExtractor;
