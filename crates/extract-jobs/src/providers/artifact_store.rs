//! Storage for assembled job artifacts

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::processing::JobId;

/// Opaque reference to a stored artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub id: String,
    pub uri: String,
    pub size_bytes: usize,
}

/// Trait for artifact persistence
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the final artifact of a job
    async fn put(&self, job_id: JobId, artifact: &serde_json::Value) -> Result<ArtifactRef>;

    /// Fetch a stored artifact, `None` if it is gone
    async fn get(&self, reference: &ArtifactRef) -> Result<Option<serde_json::Value>>;

    /// Get store name for logging
    fn name(&self) -> &str;
}

/// Process-local artifact store
#[derive(Default)]
pub struct InMemoryArtifactStore {
    artifacts: DashMap<String, serde_json::Value>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, job_id: JobId, artifact: &serde_json::Value) -> Result<ArtifactRef> {
        let size_bytes = serde_json::to_vec(artifact)?.len();
        let id = job_id.to_string();
        self.artifacts.insert(id.clone(), artifact.clone());
        Ok(ArtifactRef {
            uri: format!("memory://artifacts/{}", id),
            id,
            size_bytes,
        })
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Option<serde_json::Value>> {
        Ok(self.artifacts.get(&reference.id).map(|a| a.value().clone()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
