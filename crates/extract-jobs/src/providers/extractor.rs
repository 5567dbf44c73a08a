//! Extractor trait for stage-level document work

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::processing::{JobId, StageKind};

/// One call into the extraction service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    pub job_id: JobId,
    pub stage: StageKind,
    pub filename: String,
    pub mime_type: String,
    /// Raw document bytes for acquisition and recognition of binary documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
    /// Sized document text for extraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Section being extracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Character offset where the section probably starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_offset: Option<usize>,
    /// 1-based attempt number
    pub attempt: u32,
}

/// What a stage call returns
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageOutput {
    /// Text layer produced by acquisition or recognition
    #[serde(default)]
    pub text: Option<String>,
    /// Structured output (section data for extraction)
    #[serde(default)]
    pub data: serde_json::Value,
}

impl StageOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            data: serde_json::Value::Null,
        }
    }

    pub fn data(data: serde_json::Value) -> Self {
        Self { text: None, data }
    }
}

/// Trait for the external extraction service
///
/// Implementations classify failures: [`Error::transient`](crate::Error::transient)
/// for timeouts and throttling, [`Error::terminal`](crate::Error::terminal) for
/// rejected or malformed work. The runner owns retries and timeouts.
///
/// Implementations:
/// - `HttpExtractor`: JSON over HTTP
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Run one stage (or one section of the extraction stage)
    async fn run_stage(&self, request: &StageRequest) -> Result<StageOutput>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
