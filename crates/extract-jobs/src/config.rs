//! Configuration for the extraction job engine

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::admission::WindowConfig;
use crate::error::{Error, Result};
use crate::processing::{StageKind, StageWeight};

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "EXTRACT_JOBS_CONFIG";

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission (rate limiting) configuration
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Document sizing configuration
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Retry policy for extractor calls
    #[serde(default)]
    pub retry: RetryConfig,
    /// External extraction service
    #[serde(default)]
    pub extractor: ExtractorConfig,
}

impl ExtractConfig {
    /// Parse a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: ExtractConfig = toml::from_str(&raw).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `EXTRACT_JOBS_CONFIG` (or defaults) and apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = std::env::var("EXTRACT_JOBS_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("EXTRACT_JOBS_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid EXTRACT_JOBS_PORT: {}", port)))?;
        }
        if let Ok(url) = std::env::var("EXTRACT_JOBS_EXTRACTOR_URL") {
            config.extractor.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.admission.windows.is_empty() {
            return Err(Error::Config("admission.windows must not be empty".into()));
        }
        for window in &self.admission.windows {
            if window.duration_secs == 0 {
                return Err(Error::Config(format!(
                    "admission window '{}' has zero duration",
                    window.name
                )));
            }
        }

        if !(self.sizing.head_ratio > 0.0 && self.sizing.head_ratio < 1.0) {
            return Err(Error::Config(format!(
                "sizing.head_ratio must be within (0, 1), got {}",
                self.sizing.head_ratio
            )));
        }
        if self.sizing.budget_chars == 0 {
            return Err(Error::Config("sizing.budget_chars must be positive".into()));
        }

        let total: u32 = self.pipeline.stages.iter().map(|s| s.weight as u32).sum();
        if total != 100 {
            return Err(Error::Config(format!(
                "pipeline stage weights must sum to 100, got {}",
                total
            )));
        }
        let order: Vec<StageKind> = self.pipeline.stages.iter().map(|s| s.kind).collect();
        if order != StageKind::ALL {
            return Err(Error::Config(
                "pipeline.stages must list acquisition, recognition, extraction, assembly in that order"
                    .into(),
            ));
        }
        if self.pipeline.max_concurrent_jobs == 0 {
            return Err(Error::Config("pipeline.max_concurrent_jobs must be positive".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Maximum decoded document size in bytes (default: 25MB)
    pub max_document_bytes: usize,
    /// Reject requests without a caller identity
    #[serde(default)]
    pub require_identity: bool,
    /// Header carrying the caller identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

fn default_identity_header() -> String {
    "x-client-id".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_document_bytes: 25 * 1024 * 1024, // 25MB
            require_identity: false,
            identity_header: default_identity_header(),
        }
    }
}

/// Admission gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Windows evaluated together on every submission
    pub windows: Vec<WindowConfig>,
    /// How often idle identifiers are evicted
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval() -> u64 { 60 }

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                WindowConfig::new("minute", 60, 10),
                WindowConfig::new("hour", 3600, 100),
            ],
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Document sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Maximum characters handed to a single extraction call
    pub budget_chars: usize,
    /// Share of the budget kept from the head of the document
    pub head_ratio: f64,
    /// Characters reserved for the omission marker out of the tail share
    pub marker_reserve: usize,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            budget_chars: 1_000_000,
            head_ratio: 0.7,
            marker_reserve: 200,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ordered stages with their progress weights (must sum to 100)
    pub stages: Vec<StageWeight>,
    /// Sections extracted one by one during the extraction stage
    pub sections: Vec<String>,
    /// Jobs executing at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Submissions buffered ahead of the dispatcher
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_concurrent_jobs() -> usize { num_cpus::get().min(4) }
fn default_queue_capacity() -> usize { 1000 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                StageWeight::new(StageKind::Acquisition, 10),
                StageWeight::new(StageKind::Recognition, 30),
                StageWeight::new(StageKind::Extraction, 50),
                StageWeight::new(StageKind::Assembly, 10),
            ],
            sections: vec![
                "parties".to_string(),
                "terms".to_string(),
                "payment_schedule".to_string(),
                "signatures".to_string(),
            ],
            max_concurrent_jobs: default_max_concurrent_jobs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Retry policy for transient extractor failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> std::time::Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        std::time::Duration::from_millis(millis as u64)
    }
}

/// External extraction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Service base URL
    pub base_url: String,
    /// Per-call timeout in seconds; expiry counts as a transient failure
    pub timeout_secs: u64,
    /// Bearer token sent with every call
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            timeout_secs: 120, // 2 minutes per stage call
            api_key: None,
        }
    }
}
