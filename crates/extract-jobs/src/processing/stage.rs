//! Pipeline stages and their progress weights

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

/// Pipeline stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Obtain the document's text layer
    Acquisition,
    /// Optical recognition for documents without usable text
    Recognition,
    /// Per-section model-based extraction
    Extraction,
    /// Merge section outputs into the final artifact
    Assembly,
}

impl StageKind {
    /// Execution order
    pub const ALL: [StageKind; 4] = [
        StageKind::Acquisition,
        StageKind::Recognition,
        StageKind::Extraction,
        StageKind::Assembly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Acquisition => "acquisition",
            StageKind::Recognition => "recognition",
            StageKind::Extraction => "extraction",
            StageKind::Assembly => "assembly",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress weight of one stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageWeight {
    pub kind: StageKind,
    pub weight: u8,
}

impl StageWeight {
    pub fn new(kind: StageKind, weight: u8) -> Self {
        Self { kind, weight }
    }
}

/// Ordered stages with cumulative progress bookkeeping
#[derive(Debug, Clone)]
pub struct StagePlan {
    stages: Vec<StageWeight>,
}

impl StagePlan {
    pub fn new(stages: Vec<StageWeight>) -> Self {
        Self { stages }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.stages.clone())
    }

    pub fn stages(&self) -> &[StageWeight] {
        &self.stages
    }

    /// Cumulative percent once the first `index` stages are done
    pub fn percent_before(&self, index: usize) -> u8 {
        let sum: u32 = self.stages.iter().take(index).map(|s| s.weight as u32).sum();
        sum.min(100) as u8
    }

    /// Cumulative percent once stage `index` is done
    pub fn percent_after(&self, index: usize) -> u8 {
        self.percent_before(index + 1)
    }

    /// Cumulative percent with `done` of `total` units of stage `index` finished
    pub fn percent_within(&self, index: usize, done: usize, total: usize) -> u8 {
        let base = self.percent_before(index) as usize;
        let weight = self.stages.get(index).map(|s| s.weight as usize).unwrap_or(0);
        if total == 0 {
            return base.min(100) as u8;
        }
        let share = weight * done.min(total) / total;
        (base + share).min(100) as u8
    }
}

impl Default for StagePlan {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cumulative_percentages() {
        let plan = StagePlan::default();
        assert_eq!(plan.percent_before(0), 0);
        assert_eq!(plan.percent_after(0), 10);
        assert_eq!(plan.percent_after(1), 40);
        assert_eq!(plan.percent_after(2), 90);
        assert_eq!(plan.percent_after(3), 100);
    }

    #[test]
    fn test_percent_within_stage() {
        let plan = StagePlan::default();
        assert_eq!(plan.percent_within(2, 0, 4), 40);
        assert_eq!(plan.percent_within(2, 1, 4), 52);
        assert_eq!(plan.percent_within(2, 3, 3), 90);
        assert_eq!(plan.percent_within(2, 1, 0), 40);
    }
}
