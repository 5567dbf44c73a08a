//! Tagged frames pushed to remote consumers

use serde::{Deserialize, Serialize};

use crate::processing::{JobError, JobEvent, JobEventKind, JobStatus};
use crate::providers::ArtifactRef;

/// One record of the streaming protocol; `final_result` always ends a stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Progress {
        stage: String,
        percent: u8,
        message: String,
    },
    PartialResult {
        section: String,
        data: serde_json::Value,
    },
    FinalResult {
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ArtifactRef>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<JobError>,
    },
}

impl StreamFrame {
    pub fn is_final(&self) -> bool {
        matches!(self, StreamFrame::FinalResult { .. })
    }

    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Progress { .. } => "progress",
            StreamFrame::PartialResult { .. } => "partial_result",
            StreamFrame::FinalResult { .. } => "final_result",
        }
    }
}

impl From<&JobEvent> for StreamFrame {
    fn from(event: &JobEvent) -> Self {
        match &event.kind {
            JobEventKind::Progress(p) => StreamFrame::Progress {
                stage: p.stage.clone(),
                percent: p.percent,
                message: p.message.clone(),
            },
            JobEventKind::PartialResult(p) => StreamFrame::PartialResult {
                section: p.section.clone(),
                data: p.data.clone(),
            },
            JobEventKind::Finished(outcome) => StreamFrame::FinalResult {
                status: outcome.status,
                result: outcome.result.clone(),
                error: outcome.error.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let frame = StreamFrame::Progress {
            stage: "recognition".into(),
            percent: 40,
            message: "Finished recognition".into(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "progress",
                "stage": "recognition",
                "percent": 40,
                "message": "Finished recognition",
            })
        );

        let done = StreamFrame::FinalResult {
            status: JobStatus::Cancelled,
            result: None,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"type": "final_result", "status": "cancelled"})
        );
        assert!(done.is_final());
        assert_eq!(done.event_name(), "final_result");
    }
}
