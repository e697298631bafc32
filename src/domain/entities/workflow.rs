//! Durable state of an evaluation workflow run.
//!
//! Every transition is written as a [`Checkpoint`] before the next step starts,
//! so a crashed run resumes from its last completed step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluation::{EvaluationJob, EvaluationRecord};

/// Response captured by a successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub latency_ms: u64,
}

/// Output of the rendering collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    pub title: Option<String>,
    pub text: String,
    pub link_count: usize,
}

/// Workflow step, tagged with the data the next step needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum WorkflowState {
    Fetching {
        failures: u32,
    },
    Rendering {
        page: FetchedPage,
    },
    Scoring {
        page: FetchedPage,
        rendered: Option<RenderedPage>,
    },
    Persisting {
        record: EvaluationRecord,
    },
    /// The `dead` verdict is fixed before it is written, so writing it again
    /// after a crash stores the same failure streak.
    Failing {
        record: EvaluationRecord,
        reason: String,
    },
    Done,
    /// Terminal. `record` is the `dead` verdict that was written.
    Failed {
        record: EvaluationRecord,
        reason: String,
    },
    /// Terminal. The link disappeared before the result could be persisted.
    Abandoned,
}

impl WorkflowState {
    pub fn initial() -> Self {
        Self::Fetching { failures: 0 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fetching { .. } => "fetching",
            Self::Rendering { .. } => "rendering",
            Self::Scoring { .. } => "scoring",
            Self::Persisting { .. } => "persisting",
            Self::Failing { .. } => "failing",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. } | Self::Abandoned)
    }
}

/// Persisted progress of one job, keyed by [`EvaluationJob::key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub key: String,
    pub job: EvaluationJob,
    pub state: WorkflowState,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(job: EvaluationJob, state: WorkflowState) -> Self {
        Self {
            key: job.key(),
            job,
            state,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!WorkflowState::initial().is_terminal());
        assert!(WorkflowState::Done.is_terminal());
        assert!(WorkflowState::Abandoned.is_terminal());
        assert!(
            WorkflowState::Failed {
                record: EvaluationRecord::dead("https://x", 1, 3),
                reason: "timeout".to_string(),
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_failing_is_not_terminal() {
        let failing = WorkflowState::Failing {
            record: EvaluationRecord::dead("https://x", 1, 3),
            reason: "fetch failed".to_string(),
        };
        assert!(!failing.is_terminal());
        assert_eq!(failing.name(), "failing");
    }

    #[test]
    fn test_state_serializes_with_step_tag() {
        let json = serde_json::to_value(WorkflowState::Fetching { failures: 2 }).unwrap();
        assert_eq!(json["step"], "fetching");
        assert_eq!(json["failures"], 2);

        let back: WorkflowState = serde_json::from_value(json).unwrap();
        assert_eq!(back, WorkflowState::Fetching { failures: 2 });
    }

    #[test]
    fn test_checkpoint_uses_job_key() {
        let job = EvaluationJob::new("https://example.com", 5);
        let checkpoint = Checkpoint::new(job.clone(), WorkflowState::initial());
        assert_eq!(checkpoint.key, job.key());
    }
}
