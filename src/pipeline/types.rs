use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::logs::LogStage as PipelineStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Waiting,
    Running,
    Success,
    Failure,
    Aborted,
}

impl PipelineState {
    /// `success`, `failure` and `aborted` never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    pub state: PipelineState,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// Status of one worker (replica of a server) for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub state: PipelineState,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepStatus>,
    pub replica: String,
    pub server: String,
}

/// The relevant worker statuses of a stage once all of them are terminal.
///
/// Reaching this point does not mean the stage passed; inspect
/// [`all_succeeded`](Self::all_succeeded) or [`failed`](Self::failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    pub statuses: Vec<PipelineStatus>,
}

impl StageOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.statuses
            .iter()
            .all(|s| s.state == PipelineState::Success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineStatus> {
        self.statuses
            .iter()
            .filter(|s| s.state != PipelineState::Success)
    }
}
