//! Stage status polling and completion waiting.

mod landscape;
mod sync;
mod types;

pub use landscape::{validate_profile_name, WorkspaceLandscape};
pub use sync::{
    is_relevant, relevant_statuses, wait_for_stage, StageStatusSource, WaitOptions,
    DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT,
};
pub use types::{PipelineStage, PipelineState, PipelineStatus, StageOutcome, StepStatus};
