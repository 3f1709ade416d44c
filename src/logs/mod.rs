//! Workspace log streaming over `text/event-stream`.

mod manager;
mod parser;
mod stream;
mod types;

pub use manager::{
    CollectOptions, WorkspaceLogs, DEFAULT_COLLECT_TIMEOUT, DEFAULT_STAGE_LOG_TIMEOUT,
};
pub use stream::LogStream;
pub use types::{LogEntry, LogProblem, LogStage};
