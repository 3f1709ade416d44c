//! Live observability for remote build/deploy pipelines.
//!
//! Two independent pieces are composed by the caller:
//!
//! - [`logs`] reads a workspace's `text/event-stream` log endpoints into typed
//!   [`LogEntry`](logs::LogEntry) values, with an optional overall timeout and
//!   external cancellation.
//! - [`pipeline`] polls a stage's per-worker status until every relevant
//!   worker reaches a terminal state.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod logs;
pub mod output;
pub mod pipeline;

pub use error::{Result, StageWatchError};
