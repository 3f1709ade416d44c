use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage a log stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStage {
    Prepare,
    Test,
    Run,
}

impl LogStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Test => "test",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for LogStage {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// One unit of log output emitted by a workspace log stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Server-assigned timestamp, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Classification marker, e.g. "I" for info or "E" for error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Fields the server sent that this type does not model
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    /// The log text, or an empty string when the entry carried none.
    pub fn text(&self) -> &str {
        self.data.as_deref().unwrap_or("")
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind.as_deref(), Some("E"))
    }
}

/// In-band error signaled by the server in a `problem` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogProblem {
    pub status: i64,
    pub reason: String,
    #[serde(default)]
    pub detail: Option<String>,
}
