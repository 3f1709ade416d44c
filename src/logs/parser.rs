//! Line-oriented state machine for the workspace log event stream.
//!
//! Lines are fed one at a time. `event:` sets the pending event type,
//! `data:` appends to the payload, `:` starts a comment, and any other
//! non-empty line continues the payload when an event type is pending.
//! A blank line completes the event, which is then classified by
//! [`dispatch`].

use log::{debug, warn};

use crate::error::StageWatchError;

use super::types::{LogEntry, LogProblem};

const TERMINAL_EVENTS: [&str; 4] = ["end", "close", "done", "complete"];

/// A completed event: its type and the payload lines joined by newlines.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StreamEvent {
    pub event_type: Option<String>,
    pub payload: String,
    pub has_payload: bool,
}

/// What the reader should do with a completed event.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Entries(Vec<LogEntry>),
    Terminate,
    Fail(StageWatchError),
    Skip,
}

#[derive(Debug, Default)]
pub(crate) struct EventParser {
    event_type: Option<String>,
    data_buffer: Vec<String>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator). Returns the event a blank line completes.
    pub fn feed_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim();

        if line.is_empty() {
            let event = StreamEvent {
                event_type: self.event_type.take(),
                has_payload: !self.data_buffer.is_empty(),
                payload: self.data_buffer.join("\n"),
            };
            self.data_buffer.clear();
            return Some(event);
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.event_type = Some(rest.trim().to_owned());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data_buffer.push(rest.trim().to_owned());
        } else if line.starts_with(':') {
            // comment
        } else if self.event_type.is_some() {
            self.data_buffer.push(line.to_owned());
        }

        None
    }
}

pub(crate) fn dispatch(event: StreamEvent) -> Dispatch {
    let Some(event_type) = event.event_type.as_deref() else {
        return Dispatch::Skip;
    };

    if TERMINAL_EVENTS.contains(&event_type) {
        return Dispatch::Terminate;
    }

    if !event.has_payload {
        return Dispatch::Skip;
    }

    match event_type {
        "problem" => Dispatch::Fail(problem_error(&event.payload)),
        "data" => Dispatch::Entries(decode_entries(&event.payload)),
        other => {
            debug!("Ignoring unknown event type '{other}'");
            Dispatch::Skip
        }
    }
}

/// Decode a `data` payload. Malformed entries are logged and skipped.
pub(crate) fn decode_entries(payload: &str) -> Vec<LogEntry> {
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse log entry JSON: {e}");
            return Vec::new();
        }
    };

    let items = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };

    items
        .into_iter()
        .filter_map(|item| {
            serde_json::from_value::<LogEntry>(item)
                .inspect_err(|e| warn!("Failed to validate log entry: {e}"))
                .ok()
        })
        .collect()
}

/// Convert a `problem` payload into the error it signals.
pub(crate) fn problem_error(payload: &str) -> StageWatchError {
    let raw: serde_json::Value = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(_) => {
            return StageWatchError::Protocol {
                payload: payload.to_owned(),
            }
        }
    };

    let problem: LogProblem = match serde_json::from_value(raw.clone()) {
        Ok(problem) => problem,
        Err(_) => {
            return StageWatchError::Protocol {
                payload: payload.to_owned(),
            }
        }
    };

    if problem.status == 400 {
        StageWatchError::Validation {
            message: problem.reason,
            detail: problem.detail,
        }
    } else {
        StageWatchError::Api {
            status: problem.status,
            message: problem.reason,
            body: Some(raw),
            request: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str]) -> Vec<Dispatch> {
        let mut parser = EventParser::new();
        lines
            .iter()
            .filter_map(|line| parser.feed_line(line))
            .map(dispatch)
            .collect()
    }

    fn entries(dispatches: &[Dispatch]) -> Vec<String> {
        dispatches
            .iter()
            .filter_map(|d| match d {
                Dispatch::Entries(entries) => Some(entries),
                _ => None,
            })
            .flatten()
            .map(|e| e.text().to_owned())
            .collect()
    }

    #[test]
    fn test_single_data_event() {
        let out = run(&[
            "event: data",
            r#"data: {"timestamp": "t1", "kind": "I", "data": "hello"}"#,
            "",
        ]);
        assert_eq!(entries(&out), vec!["hello"]);
    }

    #[test]
    fn test_missing_data_field_yields_empty_text() {
        let out = run(&["event: data", r#"data: {"kind": "I"}"#, ""]);
        assert_eq!(entries(&out), vec![""]);
    }

    #[test]
    fn test_array_payload_is_flattened_in_order() {
        let out = run(&[
            "event: data",
            r#"data: [{"data": "one"}, {"data": "two"}, {"data": "three"}]"#,
            "",
        ]);
        assert_eq!(entries(&out), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_multiline_payload_with_continuation() {
        let out = run(&[
            "event: data",
            r#"data: [{"data": "a"},"#,
            r#"{"data": "b"}]"#,
            "",
        ]);
        assert_eq!(entries(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_comments_are_ignored() {
        let out = run(&[
            ": keep-alive",
            "event: data",
            ": another comment",
            r#"data: {"data": "x"}"#,
            "",
        ]);
        assert_eq!(entries(&out), vec!["x"]);
    }

    #[test]
    fn test_continuation_without_event_type_is_dropped() {
        let mut parser = EventParser::new();
        assert!(parser.feed_line("stray line").is_none());
        let event = parser.feed_line("").unwrap();
        assert!(!event.has_payload);
        assert!(matches!(dispatch(event), Dispatch::Skip));
    }

    #[test]
    fn test_terminal_events_ignore_buffered_data() {
        for name in ["end", "close", "done", "complete"] {
            let event_line = format!("event: {name}");
            let out = run(&[event_line.as_str(), r#"data: {"data": "late"}"#, ""]);
            assert!(matches!(out.as_slice(), [Dispatch::Terminate]), "{name}");

            let out = run(&[event_line.as_str(), ""]);
            assert!(matches!(out.as_slice(), [Dispatch::Terminate]), "{name}");
        }
    }

    #[test]
    fn test_problem_400_is_validation_error() {
        let out = run(&[
            "event: problem",
            r#"data: {"status": 400, "reason": "bad step", "detail": "step 9 does not exist"}"#,
            "",
        ]);
        match out.as_slice() {
            [Dispatch::Fail(StageWatchError::Validation { message, detail })] => {
                assert_eq!(message, "bad step");
                assert_eq!(detail.as_deref(), Some("step 9 does not exist"));
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[test]
    fn test_problem_other_status_is_api_error() {
        let out = run(&[
            "event: problem",
            r#"data: {"status": 503, "reason": "unavailable"}"#,
            "",
        ]);
        match out.as_slice() {
            [Dispatch::Fail(StageWatchError::Api {
                status,
                message,
                body,
                request,
            })] => {
                assert_eq!(*status, 503);
                assert_eq!(message, "unavailable");
                assert_eq!(body.as_ref().unwrap()["status"], 503);
                assert!(request.is_none());
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[test]
    fn test_problem_status_outside_http_range_is_api_error() {
        for (payload, expected) in [
            (r#"data: {"status": 70000, "reason": "weird"}"#, 70000),
            (r#"data: {"status": -1, "reason": "negative"}"#, -1),
        ] {
            let out = run(&["event: problem", payload, ""]);
            assert!(
                matches!(
                    out.as_slice(),
                    [Dispatch::Fail(StageWatchError::Api { status, .. })] if *status == expected
                ),
                "{payload}: {out:?}"
            );
        }
    }

    #[test]
    fn test_malformed_problem_is_protocol_error() {
        let out = run(&["event: problem", "data: not json", ""]);
        assert!(matches!(
            out.as_slice(),
            [Dispatch::Fail(StageWatchError::Protocol { payload })] if payload == "not json"
        ));
    }

    #[test]
    fn test_malformed_data_does_not_fail() {
        let out = run(&[
            "event: data",
            "data: {broken",
            "",
            "event: data",
            r#"data: {"data": "after"}"#,
            "",
        ]);
        assert_eq!(entries(&out), vec!["after"]);
        assert!(!out.iter().any(|d| matches!(d, Dispatch::Fail(_))));
    }

    #[test]
    fn test_bad_array_element_is_skipped() {
        let out = run(&[
            "event: data",
            r#"data: [{"data": "ok"}, 42, {"data": "still ok"}]"#,
            "",
        ]);
        assert_eq!(entries(&out), vec!["ok", "still ok"]);
    }

    #[test]
    fn test_state_resets_after_each_event() {
        let mut parser = EventParser::new();
        parser.feed_line("event: data");
        parser.feed_line(r#"data: {"data": "first"}"#);
        parser.feed_line("");

        parser.feed_line(r#"data: {"data": "orphan"}"#);
        let event = parser.feed_line("").unwrap();
        assert!(event.event_type.is_none());
        assert!(matches!(dispatch(event), Dispatch::Skip));
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let out = run(&["event: heartbeat", "data: {}", ""]);
        assert!(matches!(out.as_slice(), [Dispatch::Skip]));
    }
}
