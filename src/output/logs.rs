use chrono::{DateTime, Local};

use crate::logs::LogEntry;

use super::styling::{bright_red, dim};

/// Renders one log entry as a single terminal line.
///
/// RFC 3339 timestamps are shown in local time; anything else is printed as sent.
pub fn format_entry(entry: &LogEntry, plain: bool) -> String {
    let timestamp = entry.timestamp.as_deref().map(local_time);

    if plain {
        return match timestamp {
            Some(ts) => format!("{ts} {}", entry.text()),
            None => entry.text().to_owned(),
        };
    }

    let text = if entry.is_error() {
        bright_red(entry.text()).to_string()
    } else {
        entry.text().to_owned()
    };

    match timestamp {
        Some(ts) => format!("{} {text}", dim(ts)),
        None => text,
    }
}

fn local_time(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Local).format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|_| raw.to_owned())
}
