//! Ordered trace of attempt boundaries, sent with the run metadata.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event: String,
    /// RFC 3339 timestamp with nanosecond precision.
    pub timestamp: String,
}

/// Append-only list of [`TimelineEvent`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of attempt `attempt` (0 is the initial run).
    pub fn attempt_start(&mut self, attempt: usize) {
        let event = if attempt == 0 {
            "test_start".to_string()
        } else {
            format!("retry_{}_start", attempt)
        };
        self.push(event);
    }

    /// Marks the end of attempt `attempt`.
    pub fn attempt_end(&mut self, attempt: usize) {
        let event = if attempt == 0 {
            "test_end".to_string()
        } else {
            format!("retry_{}_end", attempt)
        };
        self.push(event);
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn push(&mut self, event: String) {
        self.events.push(TimelineEvent {
            event,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        });
    }
}
