//! Status-line boundary for human-facing progress.
//!
//! The poll loop and the orchestrator report through [`StatusSink`]; how a
//! line is rendered is up to the sink.

use std::fmt;
use std::sync::Mutex;

use serde_json::Value;

use crate::events::{EventPayload, EventWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTag {
    Info,
    Success,
    Warning,
    Error,
}

impl StatusTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusTag::Info => "..",
            StatusTag::Success => "OK",
            StatusTag::Warning => "!!",
            StatusTag::Error => "XX",
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait StatusSink: Send + Sync {
    fn status(&self, message: &str, tag: StatusTag);
}

/// Drops every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn status(&self, _message: &str, _tag: StatusTag) {}
}

/// Writes `[OK] message` lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn status(&self, message: &str, tag: StatusTag) {
        eprintln!("[{tag}] {message}");
    }
}

/// Routes status lines into `tracing` at a level matching the tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn status(&self, message: &str, tag: StatusTag) {
        match tag {
            StatusTag::Info => tracing::info!(target: "genpoll::status", "{message}"),
            StatusTag::Success => tracing::info!(target: "genpoll::status", ok = true, "{message}"),
            StatusTag::Warning => tracing::warn!(target: "genpoll::status", "{message}"),
            StatusTag::Error => tracing::error!(target: "genpoll::status", "{message}"),
        }
    }
}

/// Appends each status line to an `events.jsonl` log as a `status` event.
#[derive(Debug, Clone)]
pub struct EventStatus {
    writer: EventWriter,
}

impl EventStatus {
    pub fn new(writer: EventWriter) -> Self {
        Self { writer }
    }
}

impl StatusSink for EventStatus {
    fn status(&self, message: &str, tag: StatusTag) {
        let mut payload = EventPayload::new();
        payload.insert("tag".to_string(), Value::String(tag.as_str().to_string()));
        payload.insert("message".to_string(), Value::String(message.to_string()));
        if let Err(err) = self.writer.emit("status", payload) {
            tracing::warn!(path = %self.writer.path().display(), "failed to append status event: {err:#}");
        }
    }
}

/// Forwards every line to each inner sink in order.
#[derive(Default)]
pub struct FanoutStatus {
    sinks: Vec<Box<dyn StatusSink>>,
}

impl FanoutStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: StatusSink + 'static>(&mut self, sink: S) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StatusSink for FanoutStatus {
    fn status(&self, message: &str, tag: StatusTag) {
        for sink in &self.sinks {
            sink.status(message, tag);
        }
    }
}

/// Keeps every line in memory. Handy for asserting on progress output.
#[derive(Debug, Default)]
pub struct RecordingStatus {
    lines: Mutex<Vec<(StatusTag, String)>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(StatusTag, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, tag: StatusTag) -> usize {
        self.lines()
            .iter()
            .filter(|(line_tag, _)| *line_tag == tag)
            .count()
    }
}

impl StatusSink for RecordingStatus {
    fn status(&self, message: &str, tag: StatusTag) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((tag, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn tags_render_short_codes() {
        assert_eq!(StatusTag::Info.as_str(), "..");
        assert_eq!(StatusTag::Success.to_string(), "OK");
        assert_eq!(StatusTag::Warning.as_str(), "!!");
        assert_eq!(StatusTag::Error.as_str(), "XX");
    }

    #[test]
    fn event_status_appends_tagged_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let sink = EventStatus::new(EventWriter::new(&path, "batch-1"));
        sink.status("Task abc... done (1/2)", StatusTag::Success);

        let content = fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed["type"], Value::String("status".to_string()));
        assert_eq!(parsed["tag"], Value::String("OK".to_string()));
        assert_eq!(
            parsed["message"],
            Value::String("Task abc... done (1/2)".to_string())
        );
        Ok(())
    }

    #[test]
    fn fanout_forwards_to_every_sink() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let mut fanout = FanoutStatus::new();
        fanout.push(NullStatus);
        fanout.push(EventStatus::new(EventWriter::new(&path, "batch-1")));
        assert_eq!(fanout.len(), 2);

        fanout.status("one", StatusTag::Info);
        fanout.status("two", StatusTag::Error);

        assert_eq!(fs::read_to_string(&path)?.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn recording_status_counts_by_tag() {
        let sink = RecordingStatus::new();
        sink.status("a", StatusTag::Info);
        sink.status("b", StatusTag::Info);
        sink.status("c", StatusTag::Warning);
        assert_eq!(sink.count(StatusTag::Info), 2);
        assert_eq!(sink.count(StatusTag::Warning), 1);
        assert_eq!(sink.lines().len(), 3);
    }
}
