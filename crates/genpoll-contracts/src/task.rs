use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Image,
    Video,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 2] = [GenerationKind::Image, GenerationKind::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Video => "video",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a vendor adapter, e.g. `replicate` or `wavespeed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque identifier for one in-flight job.
///
/// A handle is only meaningful to the adapter instance that issued it; the
/// adapter keeps the vendor poll target privately and nothing here records
/// which adapter that was.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// First twelve characters, used in progress lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => self.0.as_str(),
        }
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Terminal outcome of one task. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskResult {
    Success {
        task_id: TaskHandle,
        result_url: String,
    },
    Error {
        task_id: TaskHandle,
        error: String,
    },
}

impl TaskResult {
    pub fn success(task_id: TaskHandle, result_url: impl Into<String>) -> Self {
        TaskResult::Success {
            task_id,
            result_url: result_url.into(),
        }
    }

    pub fn error(task_id: TaskHandle, message: impl Into<String>) -> Self {
        TaskResult::Error {
            task_id,
            error: message.into(),
        }
    }

    pub fn task_id(&self) -> &TaskHandle {
        match self {
            TaskResult::Success { task_id, .. } | TaskResult::Error { task_id, .. } => task_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success { .. })
    }

    pub fn result_url(&self) -> Option<&str> {
        match self {
            TaskResult::Success { result_url, .. } => Some(result_url.as_str()),
            TaskResult::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            TaskResult::Success { .. } => None,
            TaskResult::Error { error, .. } => Some(error.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Wall-clock budget measured from loop entry, checked once per iteration.
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Suppresses per-iteration progress lines only.
    pub quiet: bool,
}

impl PollOptions {
    pub fn new(max_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            max_wait,
            poll_interval,
            quiet: false,
        }
    }

    pub fn from_secs(max_wait_s: u64, poll_interval_s: u64) -> Self {
        Self::new(
            Duration::from_secs(max_wait_s),
            Duration::from_secs(poll_interval_s),
        )
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Defaults used by batch polling.
    pub fn batch_default() -> Self {
        Self::from_secs(600, 5)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn short_handle_takes_first_twelve_chars() {
        assert_eq!(TaskHandle::new("abcdefghijklmnop").short(), "abcdefghijkl");
        assert_eq!(TaskHandle::new("abc").short(), "abc");
    }

    #[test]
    fn task_result_serializes_with_status_tag() -> anyhow::Result<()> {
        let ok = TaskResult::success(TaskHandle::new("t1"), "https://cdn/x.png");
        assert_eq!(
            serde_json::to_value(&ok)?,
            json!({"status": "success", "task_id": "t1", "result_url": "https://cdn/x.png"})
        );
        let err = TaskResult::error(TaskHandle::new("t2"), "boom");
        assert_eq!(
            serde_json::to_value(&err)?,
            json!({"status": "error", "task_id": "t2", "error": "boom"})
        );
        assert_eq!(err.error_message(), Some("boom"));
        assert!(ok.is_success());
        Ok(())
    }

    #[test]
    fn generation_kind_displays_lowercase() {
        assert_eq!(GenerationKind::Image.to_string(), "image");
        assert_eq!(GenerationKind::Video.as_str(), "video");
    }
}
