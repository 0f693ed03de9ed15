//! Single-task poll loop.
//!
//! `Submitted -> Polling -> {Succeeded | Failed | TimedOut}`. Every vendor
//! status is folded into [`VendorStatus`] before it reaches the loop, so the
//! loop itself only knows "succeeded", "failed or canceled" and "anything else".

use std::thread;
use std::time::Instant;

use genpoll_contracts::{GenError, PollOptions, StatusSink, StatusTag, TaskHandle, TaskResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::http::{error_chain_text, is_retryable_transport_error, truncate_text};

/// Consecutive transport failures tolerated before the loop gives up.
pub const MAX_TRANSIENT_RETRIES: u32 = 10;

/// One answer from a vendor poll endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReply {
    /// Non-2xx response or a connection-level failure.
    Transport { code: Option<u16>, detail: String },
    Vendor(VendorStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VendorStatus {
    /// `output` is either a list of URLs or a single URL string.
    Succeeded { output: Value },
    Failed {
        status: String,
        error: Option<String>,
    },
    Pending { status: String },
}

impl VendorStatus {
    pub fn pending(status: impl Into<String>) -> Self {
        VendorStatus::Pending {
            status: status.into(),
        }
    }

    pub fn failed(status: impl Into<String>, error: Option<String>) -> Self {
        VendorStatus::Failed {
            status: status.into(),
            error: error.filter(|text| !text.trim().is_empty()),
        }
    }
}

/// Something that can be asked for the current state of a poll target.
pub trait StatusSource: Send + Sync {
    /// Human label used in messages, e.g. `Replicate prediction`.
    fn label(&self) -> &str;

    fn fetch_status(&self, poll_target: &str) -> anyhow::Result<StatusReply>;
}

/// Polls `poll_target` until it reaches a terminal state or `max_wait` elapses.
///
/// The deadline is checked once per iteration, so the loop can overrun
/// `max_wait` by up to one `poll_interval` plus one vendor round trip.
pub fn poll_until_done<S: StatusSource + ?Sized>(
    source: &S,
    handle: &TaskHandle,
    poll_target: &str,
    options: &PollOptions,
    sink: &dyn StatusSink,
) -> Result<TaskResult, GenError> {
    let label = source.label();
    let started = Instant::now();
    // Reset by any successful transport response, pending or not.
    let mut retry_count: u32 = 0;

    while started.elapsed() < options.max_wait {
        let reply = match source.fetch_status(poll_target) {
            Ok(reply) => reply,
            Err(err) if is_retryable_transport_error(&err) => StatusReply::Transport {
                code: None,
                detail: error_chain_text(&err, 512),
            },
            Err(err) => {
                return Err(GenError::Other(
                    err.context(format!("{label} poll failed for task {handle}")),
                ))
            }
        };

        match reply {
            StatusReply::Transport { code, detail } => {
                retry_count += 1;
                if retry_count > MAX_TRANSIENT_RETRIES {
                    return Err(GenError::RetriesExhausted {
                        retries: MAX_TRANSIENT_RETRIES,
                        detail,
                    });
                }
                let elapsed = started.elapsed().as_secs();
                warn!(task = %handle, ?code, retry = retry_count, "{label} status check failed: {detail}");
                if !options.quiet {
                    let message = match code {
                        Some(code) => {
                            format!("Status check returned {code}, retrying... ({elapsed}s)")
                        }
                        None => format!("Status check failed, retrying... ({elapsed}s)"),
                    };
                    sink.status(&message, StatusTag::Warning);
                }
                thread::sleep(options.poll_interval);
            }
            StatusReply::Vendor(status) => {
                retry_count = 0;
                match status {
                    VendorStatus::Succeeded { output } => {
                        let result_url = extract_result_url(label, &output)?;
                        debug!(task = %handle, "{label} succeeded");
                        if !options.quiet {
                            sink.status(
                                &format!("{label} completed successfully!"),
                                StatusTag::Success,
                            );
                        }
                        return Ok(TaskResult::success(handle.clone(), result_url));
                    }
                    VendorStatus::Failed { status, error } => {
                        let message = error.unwrap_or_else(|| status.clone());
                        return Err(GenError::VendorFailed {
                            vendor: label.to_string(),
                            status,
                            message,
                        });
                    }
                    VendorStatus::Pending { status } => {
                        let elapsed = started.elapsed().as_secs();
                        let (mins, secs) = (elapsed / 60, elapsed % 60);
                        debug!(task = %handle, %status, elapsed, "{label} still running");
                        if !options.quiet {
                            sink.status(
                                &format!("Status: {status} ({mins}m {secs}s elapsed)"),
                                StatusTag::Info,
                            );
                        }
                        thread::sleep(options.poll_interval);
                    }
                }
            }
        }
    }

    Err(GenError::TimedOut {
        vendor: label.to_string(),
        waited: options.max_wait,
    })
}

/// First URL of a non-empty list, or a non-empty URL string.
pub fn extract_result_url(label: &str, output: &Value) -> Result<String, GenError> {
    let url = match output {
        Value::Array(items) => items.first().and_then(Value::as_str),
        Value::String(url) => Some(url.as_str()),
        _ => None,
    };
    match url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => Ok(url.to_string()),
        None => Err(GenError::MalformedOutput {
            vendor: label.to_string(),
            detail: truncate_text(&output.to_string(), 256),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use genpoll_contracts::status::{NullStatus, RecordingStatus};
    use serde_json::json;

    use super::*;

    /// Replays a fixed script; once drained it repeats the last reply.
    pub(crate) struct ScriptedSource {
        replies: Mutex<VecDeque<StatusReply>>,
        last: Mutex<Option<StatusReply>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub(crate) fn new(replies: Vec<StatusReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl StatusSource for ScriptedSource {
        fn label(&self) -> &str {
            "Scripted task"
        }

        fn fetch_status(&self, _poll_target: &str) -> anyhow::Result<StatusReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(reply) => {
                    *last = Some(reply.clone());
                    Ok(reply)
                }
                None => last
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("script exhausted")),
            }
        }
    }

    pub(crate) fn succeeded(output: Value) -> StatusReply {
        StatusReply::Vendor(VendorStatus::Succeeded { output })
    }

    pub(crate) fn pending() -> StatusReply {
        StatusReply::Vendor(VendorStatus::pending("processing"))
    }

    fn http_error(code: u16) -> StatusReply {
        StatusReply::Transport {
            code: Some(code),
            detail: "upstream unavailable".to_string(),
        }
    }

    pub(crate) fn fast() -> PollOptions {
        PollOptions::new(Duration::from_secs(5), Duration::from_millis(1))
    }

    fn run(source: &ScriptedSource, options: PollOptions) -> Result<TaskResult, GenError> {
        poll_until_done(source, &TaskHandle::new("task-1"), "https://poll/1", &options, &NullStatus)
    }

    #[test]
    fn success_takes_first_url_of_list() -> anyhow::Result<()> {
        let source = ScriptedSource::new(vec![pending(), succeeded(json!(["u1", "u2"]))]);
        let result = run(&source, fast())?;
        assert_eq!(result, TaskResult::success(TaskHandle::new("task-1"), "u1"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn success_accepts_single_url_string() -> anyhow::Result<()> {
        let source = ScriptedSource::new(vec![succeeded(json!("https://cdn/v.mp4"))]);
        let result = run(&source, fast())?;
        assert_eq!(result.result_url(), Some("https://cdn/v.mp4"));
        Ok(())
    }

    #[test]
    fn empty_outputs_fail_instead_of_succeeding() {
        for output in [json!(""), json!([]), json!(null), json!({"url": "x"}), json!([1])] {
            let source = ScriptedSource::new(vec![succeeded(output)]);
            let err = run(&source, fast()).unwrap_err();
            assert!(
                matches!(err, GenError::MalformedOutput { .. }),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn vendor_failure_carries_vendor_message() {
        let source = ScriptedSource::new(vec![StatusReply::Vendor(VendorStatus::failed(
            "failed",
            Some("NSFW content detected".to_string()),
        ))]);
        let err = run(&source, fast()).unwrap_err();
        assert_eq!(err.to_string(), "Scripted task failed: NSFW content detected");
    }

    #[test]
    fn cancellation_without_message_reports_status() {
        let source = ScriptedSource::new(vec![StatusReply::Vendor(VendorStatus::failed(
            "canceled", None,
        ))]);
        let err = run(&source, fast()).unwrap_err();
        assert_eq!(err.to_string(), "Scripted task canceled: canceled");
    }

    #[test]
    fn eleven_consecutive_transport_errors_exhaust_retries() {
        let source = ScriptedSource::new(vec![http_error(503)]);
        let err = run(&source, fast()).unwrap_err();
        assert!(matches!(
            err,
            GenError::RetriesExhausted {
                retries: MAX_TRANSIENT_RETRIES,
                ..
            }
        ));
        assert_eq!(
            source.calls.load(Ordering::SeqCst),
            MAX_TRANSIENT_RETRIES as usize + 1
        );
    }

    #[test]
    fn pending_reply_resets_retry_budget() -> anyhow::Result<()> {
        let mut script = vec![http_error(502); 10];
        script.push(pending());
        script.extend(vec![http_error(502); 10]);
        script.push(succeeded(json!(["done"])));
        let source = ScriptedSource::new(script);
        let result = run(&source, fast())?;
        assert_eq!(result.result_url(), Some("done"));
        Ok(())
    }

    #[test]
    fn endless_processing_times_out_within_one_interval() {
        let source = ScriptedSource::new(vec![pending()]);
        let options = PollOptions::new(Duration::from_millis(60), Duration::from_millis(20));
        let started = Instant::now();
        let err = run(&source, options).unwrap_err();
        let elapsed = started.elapsed();
        assert!(err.is_timeout(), "unexpected error: {err}");
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(60 + 20 + 200));
    }

    #[test]
    fn zero_budget_times_out_without_querying() {
        let source = ScriptedSource::new(vec![pending()]);
        let options = PollOptions::new(Duration::ZERO, Duration::from_millis(1));
        assert!(run(&source, options).unwrap_err().is_timeout());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_transport_fetch_error_fails_fast() {
        let source = ScriptedSource::new(Vec::new());
        let err = run(&source, fast()).unwrap_err();
        assert!(matches!(err, GenError::Other(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quiet_suppresses_progress_lines_only() -> anyhow::Result<()> {
        let script = || vec![http_error(500), pending(), succeeded(json!(["u"]))];

        let loud = RecordingStatus::new();
        let source = ScriptedSource::new(script());
        let loud_result = poll_until_done(
            &source,
            &TaskHandle::new("t"),
            "p",
            &fast(),
            &loud,
        )?;
        assert_eq!(loud.count(StatusTag::Warning), 1);
        assert_eq!(loud.count(StatusTag::Info), 1);
        assert_eq!(loud.count(StatusTag::Success), 1);

        let silent = RecordingStatus::new();
        let source = ScriptedSource::new(script());
        let quiet_result = poll_until_done(
            &source,
            &TaskHandle::new("t"),
            "p",
            &fast().quiet(true),
            &silent,
        )?;
        assert!(silent.lines().is_empty());
        assert_eq!(loud_result, quiet_result);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn repolling_a_succeeded_target_is_stable() -> anyhow::Result<()> {
        let source = ScriptedSource::new(vec![succeeded(json!(["u1"]))]);
        let first = run(&source, fast())?;
        let second = run(&source, fast())?;
        assert_eq!(first, second);
        Ok(())
    }

    /// Polls a closed local port so every fetch fails at connect time.
    struct UnreachableSource {
        http: reqwest::blocking::Client,
        calls: AtomicUsize,
    }

    impl StatusSource for UnreachableSource {
        fn label(&self) -> &str {
            "Unreachable task"
        }

        fn fetch_status(&self, poll_target: &str) -> anyhow::Result<StatusReply> {
            use anyhow::Context;

            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .http
                .get(poll_target)
                .send()
                .with_context(|| format!("poll request failed ({poll_target})"))?;
            anyhow::bail!("unexpected response from closed port: {}", response.status())
        }
    }

    #[test]
    fn connection_failures_count_against_retry_budget() -> anyhow::Result<()> {
        let source = UnreachableSource {
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()?,
            calls: AtomicUsize::new(0),
        };
        let sink = RecordingStatus::new();
        let options = PollOptions::new(Duration::from_secs(60), Duration::from_millis(1));
        let err = poll_until_done(
            &source,
            &TaskHandle::new("t-conn"),
            "http://127.0.0.1:1/",
            &options,
            &sink,
        )
        .err();
        match err {
            Some(GenError::RetriesExhausted { retries, detail }) => {
                assert_eq!(retries, MAX_TRANSIENT_RETRIES);
                assert!(detail.contains("poll request failed"));
            }
            other => panic!("expected retries exhausted, got {other:?}"),
        }
        assert_eq!(sink.count(StatusTag::Warning), 10);
        assert_eq!(source.calls.load(Ordering::SeqCst), 11);
        Ok(())
    }
}
