//! Parallel polling of many handles against one adapter.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread;

use genpoll_contracts::{GenError, PollOptions, StatusSink, StatusTag, TaskHandle, TaskResult};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::provider::GenerationProvider;

/// Upper bound on concurrent poll loops.
pub const MAX_PARALLEL_POLLS: usize = 20;

pub type PollResults = IndexMap<TaskHandle, TaskResult>;

/// Polls every handle to a terminal state with at most
/// `min(handles.len(), MAX_PARALLEL_POLLS)` loops in flight.
///
/// Never fails: each task's error, timeout or panic becomes a
/// [`TaskResult::Error`] under that task's handle. Entries are inserted in
/// completion order. Duplicate handles are polled once.
pub fn poll_many(
    provider: &dyn GenerationProvider,
    handles: &[TaskHandle],
    options: &PollOptions,
    sink: &dyn StatusSink,
) -> PollResults {
    poll_many_with_limit(provider, handles, options, sink, MAX_PARALLEL_POLLS)
}

pub fn poll_many_with_limit(
    provider: &dyn GenerationProvider,
    handles: &[TaskHandle],
    options: &PollOptions,
    sink: &dyn StatusSink,
    max_workers: usize,
) -> PollResults {
    let mut unique: Vec<&TaskHandle> = Vec::with_capacity(handles.len());
    for handle in handles {
        if !unique.contains(&handle) {
            unique.push(handle);
        }
    }
    let mut results = PollResults::with_capacity(unique.len());
    if unique.is_empty() {
        return results;
    }

    let total = unique.len();
    let workers = total.min(max_workers.max(1));
    let task_options = options.quiet(true);
    let queue = Mutex::new(unique.into_iter().collect::<VecDeque<_>>());
    let (tx, rx) = mpsc::channel::<(TaskHandle, Result<TaskResult, GenError>)>();
    debug!(provider = %provider.id(), total, workers, "polling tasks in parallel");

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let task_options = &task_options;
            scope.spawn(move || loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some(handle) = next else {
                    break;
                };
                let outcome = poll_isolated(provider, handle, task_options, sink);
                if tx.send((handle.clone(), outcome)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        for (handle, outcome) in rx {
            let completed = results.len() + 1;
            let result = match outcome {
                Ok(result) => {
                    sink.status(
                        &format!("Task {}... done ({completed}/{total})", handle.short()),
                        StatusTag::Success,
                    );
                    result
                }
                Err(err) => {
                    warn!(provider = %provider.id(), task = %handle, "task failed: {err}");
                    sink.status(
                        &format!("Task {}... failed: {err}", handle.short()),
                        StatusTag::Error,
                    );
                    TaskResult::error(handle.clone(), err.to_string())
                }
            };
            results.insert(handle, result);
        }
    });

    results
}

fn poll_isolated(
    provider: &dyn GenerationProvider,
    handle: &TaskHandle,
    options: &PollOptions,
    sink: &dyn StatusSink,
) -> Result<TaskResult, GenError> {
    match panic::catch_unwind(AssertUnwindSafe(|| provider.poll(handle, options, sink))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(GenError::Panicked {
            handle: handle.clone(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}
