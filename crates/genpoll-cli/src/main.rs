use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use genpoll_contracts::events::{EventPayload, EventWriter};
use genpoll_contracts::status::{ConsoleStatus, EventStatus, FanoutStatus};
use genpoll_contracts::{
    GenerationKind, ModelCatalog, PollOptions, ProviderId, StatusSink, StatusTag, TaskHandle,
    TaskResult,
};
use genpoll_engine::{
    default_provider_registry, poll_many, GenerationProvider, GenerationRequest, ImageParams,
    ProviderRegistry, VideoParams,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "genpoll", version, about = "Submit and poll image/video generation jobs")]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalog models and their providers.
    Models(ModelsArgs),
    /// Generate images.
    Image(ImageArgs),
    /// Generate videos.
    Video(VideoArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Image,
    Video,
}

impl From<KindArg> for GenerationKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Image => GenerationKind::Image,
            KindArg::Video => GenerationKind::Video,
        }
    }
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
}

#[derive(Debug, Parser)]
struct JobArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    model: Option<String>,
    /// Use this provider instead of the model's default.
    #[arg(long)]
    provider: Option<String>,
    /// Number of jobs to submit; more than one is polled in parallel.
    #[arg(long, default_value_t = 1)]
    count: usize,
    #[arg(long, default_value = "9:16")]
    aspect_ratio: String,
    /// Seconds; defaults to the provider's per-kind value.
    #[arg(long)]
    max_wait: Option<u64>,
    /// Seconds; defaults to the provider's per-kind value.
    #[arg(long)]
    poll_interval: Option<u64>,
    /// Append status lines and task events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ImageArgs {
    #[command(flatten)]
    job: JobArgs,
    #[arg(long, default_value = "1K")]
    resolution: String,
    #[arg(long = "reference")]
    reference_urls: Vec<String>,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    #[command(flatten)]
    job: JobArgs,
    /// Start frame URL.
    #[arg(long)]
    image_url: Option<String>,
    #[arg(long, default_value_t = 5)]
    duration: u32,
    #[arg(long, default_value = "pro")]
    mode: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("genpoll error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let registry = default_provider_registry();
    match cli.command {
        Command::Models(args) => {
            print_models(&registry, args.kind.map(GenerationKind::from))?;
            Ok(0)
        }
        Command::Image(args) => {
            let model = model_or_default(&args.job, GenerationKind::Image);
            let params = ImageParams {
                reference_urls: args.reference_urls,
                aspect_ratio: args.job.aspect_ratio.clone(),
                resolution: args.resolution,
            };
            let request = GenerationRequest::image(model, args.job.prompt.clone(), params);
            run_jobs(&registry, &args.job, request)
        }
        Command::Video(args) => {
            let model = model_or_default(&args.job, GenerationKind::Video);
            let params = VideoParams {
                image_url: args.image_url,
                duration_secs: args.duration,
                aspect_ratio: args.job.aspect_ratio.clone(),
                mode: args.mode,
            };
            let request = GenerationRequest::video(model, args.job.prompt.clone(), params);
            run_jobs(&registry, &args.job, request)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn model_or_default(job: &JobArgs, kind: GenerationKind) -> String {
    job.model
        .clone()
        .unwrap_or_else(|| ModelCatalog::default_model(kind).to_string())
}

fn print_models(registry: &ProviderRegistry, kind: Option<GenerationKind>) -> Result<()> {
    let kinds = match kind {
        Some(kind) => vec![kind],
        None => GenerationKind::ALL.to_vec(),
    };
    for kind in kinds {
        for entry in registry.catalog().models(kind) {
            let providers: Vec<&str> = entry.providers().map(|id| id.as_str()).collect();
            let sync = registry
                .get(entry.default_provider().as_str())
                .map(|adapter| adapter.is_sync(kind))
                .unwrap_or(false);
            let row = json!({
                "kind": kind,
                "model": entry.name(),
                "default_provider": entry.default_provider(),
                "providers": providers,
                "sync": sync,
            });
            println!("{}", serde_json::to_string(&row)?);
        }
    }
    Ok(())
}

fn run_jobs(
    registry: &ProviderRegistry,
    job: &JobArgs,
    request: GenerationRequest,
) -> Result<i32> {
    if job.count == 0 {
        bail!("--count must be at least 1");
    }
    let kind = request.kind();
    let (provider_id, adapter) =
        registry.resolve(kind, &request.model, job.provider.as_deref())?;
    info!(provider = %provider_id, model = %request.model, %kind, count = job.count, "resolved provider");
    run_with_adapter(&provider_id, adapter.as_ref(), job, &request)
}

fn run_with_adapter(
    provider_id: &ProviderId,
    adapter: &dyn GenerationProvider,
    job: &JobArgs,
    request: &GenerationRequest,
) -> Result<i32> {
    let kind = request.kind();
    let events = job
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, format!("genpoll-{}", Uuid::new_v4())));
    let mut sink = FanoutStatus::new();
    sink.push(ConsoleStatus);
    if let Some(writer) = events.clone() {
        sink.push(EventStatus::new(writer));
    }

    // Jobs accepted before a failed submit are still polled; their handles
    // do not outlive this process.
    let mut handles = Vec::with_capacity(job.count);
    let mut submit_error = None;
    for attempt in 1..=job.count {
        match adapter.submit(request) {
            Ok(handle) => {
                emit(
                    events.as_ref(),
                    "task_submitted",
                    json!({
                        "task_id": handle,
                        "provider": provider_id,
                        "model": request.model,
                        "kind": kind,
                    }),
                )?;
                handles.push(handle);
            }
            Err(err) => {
                warn!(provider = %provider_id, attempt, "submit failed: {err}");
                sink.status(
                    &format!("Submit {attempt}/{} failed: {err}", job.count),
                    StatusTag::Error,
                );
                emit(
                    events.as_ref(),
                    "task_submit_failed",
                    json!({
                        "provider": provider_id,
                        "model": request.model,
                        "kind": kind,
                        "error": err.to_string(),
                    }),
                )?;
                submit_error = Some(err);
                break;
            }
        }
    }
    let submit_failed = submit_error.is_some();
    if handles.is_empty() {
        if let Some(err) = submit_error {
            return Err(err.into());
        }
    }

    let options = poll_options(adapter, kind, job);
    let results = if let [handle] = handles.as_slice() {
        let result = match adapter.poll(handle, &options, &sink) {
            Ok(result) => result,
            Err(err) => {
                sink.status(&format!("Task {handle} failed: {err}"), StatusTag::Error);
                TaskResult::error(handle.clone(), err.to_string())
            }
        };
        vec![(handle.clone(), result)]
    } else {
        poll_many(adapter, &handles, &options, &sink)
            .into_iter()
            .collect()
    };

    let mut failures = 0;
    for handle in &handles {
        let Some(result) = result_for(&results, handle) else {
            continue;
        };
        if !result.is_success() {
            failures += 1;
        }
        emit(events.as_ref(), "task_finished", serde_json::to_value(result)?)?;
        println!("{}", serde_json::to_string(result)?);
    }
    report_summary(&sink, handles.len(), failures);
    Ok(if failures == 0 && !submit_failed { 0 } else { 1 })
}

fn poll_options(
    adapter: &dyn GenerationProvider,
    kind: GenerationKind,
    job: &JobArgs,
) -> PollOptions {
    let mut options = if job.count > 1 {
        PollOptions::batch_default()
    } else {
        adapter.default_poll_options(kind)
    };
    if let Some(max_wait) = job.max_wait {
        options.max_wait = Duration::from_secs(max_wait);
    }
    if let Some(poll_interval) = job.poll_interval {
        options.poll_interval = Duration::from_secs(poll_interval.max(1));
    }
    options
}

fn report_summary(sink: &dyn StatusSink, total: usize, failures: usize) {
    if failures == 0 {
        sink.status(&format!("All {total} task(s) succeeded"), StatusTag::Success);
    } else {
        sink.status(
            &format!("{failures} of {total} task(s) failed"),
            StatusTag::Error,
        );
    }
}

fn emit(events: Option<&EventWriter>, event_type: &str, payload: Value) -> Result<()> {
    let Some(writer) = events else {
        return Ok(());
    };
    let payload = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = EventPayload::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    writer.emit(event_type, payload)?;
    Ok(())
}

fn result_for<'a>(
    results: &'a [(TaskHandle, TaskResult)],
    handle: &TaskHandle,
) -> Option<&'a TaskResult> {
    results
        .iter()
        .find(|(id, _)| id == handle)
        .map(|(_, result)| result)
}
