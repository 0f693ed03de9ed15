use anyhow::{Context, Result};
use genpoll_contracts::{GenerationKind, PollOptions};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::http::{
    api_base_from_env, json_str, non_empty_env, poll_response_json, response_json_or_error,
};
use crate::poll::{StatusReply, StatusSource, VendorStatus};
use crate::provider::{GenerationParams, GenerationRequest, Submission, VendorApi};

const IMAGE_MODELS: &[&str] = &["nano-banana", "nano-banana-pro"];
const VIDEO_MODELS: &[&str] = &["kling-3.0", "sora-2-pro"];

/// Kie AI jobs API. Tasks are polled through `recordInfo?taskId=`.
pub struct KieApi {
    api_base: String,
    http: HttpClient,
}

impl KieApi {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env("KIE_API_BASE", "https://api.kie.ai/api/v1"),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("KIE_API_KEY")
    }

    fn record_info_url(&self, task_id: &str) -> String {
        format!("{}/jobs/recordInfo?taskId={task_id}", self.api_base)
    }
}

impl Default for KieApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSource for KieApi {
    fn label(&self) -> &str {
        "Kie task"
    }

    fn fetch_status(&self, poll_target: &str) -> Result<StatusReply> {
        let api_key = Self::api_key().context("KIE_API_KEY not set")?;
        let response = self
            .http
            .get(poll_target)
            .bearer_auth(&api_key)
            .send()
            .with_context(|| format!("Kie poll request failed ({poll_target})"))?;
        Ok(match poll_response_json("Kie poll", response)? {
            Ok(payload) => classify_record(&payload),
            Err(reply) => reply,
        })
    }
}

impl VendorApi for KieApi {
    fn provider(&self) -> &'static str {
        "kie"
    }

    fn is_sync(&self, _kind: GenerationKind) -> bool {
        false
    }

    fn vendor_model(&self, request: &GenerationRequest) -> Option<&'static str> {
        let has_references = matches!(
            &request.params,
            GenerationParams::Image(params) if !params.reference_urls.is_empty()
        );
        match (request.kind(), request.model.as_str()) {
            (GenerationKind::Image, "nano-banana") if has_references => Some("google/nano-banana-edit"),
            (GenerationKind::Image, "nano-banana") => Some("google/nano-banana"),
            (GenerationKind::Image, "nano-banana-pro") => Some("nano-banana-pro"),
            (GenerationKind::Video, "kling-3.0") => Some("kling/v3-image-to-video"),
            (GenerationKind::Video, "sora-2-pro") => Some("sora-2-pro-image-to-video"),
            _ => None,
        }
    }

    fn models(&self, kind: GenerationKind) -> &'static [&'static str] {
        match kind {
            GenerationKind::Image => IMAGE_MODELS,
            GenerationKind::Video => VIDEO_MODELS,
        }
    }

    fn default_poll_options(&self, kind: GenerationKind) -> PollOptions {
        match kind {
            GenerationKind::Image => PollOptions::from_secs(300, 5),
            GenerationKind::Video => PollOptions::from_secs(600, 10),
        }
    }

    fn create_task(&self, request: &GenerationRequest, vendor_model: &str) -> Result<Submission> {
        let api_key = Self::api_key().context("KIE_API_KEY not set")?;
        let endpoint = format!("{}/jobs/createTask", self.api_base);
        let body = json!({
            "model": vendor_model,
            "input": build_input(request),
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .with_context(|| format!("Kie request failed ({endpoint})"))?;
        let payload = response_json_or_error("Kie", response)?;
        let task_id = parse_task_id(&payload)?;
        Ok(Submission::Pending {
            poll_target: self.record_info_url(&task_id),
            task_id,
        })
    }
}

fn parse_task_id(payload: &Value) -> Result<String> {
    let code = payload.get("code").and_then(Value::as_i64).unwrap_or(200);
    if code != 200 {
        let message = json_str(payload, "/msg").unwrap_or("unknown error");
        anyhow::bail!("Kie API error {code}: {message}");
    }
    json_str(payload, "/data/taskId")
        .map(str::to_string)
        .with_context(|| format!("Missing taskId in Kie response: {payload}"))
}

/// Kie wraps every answer in `{code, msg, data}`; a non-200 `code` is treated
/// like a failed HTTP status.
pub(crate) fn classify_record(payload: &Value) -> StatusReply {
    let code = payload.get("code").and_then(Value::as_i64).unwrap_or(200);
    if code != 200 {
        return StatusReply::Transport {
            code: u16::try_from(code).ok(),
            detail: json_str(payload, "/msg").unwrap_or("unknown error").to_string(),
        };
    }
    let Some(data) = payload.get("data") else {
        return StatusReply::Vendor(VendorStatus::pending("unknown"));
    };
    let state = data
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_ascii_lowercase();
    let status = match state.as_str() {
        "success" => VendorStatus::Succeeded {
            output: result_urls(data),
        },
        "fail" | "failed" => VendorStatus::failed(
            "failed",
            data.get("failMsg").and_then(Value::as_str).map(str::to_string),
        ),
        _ => VendorStatus::Pending { status: state },
    };
    StatusReply::Vendor(status)
}

/// `resultJson` arrives as a JSON-encoded string holding `resultUrls`.
fn result_urls(data: &Value) -> Value {
    let parsed = match data.get("resultJson") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    parsed.get("resultUrls").cloned().unwrap_or(Value::Null)
}

fn build_input(request: &GenerationRequest) -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("prompt".to_string(), json!(request.prompt));
    match &request.params {
        GenerationParams::Image(params) => {
            input.insert("aspect_ratio".to_string(), json!(params.aspect_ratio));
            input.insert("output_format".to_string(), json!("png"));
            if request.model == "nano-banana-pro" {
                input.insert("resolution".to_string(), json!(params.resolution));
            }
            if !params.reference_urls.is_empty() {
                input.insert("image_input".to_string(), json!(params.reference_urls));
            }
        }
        GenerationParams::Video(params) => {
            input.insert("duration".to_string(), json!(params.duration_secs.to_string()));
            input.insert("aspect_ratio".to_string(), json!(params.aspect_ratio));
            if let Some(image_url) = params.image_url.as_deref() {
                input.insert("image_urls".to_string(), json!([image_url]));
            }
        }
    }
    input
}
