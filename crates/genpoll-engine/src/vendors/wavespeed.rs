use anyhow::{Context, Result};
use genpoll_contracts::{GenerationKind, PollOptions};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::http::{
    api_base_from_env, json_str, non_empty_env, poll_response_json, response_json_or_error,
};
use crate::poll::{StatusReply, StatusSource, VendorStatus};
use crate::provider::{GenerationParams, GenerationRequest, Submission, VendorApi};

const IMAGE_MODELS: &[&str] = &["gpt-image-1.5"];
const VIDEO_MODELS: &[&str] = &["kling-3.0", "kling-3.0-std", "sora-2", "sora-2-pro"];

/// WaveSpeed AI. The submit response carries a dynamic polling URL.
pub struct WaveSpeedApi {
    api_base: String,
    http: HttpClient,
}

impl WaveSpeedApi {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env("WAVESPEED_API_BASE", "https://api.wavespeed.ai/api/v3"),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("WAVESPEED_API_KEY")
    }
}

impl Default for WaveSpeedApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSource for WaveSpeedApi {
    fn label(&self) -> &str {
        "WaveSpeed task"
    }

    fn fetch_status(&self, poll_target: &str) -> Result<StatusReply> {
        let api_key = Self::api_key().context("WAVESPEED_API_KEY not set")?;
        let response = self
            .http
            .get(poll_target)
            .bearer_auth(&api_key)
            .send()
            .with_context(|| format!("WaveSpeed poll request failed ({poll_target})"))?;
        Ok(match poll_response_json("WaveSpeed poll", response)? {
            Ok(payload) => StatusReply::Vendor(classify_task(&payload)),
            Err(reply) => reply,
        })
    }
}

impl VendorApi for WaveSpeedApi {
    fn provider(&self) -> &'static str {
        "wavespeed"
    }

    fn is_sync(&self, _kind: GenerationKind) -> bool {
        false
    }

    fn vendor_model(&self, request: &GenerationRequest) -> Option<&'static str> {
        let model = match &request.params {
            GenerationParams::Video(params) if request.model == "kling-3.0" && params.mode == "std" => {
                "kling-3.0-std"
            }
            _ => request.model.as_str(),
        };
        match (request.kind(), model) {
            (GenerationKind::Image, "gpt-image-1.5") => Some("openai/gpt-image-1.5/edit"),
            (GenerationKind::Video, "kling-3.0") => Some("kwaivgi/kling-v3.0-pro/image-to-video"),
            (GenerationKind::Video, "kling-3.0-std") => {
                Some("kwaivgi/kling-v3.0-std/image-to-video")
            }
            (GenerationKind::Video, "sora-2") => Some("openai/sora-2/image-to-video"),
            (GenerationKind::Video, "sora-2-pro") => Some("openai/sora-2/image-to-video-pro"),
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
        let api_key = Self::api_key().context("WAVESPEED_API_KEY not set")?;
        let payload = build_payload(request);
        let endpoint = format!("{}/{vendor_model}", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&api_key)
            .json(&Value::Object(payload))
            .send()
            .with_context(|| format!("WaveSpeed request failed ({endpoint})"))?;
        let body = response_json_or_error("WaveSpeed", response)?;
        parse_submission(&body)
    }
}

fn parse_submission(body: &Value) -> Result<Submission> {
    match (json_str(body, "/data/id"), json_str(body, "/data/urls/get")) {
        (Some(task_id), Some(poll_target)) => Ok(Submission::Pending {
            task_id: task_id.to_string(),
            poll_target: poll_target.to_string(),
        }),
        _ => anyhow::bail!("Missing id or poll URL in WaveSpeed response: {body}"),
    }
}

pub(crate) fn classify_task(body: &Value) -> VendorStatus {
    let data = body.get("data").unwrap_or(body);
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_ascii_lowercase();
    match status.as_str() {
        "completed" | "succeeded" => VendorStatus::Succeeded {
            output: data.get("outputs").cloned().unwrap_or(Value::Null),
        },
        "failed" | "canceled" => VendorStatus::failed(
            status.clone(),
            data.get("error").and_then(Value::as_str).map(str::to_string),
        ),
        _ => VendorStatus::Pending { status },
    }
}

fn build_payload(request: &GenerationRequest) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("prompt".to_string(), json!(request.prompt));
    match &request.params {
        GenerationParams::Image(params) => {
            let quality = if matches!(params.resolution.as_str(), "2K" | "4K") {
                "high"
            } else {
                "medium"
            };
            payload.insert("size".to_string(), json!(image_size(&params.aspect_ratio)));
            payload.insert("quality".to_string(), json!(quality));
            payload.insert("input_fidelity".to_string(), json!("high"));
            payload.insert("output_format".to_string(), json!("jpeg"));
            if !params.reference_urls.is_empty() {
                payload.insert("images".to_string(), json!(params.reference_urls));
            }
        }
        GenerationParams::Video(params) => {
            if request.model.starts_with("kling") {
                payload.insert("duration".to_string(), json!(params.duration_secs));
                payload.insert("cfg_scale".to_string(), json!(0.5));
                payload.insert("sound".to_string(), json!(true));
            } else {
                // Sora only accepts 4, 8 or 12 seconds.
                let duration = match params.duration_secs {
                    0..=5 => 4,
                    6..=10 => 8,
                    _ => 12,
                };
                payload.insert("duration".to_string(), json!(duration));
                if request.model == "sora-2-pro" {
                    payload.insert("resolution".to_string(), json!("1080p"));
                }
            }
            if let Some(image_url) = params.image_url.as_deref() {
                payload.insert("image".to_string(), json!(image_url));
            }
        }
    }
    payload
}

fn image_size(aspect_ratio: &str) -> &'static str {
    match aspect_ratio {
        "9:16" | "2:3" => "1024*1536",
        "16:9" | "3:2" => "1536*1024",
        "1:1" => "1024*1024",
        _ => "auto",
    }
}
