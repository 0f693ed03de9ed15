use anyhow::{bail, Context, Result};
use genpoll_contracts::{GenerationKind, PollOptions};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::http::{
    api_base_from_env, json_str, non_empty_env, poll_response_json, response_json_or_error,
};
use crate::poll::{StatusReply, StatusSource, VendorStatus};
use crate::provider::{
    GenerationParams, GenerationRequest, ImageParams, Submission, VendorApi, VideoParams,
};

const IMAGE_MODELS: &[&str] = &["nano-banana", "nano-banana-pro"];
const VIDEO_MODELS: &[&str] = &["veo-3.1"];

/// Gemini API. Images come back inline from `generateContent`; Veo runs as a
/// long-running operation that is polled by name.
pub struct GoogleApi {
    api_base: String,
    http: HttpClient,
}

impl GoogleApi {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn generate_image(
        &self,
        api_key: &str,
        request: &GenerationRequest,
        params: &ImageParams,
        vendor_model: &str,
    ) -> Result<Submission> {
        let endpoint = format!("{}/models/{vendor_model}:generateContent", self.api_base);
        let mut parts = vec![json!({ "text": request.prompt })];
        for url in &params.reference_urls {
            parts.push(json!({
                "fileData": { "mimeType": mime_for_url(url), "fileUri": url }
            }));
        }
        let mut image_config = json!({ "aspectRatio": params.aspect_ratio });
        if request.model == "nano-banana-pro" {
            image_config["imageSize"] = json!(params.resolution);
        }
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": image_config,
            },
        });
        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let payload = response_json_or_error("Gemini", response)?;
        let result_url = inline_image_data_url(&payload)?;
        let task_id = json_str(&payload, "/responseId")
            .map(str::to_string)
            .unwrap_or_else(|| format!("gemini-{}", Uuid::new_v4()));
        Ok(Submission::Complete {
            task_id,
            result_url,
        })
    }

    fn start_video(
        &self,
        api_key: &str,
        request: &GenerationRequest,
        params: &VideoParams,
        vendor_model: &str,
    ) -> Result<Submission> {
        let endpoint = format!("{}/models/{vendor_model}:predictLongRunning", self.api_base);
        let mut instance = json!({ "prompt": request.prompt });
        if let Some(image_url) = params.image_url.as_deref() {
            if image_url.starts_with("gs://") {
                instance["image"] = json!({ "gcsUri": image_url, "mimeType": mime_for_url(image_url) });
            } else {
                warn!(image_url, "Veo start frames must be gs:// URIs; generating from prompt only");
            }
        }
        let body = json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": veo_aspect_ratio(&params.aspect_ratio),
                "durationSeconds": veo_duration(params.duration_secs),
            },
        });
        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .with_context(|| format!("Veo request failed ({endpoint})"))?;
        let payload = response_json_or_error("Veo", response)?;
        let Some(name) = json_str(&payload, "/name") else {
            bail!("Missing operation name in Veo response: {payload}");
        };
        Ok(Submission::Pending {
            task_id: name.to_string(),
            poll_target: format!("{}/{name}", self.api_base),
        })
    }
}

impl Default for GoogleApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSource for GoogleApi {
    fn label(&self) -> &str {
        "Google operation"
    }

    fn fetch_status(&self, poll_target: &str) -> Result<StatusReply> {
        let api_key = Self::api_key().context("GEMINI_API_KEY not set")?;
        let response = self
            .http
            .get(poll_target)
            .header("x-goog-api-key", &api_key)
            .send()
            .with_context(|| format!("Veo poll request failed ({poll_target})"))?;
        Ok(match poll_response_json("Veo poll", response)? {
            Ok(payload) => StatusReply::Vendor(classify_operation(&payload)),
            Err(reply) => reply,
        })
    }
}

impl VendorApi for GoogleApi {
    fn provider(&self) -> &'static str {
        "google"
    }

    fn is_sync(&self, kind: GenerationKind) -> bool {
        kind == GenerationKind::Image
    }

    fn vendor_model(&self, request: &GenerationRequest) -> Option<&'static str> {
        match (request.kind(), request.model.as_str()) {
            (GenerationKind::Image, "nano-banana") => Some("gemini-2.5-flash-image"),
            (GenerationKind::Image, "nano-banana-pro") => Some("gemini-3-pro-image-preview"),
            (GenerationKind::Video, "veo-3.1") => Some("veo-3.1-generate-preview"),
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
            GenerationKind::Image => PollOptions::from_secs(120, 3),
            GenerationKind::Video => PollOptions::from_secs(600, 10),
        }
    }

    fn create_task(&self, request: &GenerationRequest, vendor_model: &str) -> Result<Submission> {
        let api_key = Self::api_key().context("GEMINI_API_KEY not set")?;
        match &request.params {
            GenerationParams::Image(params) => {
                self.generate_image(&api_key, request, params, vendor_model)
            }
            GenerationParams::Video(params) => {
                self.start_video(&api_key, request, params, vendor_model)
            }
        }
    }
}

pub(crate) fn classify_operation(payload: &Value) -> VendorStatus {
    let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
    if !done {
        let state = json_str(payload, "/metadata/state").unwrap_or("running");
        return VendorStatus::pending(state.to_ascii_lowercase());
    }
    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        return VendorStatus::failed("failed", message);
    }
    let samples = payload
        .pointer("/response/generateVideoResponse/generatedSamples")
        .and_then(Value::as_array);
    let output = samples
        .map(|rows| {
            Value::Array(
                rows.iter()
                    .filter_map(|row| row.pointer("/video/uri").cloned())
                    .collect(),
            )
        })
        .unwrap_or(Value::Null);
    VendorStatus::Succeeded { output }
}

fn inline_image_data_url(payload: &Value) -> Result<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let Some(data) = json_str(inline, "/data") else {
            continue;
        };
        let mime = json_str(inline, "/mimeType")
            .or_else(|| json_str(inline, "/mime_type"))
            .unwrap_or("image/png");
        return Ok(format!("data:{mime};base64,{data}"));
    }
    let reason = json_str(payload, "/candidates/0/finishReason")
        .or_else(|| json_str(payload, "/promptFeedback/blockReason"))
        .unwrap_or("no image part");
    bail!("Gemini returned no image ({reason})")
}

fn veo_aspect_ratio(raw: &str) -> &'static str {
    match raw {
        "16:9" | "3:2" | "4:3" => "16:9",
        _ => "9:16",
    }
}

fn veo_duration(requested: u32) -> u32 {
    match requested {
        0..=4 => 4,
        5..=6 => 6,
        _ => 8,
    }
}

fn mime_for_url(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn running_operation_is_pending() {
        assert_eq!(
            classify_operation(&json!({"name": "models/veo/operations/op-1"})),
            VendorStatus::pending("running")
        );
        assert_eq!(
            classify_operation(&json!({"done": false})),
            VendorStatus::pending("running")
        );
    }

    #[test]
    fn finished_operation_lists_video_uris() {
        let status = classify_operation(&json!({
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [
                {"video": {"uri": "https://files/v1.mp4"}},
                {"video": {"uri": "https://files/v2.mp4"}}
            ]}}
        }));
        assert_eq!(
            status,
            VendorStatus::Succeeded {
                output: json!(["https://files/v1.mp4", "https://files/v2.mp4"])
            }
        );
    }

    #[test]
    fn finished_operation_with_error_fails() {
        let status = classify_operation(&json!({
            "done": true,
            "error": {"code": 400, "message": "prompt blocked"}
        }));
        assert_eq!(
            status,
            VendorStatus::failed("failed", Some("prompt blocked".to_string()))
        );
    }

    #[test]
    fn inline_image_becomes_data_url() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{"content": {"parts": [
                {"text": "here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
            ]}}]
        });
        assert_eq!(
            inline_image_data_url(&payload)?,
            "data:image/png;base64,iVBORw0KGgo="
        );
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = inline_image_data_url(&blocked)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert_eq!(err, "Gemini returned no image (SAFETY)");
        Ok(())
    }

    #[test]
    fn image_generation_is_synchronous_video_is_not() {
        let api = GoogleApi::new();
        assert!(api.is_sync(GenerationKind::Image));
        assert!(!api.is_sync(GenerationKind::Video));
    }

    #[test]
    fn veo_parameters_snap_to_supported_values() {
        assert_eq!(veo_duration(5), 6);
        assert_eq!(veo_duration(12), 8);
        assert_eq!(veo_aspect_ratio("1:1"), "9:16");
        assert_eq!(veo_aspect_ratio("16:9"), "16:9");
    }
}
