use anyhow::{Context, Result};
use genpoll_contracts::{GenerationKind, PollOptions};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::http::{
    api_base_from_env, json_str, non_empty_env, poll_response_json, response_json_or_error,
};
use crate::poll::{StatusReply, StatusSource, VendorStatus};
use crate::provider::{GenerationParams, GenerationRequest, Submission, VendorApi, VideoParams};

const IMAGE_MODELS: &[&str] = &["flux-schnell", "flux-dev"];
const VIDEO_MODELS: &[&str] = &["ltx-video", "wan-2.1", "cogvideox", "minimax-video"];

/// Replicate predictions API. Every model is submit-then-poll.
pub struct ReplicateApi {
    api_base: String,
    http: HttpClient,
}

impl ReplicateApi {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env("REPLICATE_API_BASE", "https://api.replicate.com/v1"),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("REPLICATE_API_TOKEN").or_else(|| non_empty_env("REPLICATE_API_KEY"))
    }

    fn predictions_endpoint(&self, model_path: &str) -> String {
        format!("{}/models/{model_path}/predictions", self.api_base)
    }
}

impl Default for ReplicateApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSource for ReplicateApi {
    fn label(&self) -> &str {
        "Replicate prediction"
    }

    fn fetch_status(&self, poll_target: &str) -> Result<StatusReply> {
        let api_key = Self::api_key().context("REPLICATE_API_TOKEN not set")?;
        let response = self
            .http
            .get(poll_target)
            .header(reqwest::header::AUTHORIZATION, format!("Token {api_key}"))
            .send()
            .with_context(|| format!("Replicate poll request failed ({poll_target})"))?;
        Ok(match poll_response_json("Replicate poll", response)? {
            Ok(payload) => StatusReply::Vendor(classify_prediction(&payload)),
            Err(reply) => reply,
        })
    }
}

impl VendorApi for ReplicateApi {
    fn provider(&self) -> &'static str {
        "replicate"
    }

    fn is_sync(&self, _kind: GenerationKind) -> bool {
        false
    }

    fn vendor_model(&self, request: &GenerationRequest) -> Option<&'static str> {
        match (request.kind(), request.model.as_str()) {
            (GenerationKind::Image, "flux-schnell") => Some("black-forest-labs/flux-schnell"),
            (GenerationKind::Image, "flux-dev") => Some("black-forest-labs/flux-dev"),
            (GenerationKind::Video, "ltx-video") => Some("lightricks/ltx-video"),
            (GenerationKind::Video, "wan-2.1") => Some("wavespeed-ai/wan2.1-i2v-480p"),
            (GenerationKind::Video, "cogvideox") => Some("fofr/cogvideox-5b"),
            (GenerationKind::Video, "minimax-video") => Some("minimax/video-01-live"),
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
        let api_key = Self::api_key().context("REPLICATE_API_TOKEN not set")?;
        let input = build_input(request);
        let endpoint = self.predictions_endpoint(vendor_model);
        let response = self
            .http
            .post(&endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Token {api_key}"))
            .json(&json!({ "input": input }))
            .send()
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let prediction = response_json_or_error("Replicate", response)?;
        parse_submission(&prediction)
    }
}

fn parse_submission(prediction: &Value) -> Result<Submission> {
    match (json_str(prediction, "/id"), json_str(prediction, "/urls/get")) {
        (Some(task_id), Some(poll_target)) => Ok(Submission::Pending {
            task_id: task_id.to_string(),
            poll_target: poll_target.to_string(),
        }),
        _ => anyhow::bail!("Missing id or poll URL in Replicate response: {prediction}"),
    }
}

pub(crate) fn classify_prediction(payload: &Value) -> VendorStatus {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_ascii_lowercase();
    match status.as_str() {
        "succeeded" => VendorStatus::Succeeded {
            output: payload.get("output").cloned().unwrap_or(Value::Null),
        },
        "failed" | "canceled" => VendorStatus::failed(
            status.clone(),
            payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        _ => VendorStatus::Pending { status },
    }
}

fn build_input(request: &GenerationRequest) -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("prompt".to_string(), json!(request.prompt));
    match &request.params {
        GenerationParams::Image(params) => {
            let quality = if matches!(params.resolution.as_str(), "2K" | "4K") {
                90
            } else {
                80
            };
            input.insert(
                "aspect_ratio".to_string(),
                json!(flux_aspect_ratio(&params.aspect_ratio)),
            );
            input.insert("num_outputs".to_string(), json!(1));
            input.insert("output_format".to_string(), json!("jpg"));
            input.insert("output_quality".to_string(), json!(quality));
            if request.model == "flux-dev" {
                input.insert("guidance".to_string(), json!(3.5));
            }
        }
        GenerationParams::Video(params) => insert_video_input(&mut input, &request.model, params),
    }
    input
}

fn insert_video_input(input: &mut Map<String, Value>, model: &str, params: &VideoParams) {
    let (frames_per_second, max_frames) = match model {
        "ltx-video" => (24, 257),
        "wan-2.1" => (16, 81),
        "cogvideox" => (8, 49),
        _ => (0, 0),
    };
    if max_frames > 0 {
        let frames = (params.duration_secs.saturating_mul(frames_per_second)).min(max_frames);
        input.insert("num_frames".to_string(), json!(frames));
    }
    if let Some(image_url) = params.image_url.as_deref() {
        let key = if model == "minimax-video" {
            "first_frame_image"
        } else {
            "image"
        };
        input.insert(key.to_string(), json!(image_url));
    }
}

fn flux_aspect_ratio(raw: &str) -> &'static str {
    match raw {
        "16:9" => "16:9",
        "1:1" => "1:1",
        "2:3" => "2:3",
        "3:2" => "3:2",
        "4:5" => "4:5",
        _ => "9:16",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provider::ImageParams;

    #[test]
    fn classifies_prediction_statuses() {
        assert_eq!(
            classify_prediction(&json!({"status": "succeeded", "output": ["a", "b"]})),
            VendorStatus::Succeeded {
                output: json!(["a", "b"])
            }
        );
        assert_eq!(
            classify_prediction(&json!({"status": "failed", "error": "OOM"})),
            VendorStatus::failed("failed", Some("OOM".to_string()))
        );
        assert_eq!(
            classify_prediction(&json!({"status": "canceled", "error": null})),
            VendorStatus::failed("canceled", None)
        );
        assert_eq!(
            classify_prediction(&json!({"status": "starting"})),
            VendorStatus::pending("starting")
        );
        assert_eq!(classify_prediction(&json!({})), VendorStatus::pending("unknown"));
    }

    #[test]
    fn submission_requires_id_and_poll_url() -> anyhow::Result<()> {
        let submission = parse_submission(&json!({
            "id": "pred-1",
            "urls": {"get": "https://api.replicate.com/v1/predictions/pred-1"}
        }))?;
        assert_eq!(
            submission,
            Submission::Pending {
                task_id: "pred-1".to_string(),
                poll_target: "https://api.replicate.com/v1/predictions/pred-1".to_string(),
            }
        );
        assert!(parse_submission(&json!({"id": "pred-1"})).is_err());
        Ok(())
    }

    #[test]
    fn flux_dev_input_adds_guidance_and_quality() {
        let request = GenerationRequest::image(
            "flux-dev",
            "cat",
            ImageParams {
                resolution: "4K".to_string(),
                aspect_ratio: "21:9".to_string(),
                ..ImageParams::default()
            },
        );
        let input = build_input(&request);
        assert_eq!(input["output_quality"], json!(90));
        assert_eq!(input["guidance"], json!(3.5));
        assert_eq!(input["aspect_ratio"], json!("9:16"));
    }

    #[test]
    fn video_input_caps_frame_count() {
        let params = VideoParams {
            duration_secs: 20,
            image_url: Some("https://img/start.png".to_string()),
            ..VideoParams::default()
        };
        let request = GenerationRequest::video("wan-2.1", "surf", params.clone());
        let input = build_input(&request);
        assert_eq!(input["num_frames"], json!(81));
        assert_eq!(input["image"], json!("https://img/start.png"));

        let request = GenerationRequest::video("minimax-video", "surf", params);
        let input = build_input(&request);
        assert!(input.get("num_frames").is_none());
        assert_eq!(input["first_frame_image"], json!("https://img/start.png"));
    }

    #[test]
    fn vendor_model_is_kind_specific() {
        let api = ReplicateApi::new();
        let image = GenerationRequest::image("ltx-video", "x", ImageParams::default());
        assert_eq!(api.vendor_model(&image), None);
        let video = GenerationRequest::video("ltx-video", "x", VideoParams::default());
        assert_eq!(api.vendor_model(&video), Some("lightricks/ltx-video"));
    }
}
