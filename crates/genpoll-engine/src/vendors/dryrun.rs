use anyhow::Result;
use genpoll_contracts::{GenerationKind, PollOptions};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::poll::{StatusReply, StatusSource};
use crate::provider::{GenerationRequest, Submission, VendorApi};

const IMAGE_MODELS: &[&str] = &["dryrun-image-1"];
const VIDEO_MODELS: &[&str] = &["dryrun-video-1"];

/// Offline provider. Every submission completes immediately with a
/// deterministic `dryrun://` URL derived from the request.
#[derive(Debug, Default)]
pub struct DryrunApi;

impl DryrunApi {
    pub fn new() -> Self {
        Self
    }
}

impl StatusSource for DryrunApi {
    fn label(&self) -> &str {
        "Dryrun task"
    }

    fn fetch_status(&self, poll_target: &str) -> Result<StatusReply> {
        anyhow::bail!("dryrun tasks complete at submission; nothing to poll at {poll_target}")
    }
}

impl VendorApi for DryrunApi {
    fn provider(&self) -> &'static str {
        "dryrun"
    }

    fn is_sync(&self, _kind: GenerationKind) -> bool {
        true
    }

    fn vendor_model(&self, request: &GenerationRequest) -> Option<&'static str> {
        self.models(request.kind())
            .iter()
            .copied()
            .find(|model| *model == request.model)
    }

    fn models(&self, kind: GenerationKind) -> &'static [&'static str] {
        match kind {
            GenerationKind::Image => IMAGE_MODELS,
            GenerationKind::Video => VIDEO_MODELS,
        }
    }

    fn default_poll_options(&self, _kind: GenerationKind) -> PollOptions {
        PollOptions::from_secs(1, 1)
    }

    fn create_task(&self, request: &GenerationRequest, vendor_model: &str) -> Result<Submission> {
        let kind = request.kind();
        let ext = match kind {
            GenerationKind::Image => "png",
            GenerationKind::Video => "mp4",
        };
        let digest = stable_hash(&json!({
            "model": vendor_model,
            "prompt": request.prompt,
            "params": format!("{:?}", request.params),
        }));
        Ok(Submission::Complete {
            task_id: format!("dryrun-{}", Uuid::new_v4()),
            result_url: format!("dryrun://{kind}/{}.{ext}", &digest[..16]),
        })
    }
}

fn stable_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
