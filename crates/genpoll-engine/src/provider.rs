use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use genpoll_contracts::{
    GenError, GenerationKind, PollOptions, ProviderId, StatusSink, TaskHandle, TaskResult,
};
use tracing::info;

use crate::poll::{poll_until_done, StatusSource};

#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    pub reference_urls: Vec<String>,
    pub aspect_ratio: String,
    /// `1K`, `2K` or `4K`.
    pub resolution: String,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            reference_urls: Vec::new(),
            aspect_ratio: "9:16".to_string(),
            resolution: "1K".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    /// Start frame.
    pub image_url: Option<String>,
    pub duration_secs: u32,
    pub aspect_ratio: String,
    /// Kling quality mode, `std` or `pro`.
    pub mode: String,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            image_url: None,
            duration_secs: 5,
            aspect_ratio: "9:16".to_string(),
            mode: "pro".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationParams {
    Image(ImageParams),
    Video(VideoParams),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn image(model: impl Into<String>, prompt: impl Into<String>, params: ImageParams) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            params: GenerationParams::Image(params),
        }
    }

    pub fn video(model: impl Into<String>, prompt: impl Into<String>, params: VideoParams) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            params: GenerationParams::Video(params),
        }
    }

    pub fn kind(&self) -> GenerationKind {
        match self.params {
            GenerationParams::Image(_) => GenerationKind::Image,
            GenerationParams::Video(_) => GenerationKind::Video,
        }
    }
}

/// Capability contract every vendor adapter implements.
pub trait GenerationProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    /// True when `submit` already produces the terminal result for `kind`.
    fn is_sync(&self, kind: GenerationKind) -> bool;

    fn supported_models(&self, kind: GenerationKind) -> Vec<String>;

    fn default_poll_options(&self, kind: GenerationKind) -> PollOptions;

    /// Starts a job. The handle is recorded before it is returned.
    fn submit(&self, request: &GenerationRequest) -> Result<TaskHandle, GenError>;

    /// Drives one handle to a terminal state. Fails fast on every non-success.
    fn poll(
        &self,
        handle: &TaskHandle,
        options: &PollOptions,
        sink: &dyn StatusSink,
    ) -> Result<TaskResult, GenError>;
}

/// What a vendor answered to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Pending {
        task_id: String,
        poll_target: String,
    },
    Complete {
        task_id: String,
        result_url: String,
    },
}

/// Vendor-specific half of an adapter: model tables, payload building,
/// and status classification.
pub trait VendorApi: StatusSource {
    fn provider(&self) -> &'static str;

    fn is_sync(&self, kind: GenerationKind) -> bool;

    /// Vendor model path for a logical model name.
    fn vendor_model(&self, request: &GenerationRequest) -> Option<&'static str>;

    fn models(&self, kind: GenerationKind) -> &'static [&'static str];

    fn default_poll_options(&self, kind: GenerationKind) -> PollOptions;

    fn create_task(
        &self,
        request: &GenerationRequest,
        vendor_model: &str,
    ) -> anyhow::Result<Submission>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingTask {
    Poll(String),
    Done(String),
}

/// Handle to poll-target map owned by one adapter instance.
///
/// Entries are written once by `submit` and only read afterwards.
#[derive(Debug, Default)]
pub struct PendingTasks {
    tasks: RwLock<HashMap<TaskHandle, PendingTask>>,
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, handle: TaskHandle, task: PendingTask) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, task);
    }

    fn get(&self, handle: &TaskHandle) -> Option<PendingTask> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    pub fn contains(&self, handle: &TaskHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adapter for submit-then-poll vendors, generic over the vendor glue.
pub struct PollingProvider<V: VendorApi> {
    id: ProviderId,
    api: V,
    pending: PendingTasks,
}

impl<V: VendorApi> PollingProvider<V> {
    pub fn new(api: V) -> Self {
        Self {
            id: ProviderId::new(api.provider()),
            api,
            pending: PendingTasks::new(),
        }
    }

    pub fn api(&self) -> &V {
        &self.api
    }

    pub fn pending(&self) -> &PendingTasks {
        &self.pending
    }
}

impl<V: VendorApi> GenerationProvider for PollingProvider<V> {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn is_sync(&self, kind: GenerationKind) -> bool {
        self.api.is_sync(kind)
    }

    fn supported_models(&self, kind: GenerationKind) -> Vec<String> {
        self.api
            .models(kind)
            .iter()
            .map(|model| (*model).to_string())
            .collect()
    }

    fn default_poll_options(&self, kind: GenerationKind) -> PollOptions {
        self.api.default_poll_options(kind)
    }

    fn submit(&self, request: &GenerationRequest) -> Result<TaskHandle, GenError> {
        let kind = request.kind();
        let Some(vendor_model) = self.api.vendor_model(request) else {
            return Err(GenError::UnsupportedModel {
                provider: self.id.clone(),
                kind,
                model: request.model.clone(),
                available: self.supported_models(kind),
            });
        };

        let submission = self.api.create_task(request, vendor_model)?;
        let (handle, task) = match submission {
            Submission::Pending {
                task_id,
                poll_target,
            } => (TaskHandle::new(task_id), PendingTask::Poll(poll_target)),
            Submission::Complete {
                task_id,
                result_url,
            } => (TaskHandle::new(task_id), PendingTask::Done(result_url)),
        };
        self.pending.record(handle.clone(), task);
        info!(provider = %self.id, %kind, model = %request.model, task = %handle, "submitted generation task");
        Ok(handle)
    }

    fn poll(
        &self,
        handle: &TaskHandle,
        options: &PollOptions,
        sink: &dyn StatusSink,
    ) -> Result<TaskResult, GenError> {
        match self.pending.get(handle) {
            Some(PendingTask::Poll(poll_target)) => {
                poll_until_done(&self.api, handle, &poll_target, options, sink)
            }
            Some(PendingTask::Done(result_url)) => {
                Ok(TaskResult::success(handle.clone(), result_url))
            }
            None => Err(GenError::UnknownHandle {
                provider: self.id.clone(),
                handle: handle.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use genpoll_contracts::status::NullStatus;
    use serde_json::json;

    use super::*;
    use crate::poll::tests::{fast, pending, succeeded};
    use crate::poll::StatusReply;

    struct FakeVendor {
        sync: bool,
        created: AtomicUsize,
        replies: Mutex<Vec<StatusReply>>,
    }

    impl FakeVendor {
        fn new(sync: bool, replies: Vec<StatusReply>) -> Self {
            Self {
                sync,
                created: AtomicUsize::new(0),
                replies: Mutex::new(replies),
            }
        }
    }

    impl StatusSource for FakeVendor {
        fn label(&self) -> &str {
            "Fake task"
        }

        fn fetch_status(&self, poll_target: &str) -> anyhow::Result<StatusReply> {
            assert!(poll_target.starts_with("https://fake/poll/"));
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                Ok(replies.remove(0))
            } else {
                replies
                    .first()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no replies"))
            }
        }
    }

    impl VendorApi for FakeVendor {
        fn provider(&self) -> &'static str {
            "fake"
        }

        fn is_sync(&self, _kind: GenerationKind) -> bool {
            self.sync
        }

        fn vendor_model(&self, request: &GenerationRequest) -> Option<&'static str> {
            match (request.kind(), request.model.as_str()) {
                (GenerationKind::Image, "fake-image") => Some("vendor/fake-image"),
                _ => None,
            }
        }

        fn models(&self, kind: GenerationKind) -> &'static [&'static str] {
            match kind {
                GenerationKind::Image => &["fake-image"],
                GenerationKind::Video => &[],
            }
        }

        fn default_poll_options(&self, _kind: GenerationKind) -> PollOptions {
            fast()
        }

        fn create_task(
            &self,
            _request: &GenerationRequest,
            vendor_model: &str,
        ) -> anyhow::Result<Submission> {
            assert_eq!(vendor_model, "vendor/fake-image");
            let idx = self.created.fetch_add(1, Ordering::SeqCst);
            if self.sync {
                return Ok(Submission::Complete {
                    task_id: format!("sync-{idx}"),
                    result_url: format!("https://fake/out/{idx}.png"),
                });
            }
            Ok(Submission::Pending {
                task_id: format!("task-{idx}"),
                poll_target: format!("https://fake/poll/{idx}"),
            })
        }
    }

    fn image_request(model: &str) -> GenerationRequest {
        GenerationRequest::image(model, "a lighthouse at dusk", ImageParams::default())
    }

    #[test]
    fn submit_records_handle_before_returning() -> anyhow::Result<()> {
        let provider = PollingProvider::new(FakeVendor::new(false, vec![succeeded(json!(["u"]))]));
        let handle = provider.submit(&image_request("fake-image"))?;
        assert!(provider.pending().contains(&handle));
        let result = provider.poll(&handle, &fast(), &NullStatus)?;
        assert_eq!(result.result_url(), Some("u"));
        Ok(())
    }

    #[test]
    fn submit_rejects_model_outside_adapter_subset() {
        let provider = PollingProvider::new(FakeVendor::new(false, Vec::new()));
        let err = provider
            .submit(&image_request("flux-dev"))
            .unwrap_err();
        match err {
            GenError::UnsupportedModel {
                provider, available, ..
            } => {
                assert_eq!(provider.as_str(), "fake");
                assert_eq!(available, vec!["fake-image".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(provider.pending().is_empty());
    }

    #[test]
    fn poll_rejects_handle_from_another_adapter() -> anyhow::Result<()> {
        let issuer = PollingProvider::new(FakeVendor::new(false, vec![pending()]));
        let other = PollingProvider::new(FakeVendor::new(false, vec![pending()]));
        let handle = issuer.submit(&image_request("fake-image"))?;
        let err = other.poll(&handle, &fast(), &NullStatus).unwrap_err();
        assert!(matches!(err, GenError::UnknownHandle { .. }));
        Ok(())
    }

    #[test]
    fn sync_provider_poll_echoes_submit_result() -> anyhow::Result<()> {
        let provider = PollingProvider::new(FakeVendor::new(true, Vec::new()));
        assert!(provider.is_sync(GenerationKind::Image));
        let handle = provider.submit(&image_request("fake-image"))?;
        let first = provider.poll(&handle, &fast(), &NullStatus)?;
        let second = provider.poll(&handle, &fast(), &NullStatus)?;
        assert_eq!(first, second);
        assert_eq!(first.result_url(), Some("https://fake/out/0.png"));
        Ok(())
    }

    #[test]
    fn request_kind_follows_params() {
        assert_eq!(image_request("x").kind(), GenerationKind::Image);
        let video = GenerationRequest::video("veo-3.1", "waves", VideoParams::default());
        assert_eq!(video.kind(), GenerationKind::Video);
    }
}
