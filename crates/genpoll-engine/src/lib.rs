//! Submit-then-poll orchestration over image and video generation vendors.
//!
//! Callers resolve an adapter through [`ProviderRegistry`], `submit` a
//! [`GenerationRequest`], and then either `poll` the returned handle or hand a
//! batch of handles to [`poll_many`].

mod http;
pub mod orchestrator;
pub mod poll;
pub mod provider;
pub mod registry;
pub mod vendors;

pub use orchestrator::{poll_many, poll_many_with_limit, PollResults, MAX_PARALLEL_POLLS};
pub use poll::{poll_until_done, StatusReply, StatusSource, VendorStatus, MAX_TRANSIENT_RETRIES};
pub use provider::{
    GenerationParams, GenerationProvider, GenerationRequest, ImageParams, PendingTasks,
    PollingProvider, Submission, VendorApi, VideoParams,
};
pub use registry::{default_provider_registry, AdapterHandle, ProviderRegistry};
