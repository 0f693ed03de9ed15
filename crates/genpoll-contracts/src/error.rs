//! Error taxonomy shared by the registry, adapters and poll loop.

use std::time::Duration;

use thiserror::Error;

use crate::task::{GenerationKind, ProviderId, TaskHandle};

#[derive(Debug, Error)]
pub enum GenError {
    /// Model is not a key of the kind-specific catalog.
    #[error("Unknown {kind} model: '{model}'. Available: {}", available.join(", "))]
    UnknownModel {
        kind: GenerationKind,
        model: String,
        available: Vec<String>,
    },

    /// Override names a provider that does not serve the model.
    #[error("Provider '{provider}' not available for '{model}'. Available: {}", available.join(", "))]
    ProviderUnavailable {
        provider: String,
        model: String,
        available: Vec<String>,
    },

    /// Catalog names a provider that has no adapter instance registered.
    #[error("No adapter registered for provider '{0}'")]
    UnregisteredProvider(ProviderId),

    #[error("{provider} doesn't support {kind} model: '{model}'. Available: {}", available.join(", "))]
    UnsupportedModel {
        provider: ProviderId,
        kind: GenerationKind,
        model: String,
        available: Vec<String>,
    },

    /// Poll called with a handle this adapter instance never issued.
    #[error("No poll target stored for {provider} task {handle}. Was it submitted through this adapter?")]
    UnknownHandle {
        provider: ProviderId,
        handle: TaskHandle,
    },

    #[error("{vendor} {status}: {message}")]
    VendorFailed {
        vendor: String,
        status: String,
        message: String,
    },

    #[error("No usable output in succeeded {vendor}: {detail}")]
    MalformedOutput { vendor: String, detail: String },

    #[error("Poll failed after {retries} retries: {detail}")]
    RetriesExhausted { retries: u32, detail: String },

    #[error("Timeout waiting for {vendor} after {}s", waited.as_secs())]
    TimedOut { vendor: String, waited: Duration },

    #[error("Poll loop for task {handle} panicked: {message}")]
    Panicked { handle: TaskHandle, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenError {
    /// True for caller misuse that should never be retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            GenError::UnknownModel { .. }
                | GenError::ProviderUnavailable { .. }
                | GenError::UnregisteredProvider(_)
                | GenError::UnsupportedModel { .. }
                | GenError::UnknownHandle { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GenError::TimedOut { .. })
    }
}
