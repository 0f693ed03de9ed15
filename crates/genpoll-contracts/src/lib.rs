//! Vendor-independent vocabulary for asynchronous image and video generation:
//! task handles and results, the model catalog, errors, and progress sinks.

pub mod error;
pub mod events;
pub mod models;
pub mod status;
pub mod task;

pub use error::GenError;
pub use models::{ModelCatalog, ModelEntry};
pub use status::{StatusSink, StatusTag};
pub use task::{GenerationKind, PollOptions, ProviderId, TaskHandle, TaskResult};
