mod registry;

pub use registry::{ModelCatalog, ModelEntry};
