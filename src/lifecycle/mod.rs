//! Registry and process-level setup.

pub mod registry;
pub mod tracing;

pub use registry::{ModelRegistry, ModelSource};
pub use self::tracing::setup_tracing;
