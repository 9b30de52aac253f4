pub mod app;
pub mod collaborators;
pub mod config;
pub mod orchestration;
pub mod shared;

pub use orchestration::envelope::ResultEnvelope;
pub use orchestration::error::WorkflowError;
pub use orchestration::pipeline::{run_workflow_with_timeout, Pipeline};
