//! Staged pipeline execution.

pub mod capture;
pub mod coordinator;

pub use capture::RunCapture;
pub use coordinator::{DispatchReport, PipelineCoordinator, PipelineOutput, PipelinePlan};
