//! Relay Core — coordination of a fixed sequence of remote text-generating
//! workers, with recovery of structured dispatch data from their output.
//!
//! The crate has no front-end of its own. It is used by:
//!
//! - the `relay` CLI (`relay-cli`)
//! - embedding services that call [`PipelineCoordinator::run_async`]
//!
//! Remote workers sit behind the [`remote::WorkerDirectory`] and
//! [`remote::RemoteExecutionService`] ports, so the coordinator runs the
//! same way against the hosted agents API and against scripted workers.

pub mod artifacts;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod remote;

// Convenience re-exports
pub use config::RelayConfig;
pub use dispatch::{evaluate, DispatchDecision};
pub use error::PipelineError;
pub use pipeline::{DispatchReport, PipelineCoordinator, PipelineOutput, PipelinePlan};
