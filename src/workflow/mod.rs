//! Workflows
//!
//! A workflow is an ordered list of orchestration steps for one test run.

pub mod runner;
pub mod step;

pub use runner::{RunReport, RunnerState, WorkflowRunner};
pub use step::WorkflowStep;
