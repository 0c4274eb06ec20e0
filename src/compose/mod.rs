//! Service composition
//!
//! This module loads compose files and drives a set of services through
//! start, readiness, one-off tasks and teardown.

pub mod config;
pub mod context;
pub mod orchestrator;
pub mod parser;

pub use config::{ComposeFile, RuntimeKind, ServiceConfig, Settings};
pub use context::CompositionContext;
pub use orchestrator::Composition;
pub use parser::ComposeParser;
