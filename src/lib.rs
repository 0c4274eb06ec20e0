//! Sigil - service composition and readiness orchestration
//!
//! Sigil starts, sequences, health-checks and tears down the named services
//! of a declarative test workflow. It provides:
//!
//! - A registry of service declarations with dependency ordering
//! - Instance lifecycle management for local processes and docker containers
//! - TCP and HTTP readiness probing
//! - Named volumes that outlive the instances using them
//! - Compose files declaring services, settings and workflows

pub mod compose;
pub mod container;
pub mod error;
pub mod probe;
pub mod service;
pub mod storage;
pub mod workflow;

pub use error::{Result, SigilError};
