//! Instance management module
//!
//! This module launches services as local processes or containers, tracks
//! their lifecycle state and terminates them.

pub mod config;
pub mod docker;
pub mod lifecycle;
pub mod runtime;

pub use config::{InstanceInfo, InstanceStatus};
pub use docker::DockerLauncher;
pub use lifecycle::{ProcessController, ServiceInstance};
pub use runtime::{LaunchRequest, Launcher, ProcessHandle, ProcessLauncher, ResolvedMount};
