//! Service declarations
//!
//! This module holds the static description of every service a composition
//! knows about, and the registry used to look them up by name.

pub mod registry;
pub mod spec;

pub use registry::ServiceRegistry;
pub use spec::{PortMapping, Protocol, ServiceSpec, VolumeMount};
