//! Readiness probing
//!
//! A service that has been launched is not necessarily accepting traffic.
//! This module polls instances over TCP or HTTP until they answer, and only
//! then promotes them to Ready.

pub mod protocol;
pub mod readiness;

pub use protocol::ReadinessProtocol;
pub use readiness::{ReadinessProbe, DEFAULT_PROBE_INTERVAL};
