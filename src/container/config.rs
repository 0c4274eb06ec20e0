//! Instance state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Instance is recorded but nothing has been launched
    Pending,
    /// Launch is in progress
    Starting,
    /// Process is running but readiness is not confirmed
    Running,
    /// Process is running and passed its readiness check
    Ready,
    /// Instance is being terminated
    Stopping,
    /// Instance has stopped
    Stopped,
    /// Launch or termination failed, or the process exited with an error
    Failed,
}

impl InstanceStatus {
    /// Running or Ready
    pub fn is_live(&self) -> bool {
        matches!(self, InstanceStatus::Running | InstanceStatus::Ready)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Starting => write!(f, "starting"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Ready => write!(f, "ready"),
            InstanceStatus::Stopping => write!(f, "stopping"),
            InstanceStatus::Stopped => write!(f, "stopped"),
            InstanceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time snapshot of a service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Instance ID
    pub id: String,
    /// Service this instance realizes
    pub service: String,
    /// Current status
    pub status: InstanceStatus,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Stop time
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code
    pub exit_code: Option<i32>,
    /// Process ID (local runtime)
    pub pid: Option<u32>,
    /// Container ID (docker runtime)
    pub container_id: Option<String>,
    /// Attached volume names
    pub volumes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_states() {
        assert!(InstanceStatus::Running.is_live());
        assert!(InstanceStatus::Ready.is_live());
        assert!(!InstanceStatus::Starting.is_live());
        assert!(!InstanceStatus::Stopped.is_live());
        assert!(!InstanceStatus::Failed.is_live());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&InstanceStatus::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
        assert_eq!(InstanceStatus::Stopping.to_string(), "stopping");
    }
}
