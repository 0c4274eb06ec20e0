//! Workflow steps

use serde::{Deserialize, Serialize};

/// One orchestration step.
///
/// In a compose file each step is a single-key map:
///
/// ```yaml
/// - start_and_wait: [log]
/// - up: db
/// - wait_for_ready: db
/// - run: { target: driver, args: [script.td] }
/// - remove: { services: [log, db], destroy_volumes: true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Start services concurrently and wait until each is ready
    StartAndWait(Vec<String>),
    /// Start a service without waiting for readiness
    Up(String),
    /// Wait for an already started service to become ready
    WaitForReady(String),
    /// Run a one-off task and require a zero exit code
    #[serde(rename = "run")]
    RunTask {
        target: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Stop and forget services, attempting every one
    Remove {
        services: Vec<String>,
        #[serde(default)]
        destroy_volumes: bool,
    },
}

impl WorkflowStep {
    /// Services this step refers to
    pub fn services(&self) -> Vec<&str> {
        match self {
            WorkflowStep::StartAndWait(names) => names.iter().map(String::as_str).collect(),
            WorkflowStep::Up(name) | WorkflowStep::WaitForReady(name) => vec![name.as_str()],
            WorkflowStep::RunTask { target, .. } => vec![target.as_str()],
            WorkflowStep::Remove { services, .. } => services.iter().map(String::as_str).collect(),
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStep::StartAndWait(names) => write!(f, "start_and_wait {}", names.join(", ")),
            WorkflowStep::Up(name) => write!(f, "up {}", name),
            WorkflowStep::WaitForReady(name) => write!(f, "wait_for_ready {}", name),
            WorkflowStep::RunTask { target, args } if args.is_empty() => {
                write!(f, "run {}", target)
            }
            WorkflowStep::RunTask { target, args } => write!(f, "run {} {}", target, args.join(" ")),
            WorkflowStep::Remove {
                services,
                destroy_volumes,
            } => {
                write!(f, "remove {}", services.join(", "))?;
                if *destroy_volumes {
                    write!(f, " (destroy volumes)")?;
                }
                Ok(())
            }
        }
    }
}
