//! Error types for Sigil

use std::time::Duration;
use thiserror::Error;

/// Result type for Sigil operations
pub type Result<T> = std::result::Result<T, SigilError>;

/// Sigil error types
#[derive(Error, Debug)]
pub enum SigilError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Service already registered: {0}")]
    DuplicateName(String),

    #[error("Circular dependency detected for service: {0}")]
    CircularDependency(String),

    #[error("Failed to start service {service}: {cause}")]
    StartFailed { service: String, cause: String },

    #[error("Service {service} not ready after {}ms", .timeout.as_millis())]
    ReadinessTimeout { service: String, timeout: Duration },

    #[error("Service not started: {0}")]
    NotStarted(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Task {target} failed with exit code {exit_code}")]
    TaskFailed { target: String, exit_code: i32 },

    #[error("Teardown failed: {}", join_errors(.0))]
    AggregatedTeardownFailure(Vec<SigilError>),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Volume error: {0}")]
    Volume(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Compose file parse error: {0}")]
    ComposeParse(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SigilError {
    /// Collapse teardown failures: none is success, one is surfaced as itself.
    pub fn aggregate(mut errors: Vec<SigilError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SigilError::AggregatedTeardownFailure(errors)),
        }
    }
}

fn join_errors(errors: &[SigilError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_single_error_is_unwrapped() {
        let result = SigilError::aggregate(vec![SigilError::NotFound("ghost".to_string())]);
        assert!(matches!(result, Err(SigilError::NotFound(name)) if name == "ghost"));
    }

    #[test]
    fn test_aggregate_many_errors() {
        let result = SigilError::aggregate(vec![
            SigilError::NotFound("a".to_string()),
            SigilError::NotFound("b".to_string()),
        ]);

        let err = result.unwrap_err();
        assert!(matches!(err, SigilError::AggregatedTeardownFailure(ref list) if list.len() == 2));
        assert_eq!(
            err.to_string(),
            "Teardown failed: Instance not found: a; Instance not found: b"
        );
    }

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(SigilError::aggregate(Vec::new()).is_ok());
    }
}
