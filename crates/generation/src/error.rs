//! Generation error types

use std::time::Duration;
use thiserror::Error;

use specflow_core::FieldError;

/// Failures reported by a generation backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Http(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend reported an error event
    #[error("{0}")]
    Reported(String),

    #[error("Backend closed the stream without completing")]
    Incomplete,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Http(err.to_string())
    }
}

/// Generation session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Specification is incomplete: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session {0} already has a generation in progress")]
    AlreadyRunning(String),
}

impl GenerationError {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "validation_failed",
            GenerationError::Backend(_) => "error",
            GenerationError::Timeout(_) => "timeout",
            GenerationError::AlreadyRunning(_) => "rejected",
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_fields() {
        let err = GenerationError::Validation(vec![
            FieldError::new("goal", "is required"),
            FieldError::new("users", "must not be empty"),
        ]);
        assert_eq!(
            err.to_string(),
            "Specification is incomplete: goal is required, users must not be empty"
        );
    }
}
