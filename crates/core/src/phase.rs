//! Conversation phase and generation session status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a conversation in the ideation → review → generation sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Free-form discussion, no specification captured yet
    #[default]
    Ideation,
    /// A specification was extracted and awaits the user's approval
    SpecReview,
    /// Approval received, generation session being bound
    Transitioning,
    /// Generation session running
    Generating,
}

impl Phase {
    /// Wire name used in client events
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Ideation => "ideation",
            Phase::SpecReview => "specReview",
            Phase::Transitioning => "transitioning",
            Phase::Generating => "generating",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Generating,
    Building,
    Ready,
    Error,
    Cancelled,
}

impl SessionStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Ready | SessionStatus::Error | SessionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Generating => "generating",
            SessionStatus::Building => "building",
            SessionStatus::Ready => "ready",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(serde_json::to_string(&Phase::SpecReview).unwrap(), "\"specReview\"");
        assert_eq!(Phase::default(), Phase::Ideation);
        assert_eq!(Phase::Generating.to_string(), "generating");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Ready.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Starting.is_terminal());
        assert!(!SessionStatus::Building.is_terminal());
    }
}
