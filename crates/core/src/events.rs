//! Client-facing events
//!
//! Every event the relay sends to the client is wrapped in an
//! [`EventEnvelope`] that stamps the session identifier and the emission time.
//! The wire shape is a flat JSON object:
//!
//! ```json
//! {"type":"codegen-log","chunk":"npm install","sessionId":"…","timestamp":"…"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationRole, FieldError, FileNode, Phase};

/// Event payload sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "text")]
    Text {
        role: ConversationRole,
        content: String,
    },
    #[serde(rename = "phase_transition")]
    PhaseTransition { phase: Phase },
    /// Upstream agent accepted the settings handshake
    #[serde(rename = "agent-ready")]
    AgentReady,
    /// Approval arrived before any specification was captured
    #[serde(rename = "specification-required")]
    SpecificationRequired { message: String },
    #[serde(rename = "codegen-start")]
    CodegenStart,
    #[serde(rename = "codegen-validation-passed")]
    CodegenValidationPassed,
    #[serde(rename = "codegen-validation-failed")]
    CodegenValidationFailed { errors: Vec<FieldError> },
    #[serde(rename = "codegen-log")]
    CodegenLog { chunk: String },
    #[serde(rename = "codegen-file-tree")]
    CodegenFileTree { tree: FileNode },
    #[serde(rename = "codegen-preview-ready")]
    CodegenPreviewReady { url: String },
    #[serde(rename = "codegen-complete", rename_all = "camelCase")]
    CodegenComplete {
        url: Option<String>,
        artifact_path: String,
        duration_ms: u64,
    },
    #[serde(rename = "codegen-error", rename_all = "camelCase")]
    CodegenError { error: String, duration_ms: u64 },
    #[serde(rename = "codegen-cancelled")]
    CodegenCancelled,
    /// Upstream agent reported an error
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "pong")]
    Pong,
}

/// Event stamped with session identifier and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: ClientEvent,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Stamp an event with the current time
    pub fn new(session_id: impl Into<String>, event: ClientEvent) -> Self {
        Self {
            event,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize for a text frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_is_flat() {
        let envelope = EventEnvelope::new(
            "s-1",
            ClientEvent::CodegenComplete {
                url: Some("http://localhost:5173".to_string()),
                artifact_path: "/tmp/s-1".to_string(),
                duration_ms: 1200,
            },
        );
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "codegen-complete");
        assert_eq!(value["artifactPath"], "/tmp/s-1");
        assert_eq!(value["durationMs"], 1200);
        assert_eq!(value["sessionId"], "s-1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_phase_transition_wire_shape() {
        let envelope = EventEnvelope::new(
            "s-2",
            ClientEvent::PhaseTransition {
                phase: Phase::Generating,
            },
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "phase_transition");
        assert_eq!(value["phase"], "generating");
        assert_eq!(value["sessionId"], "s-2");
    }

    #[test]
    fn test_envelope_round_trips() {
        let envelope = EventEnvelope::new(
            "s-3",
            ClientEvent::Text {
                role: ConversationRole::User,
                content: "hello".to_string(),
            },
        );
        let json = envelope.to_json().unwrap();
        let decoded: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, envelope);
    }
}
