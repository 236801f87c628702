//! Upstream conversational agent protocol
//!
//! The agent speaks JSON text frames tagged by `type`, interleaved with raw
//! binary audio frames. Only the events the relay acts on are modelled;
//! anything else decodes to [`AgentEvent::Other`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a conversation text fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
    System,
}

impl ConversationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationRole::User => "user",
            ConversationRole::Assistant => "assistant",
            ConversationRole::System => "system",
        }
    }
}

impl fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event received from the upstream agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    Welcome {
        #[serde(default)]
        request_id: Option<String>,
    },
    SettingsApplied {},
    ConversationText {
        role: ConversationRole,
        content: String,
    },
    Error {
        #[serde(default, alias = "message")]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl AgentEvent {
    /// Decode a text frame
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Command sent to the upstream agent after the settings handshake
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum AgentCommand {
    KeepAlive,
    /// Have the agent voice a message verbatim
    InjectAgentMessage { message: String },
    /// Feed a typed user utterance into the agent's turn
    InjectUserMessage { content: String },
}

impl AgentCommand {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
