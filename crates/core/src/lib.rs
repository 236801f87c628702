//! Core types for the specflow conversation layer
//!
//! This crate provides foundational types used across all other crates:
//! - The extracted `Specification` value object and its field validation
//! - Conversation `Phase` and generation `SessionStatus`
//! - Client-facing event envelopes emitted by the relay
//! - Upstream conversational agent event types
//! - Error types

pub mod agent_protocol;
pub mod error;
pub mod events;
pub mod file_tree;
pub mod phase;
pub mod specification;

pub use agent_protocol::{AgentCommand, AgentEvent, ConversationRole};
pub use error::{Error, Result};
pub use events::{ClientEvent, EventEnvelope};
pub use file_tree::{FileNode, NodeKind};
pub use phase::{Phase, SessionStatus};
pub use specification::{FieldError, Specification};
