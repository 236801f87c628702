//! Conversation orchestration
//!
//! Features:
//! - Stream buffer reassembling specification blocks across text fragments
//! - Extraction engine with prioritized fence patterns and a fallback scan
//! - Approval detection over user utterances
//! - Phase state machine (ideation → specReview → transitioning → generating)
//!
//! All phrase and marker tables come from [`specflow_config::ConversationConfig`].

pub mod approval;
pub mod extraction;
pub mod phase;
pub mod pipeline;
pub mod stream_buffer;

pub use approval::{normalize, ApprovalDetector};
pub use extraction::SpecExtractor;
pub use phase::{
    ApprovalOutcome, IgnoreReason, PhaseError, PhaseMachine, PhaseTransition, TransitionReason,
};
pub use pipeline::{AgentTextOutcome, ConversationPipeline};
pub use stream_buffer::{Feed, StreamBuffer};
