//! Conversation pipeline
//!
//! Composes the stream buffer, extraction engine, approval detector and phase
//! machine for one connection. The relay feeds it assistant text and user
//! utterances and acts on the outcomes; nothing here touches the network.

use specflow_config::ConversationConfig;
use specflow_core::Phase;

use crate::approval::ApprovalDetector;
use crate::extraction::SpecExtractor;
use crate::phase::{ApprovalOutcome, IgnoreReason, PhaseError, PhaseMachine, PhaseTransition};
use crate::stream_buffer::{Feed, StreamBuffer};

/// What happened to one assistant text fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentTextOutcome {
    /// The fragment must not reach the client
    pub withheld: bool,
    /// A complete specification was extracted on this fragment
    pub specification_extracted: bool,
    /// Phase change caused by the extraction, if any
    pub transition: Option<PhaseTransition>,
}

/// Per-connection conversation state
#[derive(Debug)]
pub struct ConversationPipeline {
    buffer: StreamBuffer,
    extractor: SpecExtractor,
    detector: ApprovalDetector,
    machine: PhaseMachine,
}

impl ConversationPipeline {
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            buffer: StreamBuffer::new(config),
            extractor: SpecExtractor::new(config),
            detector: ApprovalDetector::new(config),
            machine: PhaseMachine::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn machine(&self) -> &PhaseMachine {
        &self.machine
    }

    pub fn session_id(&self) -> Option<&str> {
        self.machine.session_id()
    }

    /// Route one assistant-authored fragment
    pub fn on_agent_text(&mut self, text: &str) -> AgentTextOutcome {
        let mut outcome = AgentTextOutcome::default();
        let looks = self.extractor.looks_like_specification(text);

        match self.buffer.push(text) {
            Feed::Single(fragment) => {
                let found = self.try_extract(&fragment, &mut outcome);
                outcome.withheld = looks || found;
            },
            Feed::Accumulating | Feed::Abandoned => outcome.withheld = true,
            Feed::Complete(block) => {
                self.try_extract(&block, &mut outcome);
                outcome.withheld = true;
            },
            Feed::ForcedComplete { block, fragment } => {
                self.try_extract(&block, &mut outcome);
                let found = self.try_extract(&fragment, &mut outcome);
                outcome.withheld = self.extractor.looks_like_specification(&fragment) || found;
            },
        }

        outcome
    }

    /// Route one user utterance through approval
    pub fn on_user_text(&mut self, text: &str) -> ApprovalOutcome {
        if !self.detector.is_approval(text) {
            return ApprovalOutcome::NotApproval;
        }
        if self.buffer.is_accumulating() {
            tracing::debug!("Approval while a specification block is open, ignoring");
            return ApprovalOutcome::Ignored(IgnoreReason::BlockInFlight);
        }
        self.machine.approve()
    }

    pub fn begin_generating(&mut self) -> Result<PhaseTransition, PhaseError> {
        self.machine.begin_generating()
    }

    /// The bound session reached `ready`
    pub fn generation_completed(&mut self) -> bool {
        self.machine.generation_completed()
    }

    pub fn generation_failed(&mut self) -> Option<PhaseTransition> {
        self.machine.generation_failed()
    }

    pub fn generation_cancelled(&mut self) -> Option<PhaseTransition> {
        self.machine.generation_cancelled()
    }

    fn try_extract(&mut self, candidate: &str, outcome: &mut AgentTextOutcome) -> bool {
        let Some(specification) = self.extractor.extract(candidate) else {
            return false;
        };
        tracing::info!(
            name = ?specification.name(),
            keys = specification.len(),
            "Specification extracted"
        );
        outcome.specification_extracted = true;
        if let Some(transition) = self.machine.specification_extracted(specification) {
            outcome.transition.get_or_insert(transition);
        }
        true
    }
}
