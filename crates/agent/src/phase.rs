//! Phase State Machine
//!
//! Owns one conversation's phase, its confirmed specification and the bound
//! generation session identifier.
//!
//! ```text
//! ideation ──extracted──▶ specReview ──approved──▶ transitioning ──bound──▶ generating
//!     ▲                    ▲                             │                      │
//!     │                    └──── revised after ready ────┼──────────────────────┤
//!     └──────────────── failed / cancelled ──────────────┴──────────────────────┘
//! ```
//!
//! Invariants:
//! - `transitioning` is only entered with a confirmed specification
//! - `generating` is only entered with a minted session identifier
//! - approval without a specification never changes the phase

use thiserror::Error;
use uuid::Uuid;

use specflow_core::{Phase, Specification};

/// Phase machine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("No confirmed specification")]
    MissingSpecification,

    #[error("No generation session bound")]
    MissingSession,
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// Extraction returned a complete specification
    SpecificationExtracted,
    /// A new specification arrived after the bound session reached `ready`
    SpecificationRevised,
    /// User approved the confirmed specification
    Approved,
    /// Generation session bound and started
    SessionBound,
    /// Generation session ended in error
    GenerationFailed,
    /// Generation session was cancelled
    GenerationCancelled,
}

/// Recorded phase change
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub reason: TransitionReason,
    /// Session bound at the time of the transition
    pub session_id: Option<String>,
}

/// Why an approval did not advance the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A specification block is open but not yet closed
    BlockInFlight,
    /// A generation session is already bound
    GenerationInProgress,
    /// The bound session is `ready`; a revised specification is needed first
    AwaitingRevision,
}

/// Result of routing a user utterance through approval
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    /// The utterance was not an approval
    NotApproval,
    /// Approved: a session id was minted and the phase is `transitioning`
    Approved {
        session_id: String,
        specification: Specification,
        transition: PhaseTransition,
    },
    /// Approval arrived before any specification was confirmed
    SpecificationMissing,
    /// Approval arrived but could not be acted on
    Ignored(IgnoreReason),
}

impl ApprovalOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalOutcome::NotApproval => "not_approval",
            ApprovalOutcome::Approved { .. } => "approved",
            ApprovalOutcome::SpecificationMissing => "specification_missing",
            ApprovalOutcome::Ignored(_) => "ignored",
        }
    }
}

/// Per-conversation phase machine
#[derive(Debug, Default)]
pub struct PhaseMachine {
    phase: Phase,
    specification: Option<Specification>,
    session_id: Option<String>,
    /// The bound session reached `ready`
    settled: bool,
    history: Vec<PhaseTransition>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn specification(&self) -> Option<&Specification> {
        self.specification.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    /// True once the bound session finished successfully
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Store a freshly extracted specification
    ///
    /// Moves `ideation → specReview`, and `generating → specReview` once the
    /// bound session is `ready` (the finished session is unbound). Otherwise the
    /// specification is replaced and the phase is left alone.
    pub fn specification_extracted(&mut self, specification: Specification) -> Option<PhaseTransition> {
        self.specification = Some(specification);
        match self.phase {
            Phase::Ideation => Some(self.transition(Phase::SpecReview, TransitionReason::SpecificationExtracted)),
            Phase::Generating if self.settled => {
                let transition = self.transition(Phase::SpecReview, TransitionReason::SpecificationRevised);
                self.session_id = None;
                self.settled = false;
                Some(transition)
            },
            _ => None,
        }
    }

    /// Act on an utterance already classified as approval
    pub fn approve(&mut self) -> ApprovalOutcome {
        if self.settled {
            return ApprovalOutcome::Ignored(IgnoreReason::AwaitingRevision);
        }
        if matches!(self.phase, Phase::Transitioning | Phase::Generating) {
            return ApprovalOutcome::Ignored(IgnoreReason::GenerationInProgress);
        }
        let Some(specification) = self.specification.clone() else {
            return ApprovalOutcome::SpecificationMissing;
        };
        if self.phase != Phase::SpecReview {
            return ApprovalOutcome::SpecificationMissing;
        }

        let session_id = Uuid::new_v4().to_string();
        self.session_id = Some(session_id.clone());
        let transition = self.transition(Phase::Transitioning, TransitionReason::Approved);

        ApprovalOutcome::Approved {
            session_id,
            specification,
            transition,
        }
    }

    /// Enter `generating` once the session is registered
    pub fn begin_generating(&mut self) -> Result<PhaseTransition, PhaseError> {
        if self.phase != Phase::Transitioning {
            return Err(PhaseError::InvalidTransition {
                from: self.phase,
                to: Phase::Generating,
            });
        }
        if self.specification.as_ref().map_or(true, Specification::is_empty) {
            return Err(PhaseError::MissingSpecification);
        }
        if self.session_id.is_none() {
            return Err(PhaseError::MissingSession);
        }
        Ok(self.transition(Phase::Generating, TransitionReason::SessionBound))
    }

    /// Mark the bound session `ready`
    ///
    /// The phase stays `generating` until a revised specification arrives.
    /// Returns false when nothing is bound or it already settled.
    pub fn generation_completed(&mut self) -> bool {
        if self.phase != Phase::Generating || self.settled {
            return false;
        }
        self.settled = true;
        tracing::info!(session_id = ?self.session_id, "Generation settled, awaiting revision");
        true
    }

    /// Roll back to ideation after a generation failure
    pub fn generation_failed(&mut self) -> Option<PhaseTransition> {
        self.roll_back(TransitionReason::GenerationFailed)
    }

    /// Roll back to ideation after a cancellation
    pub fn generation_cancelled(&mut self) -> Option<PhaseTransition> {
        self.roll_back(TransitionReason::GenerationCancelled)
    }

    fn roll_back(&mut self, reason: TransitionReason) -> Option<PhaseTransition> {
        if self.settled || !matches!(self.phase, Phase::Transitioning | Phase::Generating) {
            return None;
        }
        let transition = self.transition(Phase::Ideation, reason);
        self.specification = None;
        self.session_id = None;
        Some(transition)
    }

    fn transition(&mut self, to: Phase, reason: TransitionReason) -> PhaseTransition {
        let transition = PhaseTransition {
            from: self.phase,
            to,
            reason,
            session_id: self.session_id.clone(),
        };
        tracing::info!(
            from = %transition.from,
            to = %transition.to,
            reason = ?reason,
            session_id = ?transition.session_id,
            "Phase transition"
        );
        self.phase = to;
        self.history.push(transition.clone());
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> Specification {
        Specification::from_value(json!({"name": "A", "description": "d"})).unwrap()
    }

    #[test]
    fn test_extraction_moves_to_review() {
        let mut machine = PhaseMachine::new();
        let transition = machine.specification_extracted(spec()).unwrap();
        assert_eq!(transition.from, Phase::Ideation);
        assert_eq!(transition.to, Phase::SpecReview);
        assert_eq!(machine.phase(), Phase::SpecReview);
        assert!(machine.specification().is_some());
    }

    #[test]
    fn test_reextraction_replaces_without_transition() {
        let mut machine = PhaseMachine::new();
        machine.specification_extracted(spec());
        let replacement = Specification::from_value(json!({"name": "B"})).unwrap();
        assert!(machine.specification_extracted(replacement).is_none());
        assert_eq!(machine.specification().unwrap().name(), Some("B"));
        assert_eq!(machine.phase(), Phase::SpecReview);
    }

    #[test]
    fn test_approval_without_spec_is_noop() {
        let mut machine = PhaseMachine::new();
        assert_eq!(machine.approve(), ApprovalOutcome::SpecificationMissing);
        assert_eq!(machine.phase(), Phase::Ideation);
        assert!(machine.session_id().is_none());
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_approval_then_generating() {
        let mut machine = PhaseMachine::new();
        machine.specification_extracted(spec());

        let session_id = match machine.approve() {
            ApprovalOutcome::Approved {
                session_id,
                specification,
                transition,
            } => {
                assert_eq!(specification, spec());
                assert_eq!(transition.to, Phase::Transitioning);
                session_id
            },
            other => panic!("expected approval, got {:?}", other),
        };
        assert_eq!(machine.phase(), Phase::Transitioning);
        assert_eq!(machine.session_id(), Some(session_id.as_str()));

        let transition = machine.begin_generating().unwrap();
        assert_eq!(transition.to, Phase::Generating);
        assert_eq!(transition.session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(machine.history().len(), 3);
    }

    #[test]
    fn test_begin_generating_requires_transitioning() {
        let mut machine = PhaseMachine::new();
        assert_eq!(
            machine.begin_generating(),
            Err(PhaseError::InvalidTransition {
                from: Phase::Ideation,
                to: Phase::Generating,
            })
        );
    }

    #[test]
    fn test_second_approval_ignored_while_generating() {
        let mut machine = PhaseMachine::new();
        machine.specification_extracted(spec());
        machine.approve();
        machine.begin_generating().unwrap();
        assert_eq!(
            machine.approve(),
            ApprovalOutcome::Ignored(IgnoreReason::GenerationInProgress)
        );
    }

    fn generate(machine: &mut PhaseMachine) -> String {
        machine.specification_extracted(spec());
        let session_id = match machine.approve() {
            ApprovalOutcome::Approved { session_id, .. } => session_id,
            other => panic!("expected approval, got {:?}", other),
        };
        machine.begin_generating().unwrap();
        session_id
    }

    #[test]
    fn test_ready_waits_for_revision() {
        let mut machine = PhaseMachine::new();
        let first = generate(&mut machine);

        assert!(machine.generation_completed());
        assert!(!machine.generation_completed());
        assert_eq!(machine.phase(), Phase::Generating);
        assert_eq!(machine.approve(), ApprovalOutcome::Ignored(IgnoreReason::AwaitingRevision));
        // A settled session is not rolled back
        assert!(machine.generation_cancelled().is_none());

        let revised = Specification::from_value(json!({"name": "B", "description": "d2"})).unwrap();
        let transition = machine.specification_extracted(revised).unwrap();
        assert_eq!(transition.reason, TransitionReason::SpecificationRevised);
        assert_eq!(transition.from, Phase::Generating);
        assert_eq!(transition.to, Phase::SpecReview);
        assert_eq!(transition.session_id.as_deref(), Some(first.as_str()));
        assert!(machine.session_id().is_none());
        assert!(!machine.is_settled());

        let second = match machine.approve() {
            ApprovalOutcome::Approved { session_id, specification, .. } => {
                assert_eq!(specification.name(), Some("B"));
                session_id
            },
            other => panic!("expected approval, got {:?}", other),
        };
        assert_ne!(first, second);
        assert_eq!(machine.begin_generating().unwrap().to, Phase::Generating);
    }

    #[test]
    fn test_extraction_while_running_keeps_phase() {
        let mut machine = PhaseMachine::new();
        generate(&mut machine);
        let revised = Specification::from_value(json!({"name": "B"})).unwrap();
        assert!(machine.specification_extracted(revised).is_none());
        assert_eq!(machine.phase(), Phase::Generating);
        assert!(machine.session_id().is_some());
    }

    #[test]
    fn test_failure_resets_to_ideation() {
        let mut machine = PhaseMachine::new();
        machine.specification_extracted(spec());
        machine.approve();
        machine.begin_generating().unwrap();

        let transition = machine.generation_failed().unwrap();
        assert_eq!(transition.reason, TransitionReason::GenerationFailed);
        assert_eq!(machine.phase(), Phase::Ideation);
        assert!(machine.specification().is_none());
        assert!(machine.session_id().is_none());

        // Nothing to roll back a second time
        assert!(machine.generation_cancelled().is_none());
    }
}
