//! Debate session state machine — phases, transitions, and the transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::opinion::{DuplicateOpinion, Opinion, Proposal, ReviewerId, Transcript};

/// Phase of a debate session. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebatePhase {
    /// Proposal and roster received, not yet validated.
    Intake,
    /// Every reviewer reacts once, in parallel.
    InitialReactions,
    /// Sequential turn-based debate.
    OpenFloor,
    /// Weighted scoring and hard-rule evaluation.
    Arbitration,
    /// Decision emitted — terminal.
    Done,
}

impl DebatePhase {
    /// Whether this is the terminal phase.
    pub fn is_terminal(self) -> bool {
        self == Self::Done
    }

    /// Valid transitions from this phase. No phase is ever re-entered.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Intake => &[Self::InitialReactions],
            Self::InitialReactions => &[Self::OpenFloor],
            Self::OpenFloor => &[Self::Arbitration],
            Self::Arbitration => &[Self::Done],
            Self::Done => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intake => write!(f, "intake"),
            Self::InitialReactions => write!(f, "initial_reactions"),
            Self::OpenFloor => write!(f, "open_floor"),
            Self::Arbitration => write!(f, "arbitration"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {} (allowed: {:?})",
            self.from,
            self.to,
            self.from.valid_transitions()
        )
    }
}

impl std::error::Error for TransitionError {}

/// A debate session tracking phase, transcript, and speaker state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    /// Unique session identifier.
    pub id: String,
    /// The artifact under review.
    pub proposal: Proposal,
    /// Reviewer ids in roster order.
    pub reviewers: Vec<ReviewerId>,
    /// Current phase.
    pub phase: DebatePhase,
    /// Ordered, append-only opinion record.
    pub transcript: Transcript,
    /// Transition history.
    pub transitions: Vec<PhaseTransition>,
    /// Who held the floor last in the open-floor phase.
    pub last_speaker: Option<ReviewerId>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl DebateSession {
    /// Create a new session in the intake phase.
    pub fn new(proposal: Proposal, reviewers: Vec<ReviewerId>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            proposal,
            reviewers,
            phase: DebatePhase::Intake,
            transcript: Transcript::new(),
            transitions: Vec::new(),
            last_speaker: None,
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    /// Record an opinion in the transcript.
    pub fn record_opinion(&mut self, opinion: Opinion) -> Result<(), DuplicateOpinion> {
        self.transcript.append(opinion)
    }

    /// Whether the session has ended.
    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} opinions | {} reviewers | proposal={}",
            self.phase,
            self.transcript.len(),
            self.reviewers.len(),
            self.proposal.proposal_id
        )
    }
}
