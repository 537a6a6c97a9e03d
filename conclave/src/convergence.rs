//! Convergence detection — consensus level, plurality, and position shifts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::opinion::{ReviewerId, Vote};

/// How a reviewer's position moved between two rounds, measured on the
/// vote ordinal scale reject(0) < conditional(1) < approve(2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionShift {
    /// No ordinal change.
    SamePosition,
    /// Moved to conditional from either extreme.
    MovingToMiddle,
    /// Moved up, landing on approve.
    StrongerAgree,
    /// Moved down, landing on reject.
    StrongerDisagree,
}

impl std::fmt::Display for PositionShift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SamePosition => write!(f, "same_position"),
            Self::MovingToMiddle => write!(f, "moving_to_middle"),
            Self::StrongerAgree => write!(f, "stronger_agree"),
            Self::StrongerDisagree => write!(f, "stronger_disagree"),
        }
    }
}

/// Classify a reviewer's movement between two votes.
///
/// Returns `None` when either side is an abstention and the two differ —
/// entering or leaving abstention is not a position shift on the ordinal
/// scale.
pub fn classify_shift(previous: Vote, current: Vote) -> Option<PositionShift> {
    if previous == current {
        return Some(PositionShift::SamePosition);
    }
    let (old, new) = (previous.ordinal()?, current.ordinal()?);
    if new == 1 {
        Some(PositionShift::MovingToMiddle)
    } else if new > old {
        Some(PositionShift::StrongerAgree)
    } else {
        Some(PositionShift::StrongerDisagree)
    }
}

/// Point-in-time consensus measurement over the latest votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    /// Fraction of responding reviewers on the plurality vote, in [0, 1].
    pub consensus_level: f64,
    /// The plurality vote; ties break toward the lowest ordinal.
    pub plurality_vote: Option<Vote>,
    /// Count of reviewers with a counted (non-abstain) vote.
    pub responding: usize,
    /// Counted votes by value.
    pub distribution: BTreeMap<Vote, usize>,
}

impl ConsensusSnapshot {
    fn empty() -> Self {
        Self {
            consensus_level: 0.0,
            plurality_vote: None,
            responding: 0,
            distribution: BTreeMap::new(),
        }
    }
}

/// Pure consensus detector for the open-floor phase.
///
/// Evaluated every `check_interval` turns starting from the first full
/// interval, so it can never report convergence on turn 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceDetector {
    /// Consensus level required to stop the debate early.
    pub convergence_threshold: f64,
    /// Turns between consensus checks.
    pub check_interval: u32,
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self {
            convergence_threshold: 0.75,
            check_interval: 3,
        }
    }
}

impl ConvergenceDetector {
    /// Whether a consensus check is due after the given 1-based turn.
    pub fn is_check_turn(&self, turn: u32) -> bool {
        turn >= self.check_interval && turn % self.check_interval == 0
    }

    /// Measure consensus across the latest vote of every reviewer.
    /// Abstentions are excluded from both numerator and denominator.
    pub fn evaluate(&self, latest_votes: &BTreeMap<ReviewerId, Vote>) -> ConsensusSnapshot {
        let mut distribution: BTreeMap<Vote, usize> = BTreeMap::new();
        for vote in latest_votes.values().filter(|v| v.is_counted()) {
            *distribution.entry(*vote).or_insert(0) += 1;
        }

        let responding: usize = distribution.values().sum();
        if responding == 0 {
            return ConsensusSnapshot::empty();
        }

        let plurality = plurality_vote(&distribution);
        let agreeing = plurality.and_then(|v| distribution.get(&v)).copied().unwrap_or(0);

        ConsensusSnapshot {
            consensus_level: agreeing as f64 / responding as f64,
            plurality_vote: plurality,
            responding,
            distribution,
        }
    }

    /// Whether the debate has converged at this turn.
    pub fn converged(&self, snapshot: &ConsensusSnapshot, turn: u32) -> bool {
        self.is_check_turn(turn) && snapshot.consensus_level >= self.convergence_threshold
    }
}

/// The vote held by the most reviewers. Ties break toward the lowest
/// ordinal (reject before conditional before approve) for determinism.
pub fn plurality_vote(distribution: &BTreeMap<Vote, usize>) -> Option<Vote> {
    let max = distribution.values().copied().max()?;
    // BTreeMap iterates in ordinal order, so the first vote at the max
    // count is the lowest-ordinal one.
    distribution
        .iter()
        .find(|(_, count)| **count == max)
        .map(|(vote, _)| *vote)
}
