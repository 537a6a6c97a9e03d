//! Core data model — votes, opinions, proposals, and the transcript.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a reviewer on the roster.
pub type ReviewerId = String;

/// Valid score range for an opinion.
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// A reviewer's stance on the proposal.
///
/// Ordered by ordinal: reject (0) < conditional (1) < approve (2).
/// `Abstain` carries no ordinal and is excluded from consensus math.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    /// The proposal should not proceed.
    Reject,
    /// Acceptable only with modifications.
    Conditional,
    /// The proposal should proceed as-is.
    Approve,
    /// No position — timeout, failure, or explicit pass.
    Abstain,
}

impl Vote {
    /// Ordinal position used for tie-breaking and position-shift math.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Self::Reject => Some(0),
            Self::Conditional => Some(1),
            Self::Approve => Some(2),
            Self::Abstain => None,
        }
    }

    /// Whether this vote counts toward consensus and scoring.
    pub fn is_counted(self) -> bool {
        self != Self::Abstain
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reject => write!(f, "reject"),
            Self::Conditional => write!(f, "conditional"),
            Self::Approve => write!(f, "approve"),
            Self::Abstain => write!(f, "abstain"),
        }
    }
}

/// The artifact under review. Immutable for the life of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Stable identifier for the artifact.
    pub proposal_id: String,
    /// Opaque payload — the engine never interprets it.
    pub body: String,
    /// Free-form metadata visible to reviewers and hard rules.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Proposal {
    pub fn new(proposal_id: &str, body: &str) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            body: body.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Raw evaluation returned by a reasoning provider.
///
/// The orchestrator stamps reviewer identity, round, and timestamp when
/// recording a judgment as an [`Opinion`], so providers cannot forge
/// either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub vote: Vote,
    /// Overall score 0–100. Out-of-range values are clamped and flagged.
    pub score: Option<f64>,
    pub reasoning: String,
    pub concerns: Vec<String>,
    /// Named sub-scores (e.g. `risk`, `compliance`) consumed by hard rules.
    pub dimensions: BTreeMap<String, f64>,
}

impl Judgment {
    pub fn new(vote: Vote, score: f64) -> Self {
        Self {
            vote,
            score: Some(score),
            reasoning: String::new(),
            concerns: Vec::new(),
            dimensions: BTreeMap::new(),
        }
    }

    /// A scoreless abstention.
    pub fn abstain() -> Self {
        Self {
            vote: Vote::Abstain,
            score: None,
            reasoning: String::new(),
            concerns: Vec::new(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = reasoning.to_string();
        self
    }

    pub fn with_dimension(mut self, name: &str, value: f64) -> Self {
        self.dimensions.insert(name.to_string(), value);
        self
    }
}

/// One reviewer's recorded position for one round.
///
/// Opinions are append-only: once in the transcript they are never edited,
/// only superseded by a later round from the same reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub reviewer_id: ReviewerId,
    /// 0 for initial reactions, open-floor turn index otherwise.
    pub round: u32,
    pub vote: Vote,
    /// `None` for abstentions, which contribute zero weight.
    pub score: Option<f64>,
    pub reasoning: String,
    pub concerns: Vec<String>,
    pub dimensions: BTreeMap<String, f64>,
    /// Set when the raw judgment was out of domain and had to be repaired.
    pub flagged: bool,
    pub timestamp: DateTime<Utc>,
}

impl Opinion {
    /// Record a sanitized judgment as an opinion for this reviewer/round.
    pub fn from_judgment(reviewer_id: &str, round: u32, judgment: Judgment, flagged: bool) -> Self {
        Self {
            reviewer_id: reviewer_id.to_string(),
            round,
            vote: judgment.vote,
            score: judgment.score,
            reasoning: judgment.reasoning,
            concerns: judgment.concerns,
            dimensions: judgment.dimensions,
            flagged,
            timestamp: Utc::now(),
        }
    }

    /// Abstention placeholder for a reviewer that failed to respond.
    pub fn abstain(reviewer_id: &str, round: u32, reason: &str) -> Self {
        Self {
            reviewer_id: reviewer_id.to_string(),
            round,
            vote: Vote::Abstain,
            score: None,
            reasoning: reason.to_string(),
            concerns: Vec::new(),
            dimensions: BTreeMap::new(),
            flagged: false,
            timestamp: Utc::now(),
        }
    }

    pub fn is_abstain(&self) -> bool {
        self.vote == Vote::Abstain
    }
}

/// Error for an opinion that would collide with an existing (reviewer, round).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateOpinion {
    pub reviewer_id: ReviewerId,
    pub round: u32,
}

impl std::fmt::Display for DuplicateOpinion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "duplicate opinion for reviewer {} in round {}",
            self.reviewer_id, self.round
        )
    }
}

impl std::error::Error for DuplicateOpinion {}

/// Ordered, append-only record of every opinion in a session.
///
/// Single writer (the orchestrator). Enforces at most one opinion per
/// (reviewer, round).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    opinions: Vec<Opinion>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an opinion, rejecting (reviewer, round) collisions.
    pub fn append(&mut self, opinion: Opinion) -> Result<(), DuplicateOpinion> {
        let collision = self
            .opinions
            .iter()
            .any(|o| o.reviewer_id == opinion.reviewer_id && o.round == opinion.round);
        if collision {
            return Err(DuplicateOpinion {
                reviewer_id: opinion.reviewer_id,
                round: opinion.round,
            });
        }
        self.opinions.push(opinion);
        Ok(())
    }

    pub fn opinions(&self) -> &[Opinion] {
        &self.opinions
    }

    pub fn len(&self) -> usize {
        self.opinions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opinions.is_empty()
    }

    /// The most recent opinion from each reviewer, keyed by reviewer id.
    pub fn latest_opinions(&self) -> BTreeMap<ReviewerId, Opinion> {
        let mut latest: BTreeMap<ReviewerId, Opinion> = BTreeMap::new();
        for opinion in &self.opinions {
            // Later entries supersede earlier ones; the transcript is ordered.
            latest.insert(opinion.reviewer_id.clone(), opinion.clone());
        }
        latest
    }

    /// The most recent vote from each reviewer.
    pub fn latest_votes(&self) -> BTreeMap<ReviewerId, Vote> {
        self.latest_opinions()
            .into_iter()
            .map(|(id, o)| (id, o.vote))
            .collect()
    }

    /// Opinions recorded for a specific round, in transcript order.
    pub fn round_opinions(&self, round: u32) -> Vec<&Opinion> {
        self.opinions.iter().filter(|o| o.round == round).collect()
    }

    /// Reviewers that produced a counted (non-abstain) opinion in a round.
    pub fn responders(&self, round: u32) -> usize {
        self.opinions
            .iter()
            .filter(|o| o.round == round && o.vote.is_counted())
            .count()
    }

    /// How many opinions were flagged as repaired/malformed.
    pub fn flagged_count(&self) -> usize {
        self.opinions.iter().filter(|o| o.flagged).count()
    }
}
