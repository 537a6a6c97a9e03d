//! Weighted-score arbitration — hard rules, decision thresholds, and the
//! final decision.
//!
//! The scoring engine is a pure function of the latest opinions and the
//! session weight snapshot: identical inputs always produce an identical
//! [`FinalDecision`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::opinion::{Opinion, ReviewerId, Vote};

/// Confidence multiplier applied once per malformed (flagged) opinion.
const FLAGGED_CONFIDENCE_PENALTY: f64 = 0.9;

/// Predicate a hard rule evaluates over the latest opinion set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HardRulePredicate {
    /// Any reviewer reported the named dimension above the threshold.
    DimensionOver { dimension: String, threshold: f64 },
    /// At least `count` reviewers cast the given vote.
    VoteAtLeast { vote: Vote, count: usize },
    /// Any reviewer's overall score fell below the threshold.
    ScoreUnder { threshold: f64 },
}

impl HardRulePredicate {
    /// Whether this predicate matches the latest opinion set.
    pub fn matches(&self, opinions: &[Opinion]) -> bool {
        match self {
            Self::DimensionOver {
                dimension,
                threshold,
            } => opinions
                .iter()
                .any(|o| o.dimensions.get(dimension).is_some_and(|v| *v > *threshold)),
            Self::VoteAtLeast { vote, count } => {
                opinions.iter().filter(|o| o.vote == *vote).count() >= *count
            }
            Self::ScoreUnder { threshold } => opinions
                .iter()
                .any(|o| o.score.is_some_and(|s| s < *threshold)),
        }
    }
}

/// Non-negotiable override rule. Rules are evaluated in ascending
/// priority order and the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardRule {
    pub id: String,
    pub priority: u32,
    pub predicate: HardRulePredicate,
    /// The vote forced when the rule fires. Always a rejection in
    /// practice — hard rules exist to veto, not to promote.
    pub forced_vote: Vote,
}

impl HardRule {
    /// A rejection rule, the standard form.
    pub fn reject(id: &str, priority: u32, predicate: HardRulePredicate) -> Self {
        Self {
            id: id.to_string(),
            priority,
            predicate,
            forced_vote: Vote::Reject,
        }
    }
}

/// Score boundaries for the three-way decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Weighted score at or above this approves.
    pub approve: f64,
    /// Weighted score at or above this (but below `approve`) is
    /// conditional; anything lower rejects.
    pub conditional: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            approve: 75.0,
            conditional: 40.0,
        }
    }
}

impl DecisionThresholds {
    pub fn classify(&self, weighted_score: f64) -> Vote {
        if weighted_score >= self.approve {
            Vote::Approve
        } else if weighted_score >= self.conditional {
            Vote::Conditional
        } else {
            Vote::Reject
        }
    }
}

/// One reviewer's contribution to the weighted score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub reviewer_id: ReviewerId,
    /// Weight used at evaluation time (post-adjustment snapshot value).
    pub weight: f64,
    pub score: f64,
    /// This reviewer's share of the total weighted score mass, in [0, 1].
    pub share: f64,
}

/// Weighted support for a vote option that did not win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedAlternative {
    pub vote: Vote,
    pub weighted_support: f64,
}

/// The adjudicated outcome of a debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub approved: bool,
    pub vote: Vote,
    pub weighted_score: f64,
    /// Agreement-derived certainty in [0, 1]; 1.0 when a hard rule fired.
    pub confidence: f64,
    /// Id of the hard rule that short-circuited the decision, if any.
    pub overridden_by: Option<String>,
    pub attribution: Vec<Attribution>,
    pub rejected_alternatives: Vec<RejectedAlternative>,
}

impl FinalDecision {
    pub fn summary_line(&self) -> String {
        match &self.overridden_by {
            Some(rule) => format!(
                "[{}] overridden by {} | confidence {:.2}",
                self.vote, rule, self.confidence
            ),
            None => format!(
                "[{}] weighted score {:.1} | confidence {:.2}",
                self.vote, self.weighted_score, self.confidence
            ),
        }
    }
}

/// Combines weighted scores and hard override rules into a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringEngine {
    thresholds: DecisionThresholds,
    /// Sorted by ascending priority at construction.
    hard_rules: Vec<HardRule>,
}

impl ScoringEngine {
    pub fn new(thresholds: DecisionThresholds, mut hard_rules: Vec<HardRule>) -> Self {
        hard_rules.sort_by_key(|r| r.priority);
        Self {
            thresholds,
            hard_rules,
        }
    }

    /// Adjudicate the latest opinion per reviewer against the session
    /// weight snapshot.
    ///
    /// `consensus_level` is the last convergence measurement; it becomes
    /// the decision confidence unless a hard rule fires.
    pub fn evaluate(
        &self,
        latest_opinions: &[Opinion],
        weights: &BTreeMap<ReviewerId, f64>,
        consensus_level: f64,
    ) -> FinalDecision {
        // 1. Hard rules short-circuit everything else.
        for rule in &self.hard_rules {
            if rule.predicate.matches(latest_opinions) {
                debug!(rule = %rule.id, "hard rule fired");
                return FinalDecision {
                    approved: false,
                    vote: rule.forced_vote,
                    weighted_score: 0.0,
                    confidence: 1.0,
                    overridden_by: Some(rule.id.clone()),
                    attribution: Vec::new(),
                    rejected_alternatives: Vec::new(),
                };
            }
        }

        // 2. Weighted score over counted opinions, sorted by reviewer id
        // so the output is stable regardless of input order.
        let mut counted: Vec<&Opinion> = latest_opinions
            .iter()
            .filter(|o| o.vote.is_counted() && o.score.is_some())
            .collect();
        counted.sort_by(|a, b| a.reviewer_id.cmp(&b.reviewer_id));

        let mut weight_sum = 0.0;
        let mut mass_sum = 0.0;
        for opinion in &counted {
            let weight = weights.get(&opinion.reviewer_id).copied().unwrap_or(0.0);
            weight_sum += weight;
            mass_sum += weight * opinion.score.unwrap_or(0.0);
        }

        if weight_sum <= 0.0 {
            warn!("no weighted responders; rejecting with zero confidence");
            return FinalDecision {
                approved: false,
                vote: Vote::Reject,
                weighted_score: 0.0,
                confidence: 0.0,
                overridden_by: None,
                attribution: Vec::new(),
                rejected_alternatives: Vec::new(),
            };
        }

        let weighted_score = mass_sum / weight_sum;

        // 3. Threshold classification.
        let vote = self.thresholds.classify(weighted_score);

        // 4. Confidence: consensus level, degraded for repaired opinions.
        let flagged = latest_opinions.iter().filter(|o| o.flagged).count();
        let confidence =
            (consensus_level * FLAGGED_CONFIDENCE_PENALTY.powi(flagged as i32)).clamp(0.0, 1.0);

        // 5. Attribution shares over the weighted score mass.
        let attribution: Vec<Attribution> = counted
            .iter()
            .map(|opinion| {
                let weight = weights.get(&opinion.reviewer_id).copied().unwrap_or(0.0);
                let score = opinion.score.unwrap_or(0.0);
                Attribution {
                    reviewer_id: opinion.reviewer_id.clone(),
                    weight,
                    score,
                    share: if mass_sum > 0.0 {
                        weight * score / mass_sum
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        // Weighted vote mass of the options that lost.
        let mut support: BTreeMap<Vote, f64> = BTreeMap::new();
        for opinion in &counted {
            let weight = weights.get(&opinion.reviewer_id).copied().unwrap_or(0.0);
            *support.entry(opinion.vote).or_insert(0.0) += weight;
        }
        let rejected_alternatives: Vec<RejectedAlternative> = support
            .into_iter()
            .filter(|(v, mass)| *v != vote && *mass > 0.0)
            .map(|(v, mass)| RejectedAlternative {
                vote: v,
                weighted_support: mass,
            })
            .collect();

        FinalDecision {
            approved: vote == Vote::Approve,
            vote,
            weighted_score,
            confidence,
            overridden_by: None,
            attribution,
            rejected_alternatives,
        }
    }
}
