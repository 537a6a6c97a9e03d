//! Reviewer weight store and outcome-driven weight drift.
//!
//! Live sessions read the store exactly once, at session start, through
//! [`WeightStore::snapshot`]. The learning step runs out of band, after
//! real-world outcome feedback arrives, and only moves `base_weight` in
//! bounded steps — a session in flight never observes the drift.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::opinion::{ReviewerId, Vote};
use crate::roster::{Reviewer, Roster};
use crate::session::DebateSession;

/// Bounded step applied per outcome.
pub const WEIGHT_STEP: f64 = 0.02;
/// Base weights stay inside this band.
pub const WEIGHT_MIN: f64 = 0.0;
pub const WEIGHT_MAX: f64 = 1.0;
/// Scores at or past these marks count as high-conviction predictions.
const HIGH_CONVICTION_APPROVE: f64 = 75.0;
const HIGH_CONVICTION_REJECT: f64 = 25.0;
/// Smoothing factor for the rolling success rate.
const SUCCESS_RATE_ALPHA: f64 = 0.1;

/// Named weight adjustment keyed to a context condition.
///
/// When the session is started with the rule's trigger active (e.g.
/// `crisis_mode`), each delta is added to the reviewer's base weight and
/// clamped at zero. Deltas are not renormalized — the scoring engine
/// normalizes at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustmentRule {
    pub trigger: String,
    pub deltas: BTreeMap<ReviewerId, f64>,
}

impl WeightAdjustmentRule {
    pub fn new(trigger: &str) -> Self {
        Self {
            trigger: trigger.to_string(),
            deltas: BTreeMap::new(),
        }
    }

    pub fn with_delta(mut self, reviewer_id: &str, delta: f64) -> Self {
        self.deltas.insert(reviewer_id.to_string(), delta);
        self
    }
}

/// One reviewer's stake in an outcome: what they last voted and how
/// strongly they scored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerPrediction {
    pub reviewer_id: ReviewerId,
    pub vote: Vote,
    pub score: Option<f64>,
}

/// Real-world feedback on a decided session, consumed by the learning
/// step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeFeedback {
    pub session_id: String,
    /// Whether the artifact landed well (no backlash, goals met).
    pub outcome_positive: bool,
    pub predictions: Vec<ReviewerPrediction>,
}

impl OutcomeFeedback {
    /// Build feedback from a finished session's final positions.
    pub fn from_session(session: &DebateSession, outcome_positive: bool) -> Self {
        let predictions = session
            .transcript
            .latest_opinions()
            .into_values()
            .map(|o| ReviewerPrediction {
                reviewer_id: o.reviewer_id,
                vote: o.vote,
                score: o.score,
            })
            .collect();
        Self {
            session_id: session.id.clone(),
            outcome_positive,
            predictions,
        }
    }
}

/// Holds each reviewer's base weight and performance history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeightStore {
    reviewers: BTreeMap<ReviewerId, Reviewer>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from a roster, keeping any existing records.
    pub fn from_roster(roster: &Roster) -> Self {
        let mut store = Self::new();
        for reviewer in roster.iter() {
            store.upsert(reviewer.clone());
        }
        store
    }

    pub fn get(&self, reviewer_id: &str) -> Option<&Reviewer> {
        self.reviewers.get(reviewer_id)
    }

    pub fn upsert(&mut self, reviewer: Reviewer) {
        self.reviewers.insert(reviewer.id.clone(), reviewer);
    }

    pub fn len(&self) -> usize {
        self.reviewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reviewers.is_empty()
    }

    /// Fixed per-session weight view: base weight (stored record if
    /// present, roster default otherwise) plus every matching adjustment
    /// rule delta, clamped at zero.
    pub fn snapshot(
        &self,
        roster: &Roster,
        rules: &[WeightAdjustmentRule],
        active_conditions: &BTreeSet<String>,
    ) -> BTreeMap<ReviewerId, f64> {
        let mut snapshot = BTreeMap::new();
        for reviewer in roster.iter() {
            let base = self
                .reviewers
                .get(&reviewer.id)
                .map(|r| r.base_weight)
                .unwrap_or(reviewer.base_weight);

            let delta: f64 = rules
                .iter()
                .filter(|rule| active_conditions.contains(&rule.trigger))
                .filter_map(|rule| rule.deltas.get(&reviewer.id))
                .sum();

            snapshot.insert(reviewer.id.clone(), (base + delta).max(0.0));
        }
        snapshot
    }

    /// Apply outcome feedback: correct predictions nudge the base weight
    /// up by [`WEIGHT_STEP`], incorrect high-conviction predictions nudge
    /// it down. Conditional votes and abstentions adjust nothing.
    pub fn record_outcome(&mut self, feedback: &OutcomeFeedback) {
        for prediction in &feedback.predictions {
            let Some(reviewer) = self.reviewers.get_mut(&prediction.reviewer_id) else {
                debug!(
                    reviewer = %prediction.reviewer_id,
                    "outcome for unknown reviewer ignored"
                );
                continue;
            };

            let verdict = grade_prediction(prediction, feedback.outcome_positive);
            let Some(correct) = verdict else { continue };

            let before = reviewer.base_weight;
            if correct {
                reviewer.base_weight = (reviewer.base_weight + WEIGHT_STEP).min(WEIGHT_MAX);
            } else if is_high_conviction(prediction) {
                reviewer.base_weight = (reviewer.base_weight - WEIGHT_STEP).max(WEIGHT_MIN);
            }

            let hit = if correct { 1.0 } else { 0.0 };
            let history = &mut reviewer.performance;
            history.success_rate =
                (1.0 - SUCCESS_RATE_ALPHA) * history.success_rate + SUCCESS_RATE_ALPHA * hit;
            history.samples += 1;

            info!(
                reviewer = %prediction.reviewer_id,
                session = %feedback.session_id,
                correct,
                weight_before = before,
                weight_after = reviewer.base_weight,
                "outcome recorded"
            );
        }
    }
}

/// Whether the prediction was right (`Some(true)`), wrong (`Some(false)`),
/// or not gradable (conditional/abstain).
fn grade_prediction(prediction: &ReviewerPrediction, outcome_positive: bool) -> Option<bool> {
    match prediction.vote {
        Vote::Approve => Some(outcome_positive),
        Vote::Reject => Some(!outcome_positive),
        Vote::Conditional | Vote::Abstain => None,
    }
}

fn is_high_conviction(prediction: &ReviewerPrediction) -> bool {
    match (prediction.vote, prediction.score) {
        (Vote::Approve, Some(score)) => score >= HIGH_CONVICTION_APPROVE,
        (Vote::Reject, Some(score)) => score <= HIGH_CONVICTION_REJECT,
        _ => false,
    }
}
