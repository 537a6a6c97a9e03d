//! Reviewer roster — participants, base weights, and roster validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::opinion::ReviewerId;

/// Rolling record of how well a reviewer's predictions have tracked
/// real-world outcomes. Mutated only by the out-of-band learning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHistory {
    /// Exponentially weighted success rate in [0, 1].
    pub success_rate: f64,
    /// Number of scored outcomes observed.
    pub samples: u32,
}

impl Default for PerformanceHistory {
    fn default() -> Self {
        // Neutral prior until outcomes arrive.
        Self {
            success_rate: 0.5,
            samples: 0,
        }
    }
}

/// A weighted participant that produces opinions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: ReviewerId,
    pub display_name: String,
    /// Long-lived voting weight, ≥ 0. Drifts slowly with outcomes.
    pub base_weight: f64,
    pub performance: PerformanceHistory,
}

impl Reviewer {
    pub fn new(id: &str, display_name: &str, base_weight: f64) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            base_weight,
            performance: PerformanceHistory::default(),
        }
    }
}

/// Error raised when a roster fails validation at session start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RosterError {
    #[error("roster is empty")]
    Empty,

    #[error("duplicate reviewer id: {0}")]
    DuplicateReviewer(String),

    #[error("invalid base weight {weight} for reviewer {reviewer}")]
    InvalidWeight { reviewer: String, weight: f64 },
}

/// Ordered list of reviewers for a debate session.
///
/// Order is significant: it fixes the fan-out order in initial reactions
/// and makes speaker selection reproducible under a fixed seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    reviewers: Vec<Reviewer>,
}

impl Roster {
    /// Validate and build a roster: non-empty, unique ids, finite
    /// non-negative weights.
    pub fn new(reviewers: Vec<Reviewer>) -> Result<Self, RosterError> {
        if reviewers.is_empty() {
            return Err(RosterError::Empty);
        }
        for (i, reviewer) in reviewers.iter().enumerate() {
            if !reviewer.base_weight.is_finite() || reviewer.base_weight < 0.0 {
                return Err(RosterError::InvalidWeight {
                    reviewer: reviewer.id.clone(),
                    weight: reviewer.base_weight,
                });
            }
            if reviewers[..i].iter().any(|r| r.id == reviewer.id) {
                return Err(RosterError::DuplicateReviewer(reviewer.id.clone()));
            }
        }
        Ok(Self { reviewers })
    }

    pub fn len(&self) -> usize {
        self.reviewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reviewers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reviewer> {
        self.reviewers.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Reviewer> {
        self.reviewers.iter().find(|r| r.id == id)
    }

    /// Reviewer ids in roster order.
    pub fn ids(&self) -> Vec<ReviewerId> {
        self.reviewers.iter().map(|r| r.id.clone()).collect()
    }
}
