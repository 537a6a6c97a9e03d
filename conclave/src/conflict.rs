//! Pairwise disagreement detection across the latest opinions.
//!
//! Conflicts never change the decision — the scoring engine and hard
//! rules own that — but they are surfaced in the audit trace so a reader
//! can see where the room split.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::opinion::{Opinion, ReviewerId, Vote};

/// Score distance that counts as a significant gap.
const SCORE_GAP_THRESHOLD: f64 = 40.0;
/// Distance on a shared dimension that counts as tension.
const DIMENSION_GAP_THRESHOLD: f64 = 40.0;

/// Severity of a detected conflict, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What kind of disagreement was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Direct approve vs reject opposition.
    VoteOpposition,
    /// Large gap between overall scores.
    ScoreGap,
    /// Large gap on a shared named dimension.
    DimensionTension,
}

/// A disagreement between two reviewers' latest positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub reviewers: [ReviewerId; 2],
    pub description: String,
}

/// Aggregate view of all detected conflicts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub total: usize,
    pub by_severity: BTreeMap<ConflictSeverity, usize>,
    /// Critical conflicts, or too many conflicts overall, deserve a
    /// closer read of the trace.
    pub requires_attention: bool,
}

/// Detect all pairwise conflicts across the latest opinion set.
/// Abstentions carry no position and never conflict.
pub fn detect_conflicts(latest_opinions: &[Opinion]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let counted: Vec<&Opinion> = latest_opinions.iter().filter(|o| !o.is_abstain()).collect();

    for (i, a) in counted.iter().enumerate() {
        for b in &counted[i + 1..] {
            conflicts.extend(pairwise(a, b));
        }
    }
    conflicts
}

fn pairwise(a: &Opinion, b: &Opinion) -> Vec<Conflict> {
    let mut found = Vec::new();
    let pair = [a.reviewer_id.clone(), b.reviewer_id.clone()];

    let opposed = matches!(
        (a.vote, b.vote),
        (Vote::Approve, Vote::Reject) | (Vote::Reject, Vote::Approve)
    );
    if opposed {
        found.push(Conflict {
            kind: ConflictKind::VoteOpposition,
            severity: ConflictSeverity::Critical,
            reviewers: pair.clone(),
            description: format!(
                "{} votes {}, {} votes {}",
                a.reviewer_id, a.vote, b.reviewer_id, b.vote
            ),
        });
    }

    if let (Some(score_a), Some(score_b)) = (a.score, b.score) {
        let gap = (score_a - score_b).abs();
        if gap >= SCORE_GAP_THRESHOLD && !opposed {
            found.push(Conflict {
                kind: ConflictKind::ScoreGap,
                severity: ConflictSeverity::Medium,
                reviewers: pair.clone(),
                description: format!(
                    "{} scores {:.0}, {} scores {:.0}",
                    a.reviewer_id, score_a, b.reviewer_id, score_b
                ),
            });
        }
    }

    for (dimension, value_a) in &a.dimensions {
        if let Some(value_b) = b.dimensions.get(dimension) {
            if (value_a - value_b).abs() >= DIMENSION_GAP_THRESHOLD {
                found.push(Conflict {
                    kind: ConflictKind::DimensionTension,
                    severity: ConflictSeverity::High,
                    reviewers: pair.clone(),
                    description: format!(
                        "{} gap: {} reports {:.0}, {} reports {:.0}",
                        dimension, a.reviewer_id, value_a, b.reviewer_id, value_b
                    ),
                });
            }
        }
    }

    found
}

/// Roll conflicts up into a summary for the trace.
pub fn summarize(conflicts: &[Conflict]) -> ConflictSummary {
    let mut by_severity: BTreeMap<ConflictSeverity, usize> = BTreeMap::new();
    for conflict in conflicts {
        *by_severity.entry(conflict.severity).or_insert(0) += 1;
    }
    let critical = by_severity
        .get(&ConflictSeverity::Critical)
        .copied()
        .unwrap_or(0);

    ConflictSummary {
        total: conflicts.len(),
        requires_attention: critical > 0 || conflicts.len() > 3,
        by_severity,
    }
}
