//! Speaker selection for the open-floor phase.
//!
//! Priority order, restricted to reviewers other than the last speaker:
//! dissenters from the plurality vote first, then reviewers who have
//! spoken less than the roster average, then anyone else. Selection
//! within a tier is uniform over a seeded RNG so test runs reproduce.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::convergence::plurality_vote;
use crate::opinion::{ReviewerId, Vote};

/// Chooses the next reviewer to hold the floor.
pub struct SpeakerSelector {
    rng: StdRng,
}

impl SpeakerSelector {
    /// Create a selector with a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pick the next speaker. Returns `None` only for an empty roster.
    ///
    /// The last speaker is never picked while at least two reviewers are
    /// eligible; with a single-reviewer roster the constraint is relaxed
    /// instead of deadlocking.
    pub fn select(
        &mut self,
        roster: &[ReviewerId],
        last_speaker: Option<&str>,
        latest_votes: &BTreeMap<ReviewerId, Vote>,
        turn_counts: &BTreeMap<ReviewerId, u32>,
    ) -> Option<ReviewerId> {
        if roster.is_empty() {
            return None;
        }

        let mut eligible: Vec<&ReviewerId> = roster
            .iter()
            .filter(|id| Some(id.as_str()) != last_speaker)
            .collect();
        if eligible.is_empty() {
            eligible = roster.iter().collect();
        }

        let mut distribution: BTreeMap<Vote, usize> = BTreeMap::new();
        for vote in latest_votes.values().filter(|v| v.is_counted()) {
            *distribution.entry(*vote).or_insert(0) += 1;
        }
        let plurality = plurality_vote(&distribution);

        let dissenters: Vec<&ReviewerId> = eligible
            .iter()
            .copied()
            .filter(|id| {
                latest_votes
                    .get(*id)
                    .map(|v| v.is_counted() && Some(*v) != plurality)
                    .unwrap_or(false)
            })
            .collect();
        if !dissenters.is_empty() {
            return Some(self.pick(&dissenters));
        }

        let mean_turns = roster
            .iter()
            .map(|id| turn_counts.get(id).copied().unwrap_or(0) as f64)
            .sum::<f64>()
            / roster.len() as f64;
        let under_participants: Vec<&ReviewerId> = eligible
            .iter()
            .copied()
            .filter(|id| (turn_counts.get(*id).copied().unwrap_or(0) as f64) < mean_turns)
            .collect();
        if !under_participants.is_empty() {
            return Some(self.pick(&under_participants));
        }

        Some(self.pick(&eligible))
    }

    fn pick(&mut self, candidates: &[&ReviewerId]) -> ReviewerId {
        let index = self.rng.gen_range(0..candidates.len());
        candidates[index].clone()
    }
}
