//! Debate orchestration — drives the full phase cycle end to end.
//!
//! ```text
//! Intake → InitialReactions → OpenFloor → Arbitration → Done
//!   │            │                │            │
//!   │            │ (parallel      │ (one turn  └─ ScoringEngine +
//!   │            │  fan-out,      │  at a time:    hard rules →
//!   │            │  join barrier) │  speaker →     FinalDecision
//!   │            │                │  provider →
//!   │            │                │  convergence)
//!   │            └─ quorum miss → InsufficientQuorum (no decision)
//!   └─ validation failure → ConfigurationError
//! ```
//!
//! Reviewer failures degrade to abstentions, persistence failures degrade
//! to trace events; only configuration and quorum problems surface as
//! errors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::arbitration::{DecisionThresholds, FinalDecision, HardRule, ScoringEngine};
use crate::conflict::{self, ConflictSummary};
use crate::convergence::{classify_shift, ConsensusSnapshot, ConvergenceDetector, PositionShift};
use crate::opinion::{Judgment, Opinion, Proposal, ReviewerId, SCORE_MAX, SCORE_MIN};
use crate::persistence::{MemoryPersistence, Persistence, RetryPolicy, RetryingPersistence};
use crate::provider::{ReasoningProvider, ReviewRequest};
use crate::roster::Roster;
use crate::session::{DebatePhase, DebateSession};
use crate::speaker::SpeakerSelector;
use crate::trace::{ReasoningTraceBuilder, TraceEvent, TraceStep};
use crate::weights::{WeightAdjustmentRule, WeightStore};

/// Configuration for a debate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Fraction of the roster that must respond in initial reactions.
    pub quorum_fraction: f64,
    /// Open-floor turn ceiling.
    pub max_turns: u32,
    /// Turns between convergence checks.
    pub check_interval: u32,
    /// Consensus level that ends the open floor early.
    pub convergence_threshold: f64,
    /// Per-reviewer budget for initial reactions.
    pub reaction_timeout: Duration,
    /// Per-turn budget in the open floor.
    pub turn_timeout: Duration,
    /// Whole-session budget, checked before each open-floor turn.
    pub session_deadline: Duration,
    /// Consecutive shift-free convergence checks before the floor closes
    /// as stalled. 0 disables stall detection.
    pub stall_checks: u32,
    pub thresholds: DecisionThresholds,
    pub hard_rules: Vec<HardRule>,
    pub weight_rules: Vec<WeightAdjustmentRule>,
    /// Named context conditions arming weight rules (e.g. `crisis_mode`).
    pub active_conditions: BTreeSet<String>,
    /// Seed for speaker selection, for reproducible runs.
    pub speaker_seed: u64,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            quorum_fraction: 0.6,
            max_turns: 12,
            check_interval: 3,
            convergence_threshold: 0.75,
            reaction_timeout: Duration::from_secs(20),
            turn_timeout: Duration::from_secs(20),
            session_deadline: Duration::from_secs(180),
            stall_checks: 2,
            thresholds: DecisionThresholds::default(),
            hard_rules: Vec::new(),
            weight_rules: Vec::new(),
            active_conditions: BTreeSet::new(),
            speaker_seed: 0,
        }
    }
}

/// Error surfaced to the caller. Everything else degrades in place.
#[derive(Debug, Clone, Error)]
pub enum DebateError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient quorum: {responded}/{roster} reviewers responded, need {quorum:.0}%")]
    InsufficientQuorum {
        responded: usize,
        roster: usize,
        quorum: f64,
    },

    #[error("internal state error: {0}")]
    Internal(String),
}

/// Why the open floor ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    Converged { turn: u32 },
    MaxTurnsReached { turns: u32 },
    Stalled { checks: u32 },
    DeadlineExceeded { elapsed_ms: u64 },
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged { turn } => write!(f, "converged at turn {}", turn),
            Self::MaxTurnsReached { turns } => write!(f, "max turns reached ({})", turns),
            Self::Stalled { checks } => write!(f, "stalled for {} checks", checks),
            Self::DeadlineExceeded { elapsed_ms } => {
                write!(f, "deadline exceeded ({}ms)", elapsed_ms)
            }
        }
    }
}

/// Everything a downstream consumer receives from a finished debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateReport {
    pub session: DebateSession,
    pub decision: FinalDecision,
    pub termination: TerminationReason,
    /// Open-floor turns that actually ran.
    pub open_floor_turns: u32,
    /// Consensus level at each convergence check, in order.
    pub consensus_by_check: Vec<f64>,
    /// Total position shifts observed during the open floor.
    pub position_shifts: u32,
    pub conflicts: ConflictSummary,
    pub trace: Vec<TraceEvent>,
}

impl DebateReport {
    pub fn summary_line(&self) -> String {
        format!(
            "{} | {} | {} opinions",
            self.decision.summary_line(),
            self.termination,
            self.session.transcript.len()
        )
    }

    /// Render the full audit record.
    pub fn audit_markdown(&self) -> String {
        let mut out = ReasoningTraceBuilder::from_events(self.trace.clone()).render_markdown(
            &self.session,
            Some(&self.decision),
            &self.conflicts,
        );

        out.push_str("\n## Debate Summary\n\n");
        out.push_str(&format!("- Open-floor turns: {}\n", self.open_floor_turns));
        out.push_str(&format!("- Ended: {}\n", self.termination));
        out.push_str(&format!("- Position shifts: {}\n", self.position_shifts));
        if !self.consensus_by_check.is_empty() {
            let series: Vec<String> = self
                .consensus_by_check
                .iter()
                .map(|level| format!("{:.0}%", level * 100.0))
                .collect();
            out.push_str(&format!("- Consensus by check: {}\n", series.join(", ")));
        }
        out
    }
}

enum SolicitFailure {
    TimedOut,
    Failed(String),
}

/// Runs debates for a fixed roster and provider set.
pub struct DebateRunner {
    roster: Roster,
    providers: BTreeMap<ReviewerId, Arc<dyn ReasoningProvider>>,
    persistence: Arc<dyn Persistence>,
    config: DebateConfig,
}

impl std::fmt::Debug for DebateRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebateRunner")
            .field("roster", &self.roster)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DebateRunner {
    /// Validate configuration and build a runner. All configuration
    /// problems fail here, before any session starts.
    pub fn new(
        roster: Roster,
        providers: BTreeMap<ReviewerId, Arc<dyn ReasoningProvider>>,
        config: DebateConfig,
    ) -> Result<Self, DebateError> {
        for reviewer in roster.iter() {
            if !providers.contains_key(&reviewer.id) {
                return Err(DebateError::Configuration(format!(
                    "no reasoning provider for reviewer {}",
                    reviewer.id
                )));
            }
        }
        if !(config.quorum_fraction > 0.0 && config.quorum_fraction <= 1.0) {
            return Err(DebateError::Configuration(format!(
                "quorum_fraction {} outside (0, 1]",
                config.quorum_fraction
            )));
        }
        if !(config.convergence_threshold > 0.0 && config.convergence_threshold <= 1.0) {
            return Err(DebateError::Configuration(format!(
                "convergence_threshold {} outside (0, 1]",
                config.convergence_threshold
            )));
        }
        if config.max_turns == 0 {
            return Err(DebateError::Configuration("max_turns must be ≥ 1".to_string()));
        }
        if config.check_interval == 0 {
            return Err(DebateError::Configuration(
                "check_interval must be ≥ 1".to_string(),
            ));
        }
        if config.thresholds.approve <= config.thresholds.conditional {
            return Err(DebateError::Configuration(format!(
                "approve threshold {} must exceed conditional threshold {}",
                config.thresholds.approve, config.thresholds.conditional
            )));
        }

        Ok(Self {
            roster,
            providers,
            persistence: Arc::new(RetryingPersistence::new(
                MemoryPersistence::new(),
                RetryPolicy::default(),
            )),
            config,
        })
    }

    /// Swap in a persistence backend. Compose with [`RetryingPersistence`]
    /// when the backend can fail transiently.
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn config(&self) -> &DebateConfig {
        &self.config
    }

    /// Run one debate to a decision.
    ///
    /// Weights are snapshotted from the store once, here; drift applied
    /// by the learning step later never reaches a session in flight.
    pub async fn run(
        &self,
        proposal: Proposal,
        weight_store: &WeightStore,
    ) -> Result<DebateReport, DebateError> {
        let mut session = DebateSession::new(proposal, self.roster.ids());
        let mut trace = ReasoningTraceBuilder::new();

        let weights = weight_store.snapshot(
            &self.roster,
            &self.config.weight_rules,
            &self.config.active_conditions,
        );

        info!(
            session = %session.id,
            proposal = %session.proposal.proposal_id,
            reviewers = self.roster.len(),
            "debate started"
        );

        self.transition(&mut session, &mut trace, DebatePhase::InitialReactions, "roster validated")?;
        self.persist_session(&session, &mut trace).await;

        self.run_initial_reactions(&mut session, &mut trace).await?;
        self.check_quorum(&session)?;

        self.transition(&mut session, &mut trace, DebatePhase::OpenFloor, "quorum met")?;
        let floor = self.run_open_floor(&mut session, &mut trace).await?;

        self.transition(
            &mut session,
            &mut trace,
            DebatePhase::Arbitration,
            &floor.termination.to_string(),
        )?;

        let detector = self.detector();
        let consensus_level = match (&floor.termination, &floor.last_snapshot) {
            (TerminationReason::Converged { .. }, Some(snapshot)) => snapshot.consensus_level,
            // Ended on turns/deadline/stall: measure fresh.
            _ => detector.evaluate(&session.transcript.latest_votes()).consensus_level,
        };

        let latest: Vec<Opinion> = session.transcript.latest_opinions().into_values().collect();
        let detected = conflict::detect_conflicts(&latest);
        let conflicts = conflict::summarize(&detected);

        let engine = ScoringEngine::new(self.config.thresholds, self.config.hard_rules.clone());
        let decision = engine.evaluate(&latest, &weights, consensus_level);

        if let Some(rule_id) = &decision.overridden_by {
            trace.push(TraceStep::HardRuleFired {
                rule_id: rule_id.clone(),
            });
        }
        trace.push(TraceStep::DecisionRendered {
            vote: decision.vote,
            weighted_score: decision.weighted_score,
            confidence: decision.confidence,
        });

        self.transition(&mut session, &mut trace, DebatePhase::Done, "decision emitted")?;
        self.persist_session(&session, &mut trace).await;

        info!(
            session = %session.id,
            vote = %decision.vote,
            weighted_score = decision.weighted_score,
            confidence = decision.confidence,
            termination = %floor.termination,
            "debate complete"
        );

        Ok(DebateReport {
            session,
            decision,
            termination: floor.termination,
            open_floor_turns: floor.turns_taken,
            consensus_by_check: floor.consensus_by_check,
            position_shifts: floor.position_shifts,
            conflicts,
            trace: trace.into_events(),
        })
    }

    /// Phase 1: everyone reacts once, in parallel, behind a join barrier.
    async fn run_initial_reactions(
        &self,
        session: &mut DebateSession,
        trace: &mut ReasoningTraceBuilder,
    ) -> Result<(), DebateError> {
        let calls = self.roster.iter().filter_map(|reviewer| {
            let provider = self.providers.get(&reviewer.id)?.clone();
            let request = ReviewRequest {
                proposal: session.proposal.clone(),
                reviewer: reviewer.clone(),
                round: 0,
                visible_history: Vec::new(),
            };
            let budget = self.config.reaction_timeout;
            Some(async move {
                let outcome = call_provider(provider, request, budget).await;
                (reviewer.id.clone(), outcome)
            })
        });

        let results = futures::future::join_all(calls).await;

        for (reviewer_id, outcome) in results {
            let opinion = self.admit(&reviewer_id, 0, outcome, trace);
            self.record(session, trace, opinion).await?;
        }
        Ok(())
    }

    fn check_quorum(&self, session: &DebateSession) -> Result<(), DebateError> {
        let responded = session.transcript.responders(0);
        let roster = self.roster.len();
        let ratio = responded as f64 / roster as f64;
        if ratio < self.config.quorum_fraction {
            warn!(
                session = %session.id,
                responded,
                roster,
                quorum = self.config.quorum_fraction,
                "insufficient quorum, failing fast"
            );
            return Err(DebateError::InsufficientQuorum {
                responded,
                roster,
                quorum: self.config.quorum_fraction * 100.0,
            });
        }
        Ok(())
    }

    /// Phase 2: strictly sequential turns until convergence, stall,
    /// deadline, or the turn ceiling.
    async fn run_open_floor(
        &self,
        session: &mut DebateSession,
        trace: &mut ReasoningTraceBuilder,
    ) -> Result<FloorOutcome, DebateError> {
        let detector = self.detector();
        let mut selector = SpeakerSelector::new(self.config.speaker_seed);
        let mut turn_counts: BTreeMap<ReviewerId, u32> = BTreeMap::new();

        let mut outcome = FloorOutcome {
            termination: TerminationReason::MaxTurnsReached {
                turns: self.config.max_turns,
            },
            turns_taken: 0,
            consensus_by_check: Vec::new(),
            position_shifts: 0,
            last_snapshot: None,
        };
        let mut shifts_in_window = 0u32;
        let mut stalled_checks = 0u32;
        let started = Instant::now();

        for turn in 1..=self.config.max_turns {
            let elapsed = started.elapsed();
            if elapsed >= self.config.session_deadline {
                let elapsed_ms = elapsed.as_millis() as u64;
                trace.push(TraceStep::DeadlineExceeded {
                    elapsed_ms,
                    budget_ms: self.config.session_deadline.as_millis() as u64,
                });
                outcome.termination = TerminationReason::DeadlineExceeded { elapsed_ms };
                break;
            }

            let votes = session.transcript.latest_votes();
            let Some(speaker) = selector.select(
                &session.reviewers,
                session.last_speaker.as_deref(),
                &votes,
                &turn_counts,
            ) else {
                break;
            };
            let Some(reviewer) = self.roster.get(&speaker) else {
                break;
            };
            trace.push(TraceStep::SpeakerSelected {
                reviewer_id: speaker.clone(),
                turn,
            });
            debug!(session = %session.id, turn, speaker = %speaker, "turn begins");

            let Some(provider) = self.providers.get(&speaker) else {
                break;
            };
            let request = ReviewRequest {
                proposal: session.proposal.clone(),
                reviewer: reviewer.clone(),
                round: turn,
                visible_history: session.transcript.opinions().to_vec(),
            };
            let result = call_provider(provider.clone(), request, self.config.turn_timeout).await;

            let previous_vote = votes.get(&speaker).copied();
            let opinion = self.admit(&speaker, turn, result, trace);
            let current_vote = opinion.vote;
            self.record(session, trace, opinion).await?;

            *turn_counts.entry(speaker.clone()).or_insert(0) += 1;
            session.last_speaker = Some(speaker);
            outcome.turns_taken = turn;

            if let Some(previous) = previous_vote {
                if let Some(shift) = classify_shift(previous, current_vote) {
                    if shift != PositionShift::SamePosition {
                        outcome.position_shifts += 1;
                        shifts_in_window += 1;
                    }
                }
            }

            if detector.is_check_turn(turn) {
                let snapshot = detector.evaluate(&session.transcript.latest_votes());
                outcome.consensus_by_check.push(snapshot.consensus_level);
                trace.push(TraceStep::ConvergenceChecked {
                    turn,
                    consensus_level: snapshot.consensus_level,
                    plurality: snapshot.plurality_vote,
                    position_shifts: shifts_in_window,
                });

                if detector.converged(&snapshot, turn) {
                    outcome.termination = TerminationReason::Converged { turn };
                    outcome.last_snapshot = Some(snapshot);
                    break;
                }

                if self.config.stall_checks > 0 && shifts_in_window == 0 {
                    stalled_checks += 1;
                    if stalled_checks >= self.config.stall_checks {
                        trace.push(TraceStep::StallDetected {
                            checks: stalled_checks,
                        });
                        outcome.termination = TerminationReason::Stalled {
                            checks: stalled_checks,
                        };
                        outcome.last_snapshot = Some(snapshot);
                        break;
                    }
                } else {
                    stalled_checks = 0;
                }
                shifts_in_window = 0;
                outcome.last_snapshot = Some(snapshot);
            }
        }

        Ok(outcome)
    }

    /// Turn a provider outcome into a recorded opinion, degrading
    /// failures into abstentions and repairing malformed scores.
    fn admit(
        &self,
        reviewer_id: &str,
        round: u32,
        outcome: Result<Judgment, SolicitFailure>,
        trace: &mut ReasoningTraceBuilder,
    ) -> Opinion {
        match outcome {
            Ok(judgment) => {
                let (judgment, repaired) = sanitize(judgment);
                if let Some(detail) = &repaired {
                    warn!(reviewer = reviewer_id, round, detail = %detail, "malformed judgment repaired");
                    trace.push(TraceStep::MalformedJudgment {
                        reviewer_id: reviewer_id.to_string(),
                        round,
                        detail: detail.clone(),
                    });
                }
                Opinion::from_judgment(reviewer_id, round, judgment, repaired.is_some())
            }
            Err(SolicitFailure::TimedOut) => {
                warn!(reviewer = reviewer_id, round, "reviewer timed out");
                trace.push(TraceStep::ReviewerTimedOut {
                    reviewer_id: reviewer_id.to_string(),
                    round,
                });
                Opinion::abstain(reviewer_id, round, "timed out")
            }
            Err(SolicitFailure::Failed(detail)) => {
                warn!(reviewer = reviewer_id, round, detail = %detail, "provider failed");
                trace.push(TraceStep::ProviderFailed {
                    reviewer_id: reviewer_id.to_string(),
                    round,
                    detail: detail.clone(),
                });
                Opinion::abstain(reviewer_id, round, &format!("provider failed: {}", detail))
            }
        }
    }

    async fn record(
        &self,
        session: &mut DebateSession,
        trace: &mut ReasoningTraceBuilder,
        opinion: Opinion,
    ) -> Result<(), DebateError> {
        trace.push(TraceStep::OpinionRecorded {
            reviewer_id: opinion.reviewer_id.clone(),
            round: opinion.round,
            vote: opinion.vote,
            score: opinion.score,
        });
        let session_id = session.id.clone();
        session
            .record_opinion(opinion.clone())
            .map_err(|e| DebateError::Internal(e.to_string()))?;

        if let Err(e) = self.persistence.append_opinion(&session_id, &opinion).await {
            warn!(session = %session_id, error = %e, "failed to persist opinion");
            trace.push(TraceStep::PersistenceDegraded {
                operation: "append_opinion".to_string(),
                detail: e.to_string(),
            });
        }
        Ok(())
    }

    async fn persist_session(&self, session: &DebateSession, trace: &mut ReasoningTraceBuilder) {
        if let Err(e) = self.persistence.save_session(session).await {
            warn!(session = %session.id, error = %e, "failed to persist session snapshot");
            trace.push(TraceStep::PersistenceDegraded {
                operation: "save_session".to_string(),
                detail: e.to_string(),
            });
        }
    }

    fn transition(
        &self,
        session: &mut DebateSession,
        trace: &mut ReasoningTraceBuilder,
        to: DebatePhase,
        reason: &str,
    ) -> Result<(), DebateError> {
        session
            .transition(to, reason)
            .map_err(|e| DebateError::Internal(e.to_string()))?;
        trace.push(TraceStep::PhaseEntered {
            phase: to,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn detector(&self) -> ConvergenceDetector {
        ConvergenceDetector {
            convergence_threshold: self.config.convergence_threshold,
            check_interval: self.config.check_interval,
        }
    }
}

struct FloorOutcome {
    termination: TerminationReason,
    turns_taken: u32,
    consensus_by_check: Vec<f64>,
    position_shifts: u32,
    last_snapshot: Option<ConsensusSnapshot>,
}

async fn call_provider(
    provider: Arc<dyn ReasoningProvider>,
    request: ReviewRequest,
    budget: Duration,
) -> Result<Judgment, SolicitFailure> {
    match timeout(budget, provider.evaluate(request)).await {
        Ok(Ok(judgment)) => Ok(judgment),
        Ok(Err(e)) => Err(SolicitFailure::Failed(e.to_string())),
        Err(_) => Err(SolicitFailure::TimedOut),
    }
}

/// Clamp out-of-domain scores into range and report what was repaired.
fn sanitize(mut judgment: Judgment) -> (Judgment, Option<String>) {
    match judgment.score {
        Some(score) if !score.is_finite() => {
            judgment.score = None;
            (judgment, Some("non-finite score dropped".to_string()))
        }
        Some(score) if !(SCORE_MIN..=SCORE_MAX).contains(&score) => {
            let clamped = score.clamp(SCORE_MIN, SCORE_MAX);
            judgment.score = Some(clamped);
            (
                judgment,
                Some(format!("score {} clamped to {}", score, clamped)),
            )
        }
        None if judgment.vote.is_counted() => (
            judgment,
            Some("counted vote carried no score".to_string()),
        ),
        _ => (judgment, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opinion::Vote;
    use crate::persistence::PersistenceError;
    use crate::provider::{FailingProvider, ProviderError, ScriptedProvider};
    use crate::roster::Reviewer;
    use async_trait::async_trait;

    /// Provider that sleeps past any test timeout.
    struct SleepyProvider;

    #[async_trait]
    impl ReasoningProvider for SleepyProvider {
        async fn evaluate(&self, _request: ReviewRequest) -> Result<Judgment, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Judgment::new(Vote::Approve, 80.0))
        }
    }

    /// Persistence backend that always fails.
    struct BrokenPersistence;

    #[async_trait]
    impl Persistence for BrokenPersistence {
        async fn save_session(&self, _session: &DebateSession) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("disk on fire".to_string()))
        }

        async fn append_opinion(
            &self,
            _session_id: &str,
            _opinion: &Opinion,
        ) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("disk on fire".to_string()))
        }

        async fn load_weights(
            &self,
            _reviewer_id: &str,
        ) -> Result<Option<Reviewer>, PersistenceError> {
            Err(PersistenceError::Backend("disk on fire".to_string()))
        }
    }

    fn roster(ids: &[&str]) -> Roster {
        Roster::new(
            ids.iter()
                .map(|id| Reviewer::new(id, &format!("{} reviewer", id), 0.2))
                .collect(),
        )
        .unwrap()
    }

    fn fixed(vote: Vote, score: f64) -> Arc<dyn ReasoningProvider> {
        Arc::new(ScriptedProvider::fixed(Judgment::new(vote, score)))
    }

    fn providers(
        entries: Vec<(&str, Arc<dyn ReasoningProvider>)>,
    ) -> BTreeMap<ReviewerId, Arc<dyn ReasoningProvider>> {
        entries
            .into_iter()
            .map(|(id, p)| (id.to_string(), p))
            .collect()
    }

    fn fast_config() -> DebateConfig {
        DebateConfig {
            reaction_timeout: Duration::from_millis(100),
            turn_timeout: Duration::from_millis(100),
            session_deadline: Duration::from_secs(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unanimous_approval_converges_at_first_check() {
        let roster = roster(&["trend", "brand", "engagement"]);
        let providers = providers(vec![
            ("trend", fixed(Vote::Approve, 90.0)),
            ("brand", fixed(Vote::Approve, 85.0)),
            ("engagement", fixed(Vote::Approve, 88.0)),
        ]);
        let runner = DebateRunner::new(roster, providers, fast_config()).unwrap();

        let report = runner
            .run(Proposal::new("post-1", "teaser"), &WeightStore::new())
            .await
            .unwrap();

        assert_eq!(report.termination, TerminationReason::Converged { turn: 3 });
        assert!(report.decision.approved);
        assert_eq!(report.session.phase, DebatePhase::Done);
        assert_eq!(report.open_floor_turns, 3);
        assert_eq!(report.consensus_by_check, vec![1.0]);
        // Well short of the 12-turn ceiling.
        assert_eq!(report.session.transcript.len(), 3 + 3);
    }

    #[tokio::test]
    async fn test_quorum_exactly_met_proceeds() {
        // 3 of 5 respond at quorum 0.6 — exactly met.
        let roster = roster(&["a", "b", "c", "d", "e"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 82.0)),
            ("c", fixed(Vote::Approve, 88.0)),
            ("d", Arc::new(FailingProvider)),
            ("e", Arc::new(FailingProvider)),
        ]);
        let runner = DebateRunner::new(roster, providers, fast_config()).unwrap();

        let report = runner
            .run(Proposal::new("post-2", "teaser"), &WeightStore::new())
            .await
            .unwrap();
        assert_eq!(report.session.phase, DebatePhase::Done);
    }

    #[tokio::test]
    async fn test_insufficient_quorum_fails_fast() {
        // 2 of 5 respond at quorum 0.6.
        let roster = roster(&["a", "b", "c", "d", "e"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 82.0)),
            ("c", Arc::new(FailingProvider)),
            ("d", Arc::new(FailingProvider)),
            ("e", Arc::new(FailingProvider)),
        ]);
        let runner = DebateRunner::new(roster, providers, fast_config()).unwrap();

        let err = runner
            .run(Proposal::new("post-3", "teaser"), &WeightStore::new())
            .await
            .unwrap_err();
        match err {
            DebateError::InsufficientQuorum {
                responded, roster, ..
            } => {
                assert_eq!(responded, 2);
                assert_eq!(roster, 5);
            }
            other => panic!("expected quorum error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_abstain() {
        let roster = roster(&["a", "b", "c", "slow"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 82.0)),
            ("c", fixed(Vote::Approve, 88.0)),
            ("slow", Arc::new(SleepyProvider)),
        ]);
        let mut config = fast_config();
        config.reaction_timeout = Duration::from_millis(20);
        // Keep the sleeper off the floor so open-floor turns stay fast.
        config.turn_timeout = Duration::from_millis(20);
        let runner = DebateRunner::new(roster, providers, config).unwrap();

        let report = runner
            .run(Proposal::new("post-4", "teaser"), &WeightStore::new())
            .await
            .unwrap();

        let slow = report
            .session
            .transcript
            .round_opinions(0)
            .into_iter()
            .find(|o| o.reviewer_id == "slow")
            .cloned()
            .unwrap();
        assert!(slow.is_abstain());
        assert!(report
            .trace
            .iter()
            .any(|e| matches!(&e.step, TraceStep::ReviewerTimedOut { reviewer_id, round: 0 } if reviewer_id == "slow")));
    }

    #[tokio::test]
    async fn test_hard_rule_overrides_decision() {
        let roster = roster(&["trend", "risk", "brand"]);
        let risky = Arc::new(ScriptedProvider::fixed(
            Judgment::new(Vote::Approve, 74.0).with_dimension("risk", 80.0),
        ));
        let providers = providers(vec![
            ("trend", fixed(Vote::Approve, 74.0)),
            ("risk", risky),
            ("brand", fixed(Vote::Approve, 62.0)),
        ]);
        let mut config = fast_config();
        config.hard_rules = vec![HardRule::reject(
            "risk-hard-rule",
            0,
            crate::arbitration::HardRulePredicate::DimensionOver {
                dimension: "risk".to_string(),
                threshold: 75.0,
            },
        )];
        let runner = DebateRunner::new(roster, providers, config).unwrap();

        let report = runner
            .run(Proposal::new("post-5", "edgy teaser"), &WeightStore::new())
            .await
            .unwrap();

        assert!(!report.decision.approved);
        assert_eq!(
            report.decision.overridden_by.as_deref(),
            Some("risk-hard-rule")
        );
        assert!((report.decision.confidence - 1.0).abs() < f64::EPSILON);
        assert!(report
            .trace
            .iter()
            .any(|e| matches!(&e.step, TraceStep::HardRuleFired { rule_id } if rule_id == "risk-hard-rule")));
    }

    #[tokio::test]
    async fn test_split_room_runs_to_max_turns() {
        // An even split never crosses the threshold; with stall detection
        // off, the floor runs out the turn ceiling.
        let roster = roster(&["optimist", "pessimist"]);
        let providers = providers(vec![
            ("optimist", fixed(Vote::Approve, 80.0)),
            ("pessimist", fixed(Vote::Reject, 30.0)),
        ]);
        let mut config = fast_config();
        config.max_turns = 5;
        config.stall_checks = 0;
        let runner = DebateRunner::new(roster, providers, config).unwrap();

        let report = runner
            .run(Proposal::new("post-6", "divisive teaser"), &WeightStore::new())
            .await
            .unwrap();

        assert_eq!(
            report.termination,
            TerminationReason::MaxTurnsReached { turns: 5 }
        );
        assert_eq!(report.session.phase, DebatePhase::Done);
    }

    #[tokio::test]
    async fn test_stall_closes_the_floor() {
        // 2:1 split that never moves — consensus 67% stays under 75%.
        let roster = roster(&["a", "b", "dissident"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 85.0)),
            ("dissident", fixed(Vote::Reject, 20.0)),
        ]);
        let runner = DebateRunner::new(roster, providers, fast_config()).unwrap();

        let report = runner
            .run(Proposal::new("post-7", "teaser"), &WeightStore::new())
            .await
            .unwrap();

        assert_eq!(report.termination, TerminationReason::Stalled { checks: 2 });
        assert_eq!(report.position_shifts, 0);
        assert!(report
            .trace
            .iter()
            .any(|e| matches!(e.step, TraceStep::StallDetected { .. })));
    }

    #[tokio::test]
    async fn test_zero_deadline_aborts_into_arbitration() {
        let roster = roster(&["a", "b", "c"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 82.0)),
            ("c", fixed(Vote::Conditional, 60.0)),
        ]);
        let mut config = fast_config();
        config.session_deadline = Duration::ZERO;
        let runner = DebateRunner::new(roster, providers, config).unwrap();

        let report = runner
            .run(Proposal::new("post-8", "teaser"), &WeightStore::new())
            .await
            .unwrap();

        assert!(matches!(
            report.termination,
            TerminationReason::DeadlineExceeded { .. }
        ));
        // Arbitrated from the initial reactions alone.
        assert_eq!(report.session.transcript.len(), 3);
        assert_eq!(report.open_floor_turns, 0);
        assert_eq!(report.session.phase, DebatePhase::Done);
        assert!(report
            .trace
            .iter()
            .any(|e| matches!(e.step, TraceStep::DeadlineExceeded { .. })));
    }

    #[tokio::test]
    async fn test_malformed_score_clamped_and_confidence_reduced() {
        let roster = roster(&["a", "b", "loud"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 82.0)),
            ("loud", fixed(Vote::Approve, 150.0)),
        ]);
        let runner = DebateRunner::new(roster, providers, fast_config()).unwrap();

        let report = runner
            .run(Proposal::new("post-9", "teaser"), &WeightStore::new())
            .await
            .unwrap();

        let loud = report.session.transcript.latest_opinions()["loud"].clone();
        assert_eq!(loud.score, Some(100.0));
        assert!(loud.flagged);
        // Unanimous approval, but one repaired opinion trims confidence.
        assert!((report.decision.confidence - 0.9).abs() < 1e-9);
        assert!(report
            .trace
            .iter()
            .any(|e| matches!(e.step, TraceStep::MalformedJudgment { .. })));
    }

    #[tokio::test]
    async fn test_broken_persistence_never_blocks_decision() {
        let roster = roster(&["a", "b"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 82.0)),
        ]);
        let runner = DebateRunner::new(roster, providers, fast_config())
            .unwrap()
            .with_persistence(Arc::new(BrokenPersistence));

        let report = runner
            .run(Proposal::new("post-10", "teaser"), &WeightStore::new())
            .await
            .unwrap();

        assert!(report.decision.approved);
        assert!(report
            .trace
            .iter()
            .any(|e| matches!(e.step, TraceStep::PersistenceDegraded { .. })));
    }

    #[tokio::test]
    async fn test_crisis_mode_shifts_the_outcome() {
        // Risk carries little weight normally; crisis mode hands it the room.
        let roster = Roster::new(vec![
            Reviewer::new("trend", "Trend Analyst", 0.6),
            Reviewer::new("risk", "Risk Assessor", 0.1),
        ])
        .unwrap();
        let providers = providers(vec![
            ("trend", fixed(Vote::Approve, 90.0)),
            ("risk", fixed(Vote::Reject, 10.0)),
        ]);

        let mut config = fast_config();
        config.stall_checks = 1;
        config.weight_rules = vec![WeightAdjustmentRule::new("crisis_mode")
            .with_delta("risk", 0.8)
            .with_delta("trend", -0.5)];

        let calm_runner =
            DebateRunner::new(roster.clone(), providers.clone(), config.clone()).unwrap();
        let calm = calm_runner
            .run(Proposal::new("post-11", "teaser"), &WeightStore::new())
            .await
            .unwrap();
        // 0.6*90 + 0.1*10 over 0.7 ≈ 78.6 — approves.
        assert!(calm.decision.approved);

        config.active_conditions = ["crisis_mode".to_string()].into_iter().collect();
        let crisis_runner = DebateRunner::new(roster, providers, config).unwrap();
        let crisis = crisis_runner
            .run(Proposal::new("post-11", "teaser"), &WeightStore::new())
            .await
            .unwrap();
        // 0.1*90 + 0.9*10 over 1.0 = 18 — rejects.
        assert!(!crisis.decision.approved);
        assert_eq!(crisis.decision.vote, Vote::Reject);
    }

    #[tokio::test]
    async fn test_missing_provider_is_configuration_error() {
        let roster = roster(&["a", "b"]);
        let providers = providers(vec![("a", fixed(Vote::Approve, 85.0))]);
        let err = DebateRunner::new(roster, providers, fast_config()).unwrap_err();
        assert!(matches!(err, DebateError::Configuration(_)));
        assert!(err.to_string().contains("b"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let make = |mutate: fn(&mut DebateConfig)| {
            let mut config = fast_config();
            mutate(&mut config);
            DebateRunner::new(
                roster(&["a"]),
                providers(vec![("a", fixed(Vote::Approve, 80.0))]),
                config,
            )
        };

        assert!(matches!(
            make(|c| c.quorum_fraction = 0.0),
            Err(DebateError::Configuration(_))
        ));
        assert!(matches!(
            make(|c| c.quorum_fraction = 1.5),
            Err(DebateError::Configuration(_))
        ));
        assert!(matches!(
            make(|c| c.max_turns = 0),
            Err(DebateError::Configuration(_))
        ));
        assert!(matches!(
            make(|c| c.check_interval = 0),
            Err(DebateError::Configuration(_))
        ));
        assert!(matches!(
            make(|c| c.thresholds.approve = 30.0),
            Err(DebateError::Configuration(_))
        ));
        assert!(make(|_| ()).is_ok());
    }

    #[tokio::test]
    async fn test_report_summary_and_audit() {
        let roster = roster(&["a", "b"]);
        let providers = providers(vec![
            ("a", fixed(Vote::Approve, 85.0)),
            ("b", fixed(Vote::Approve, 82.0)),
        ]);
        let runner = DebateRunner::new(roster, providers, fast_config()).unwrap();

        let report = runner
            .run(Proposal::new("post-12", "teaser"), &WeightStore::new())
            .await
            .unwrap();

        assert!(report.summary_line().contains("approve"));
        let audit = report.audit_markdown();
        assert!(audit.contains("# Debate Audit Record"));
        assert!(audit.contains("post-12"));
        assert!(audit.contains("## Debate Summary"));
        assert!(audit.contains("Open-floor turns: 3"));
    }
}
