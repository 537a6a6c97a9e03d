//! Reasoning trace — typed audit record of everything the engine did.
//!
//! Every significant step (phase changes, opinions, convergence checks,
//! degraded operations) is appended as a timestamped event; the builder
//! renders the transcript and decision into a reviewable document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arbitration::FinalDecision;
use crate::conflict::ConflictSummary;
use crate::opinion::{ReviewerId, Vote};
use crate::session::{DebatePhase, DebateSession};

/// One recorded step in the debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TraceStep {
    PhaseEntered {
        phase: DebatePhase,
        reason: String,
    },
    OpinionRecorded {
        reviewer_id: ReviewerId,
        round: u32,
        vote: Vote,
        score: Option<f64>,
    },
    SpeakerSelected {
        reviewer_id: ReviewerId,
        turn: u32,
    },
    ConvergenceChecked {
        turn: u32,
        consensus_level: f64,
        plurality: Option<Vote>,
        position_shifts: u32,
    },
    ReviewerTimedOut {
        reviewer_id: ReviewerId,
        round: u32,
    },
    ProviderFailed {
        reviewer_id: ReviewerId,
        round: u32,
        detail: String,
    },
    MalformedJudgment {
        reviewer_id: ReviewerId,
        round: u32,
        detail: String,
    },
    PersistenceDegraded {
        operation: String,
        detail: String,
    },
    DeadlineExceeded {
        elapsed_ms: u64,
        budget_ms: u64,
    },
    StallDetected {
        checks: u32,
    },
    HardRuleFired {
        rule_id: String,
    },
    DecisionRendered {
        vote: Vote,
        weighted_score: f64,
        confidence: f64,
    },
}

/// A timestamped trace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub step: TraceStep,
}

/// Collects trace events and renders the audit record.
#[derive(Debug, Default)]
pub struct ReasoningTraceBuilder {
    events: Vec<TraceEvent>,
}

impl ReasoningTraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a builder from previously captured events, e.g. to render
    /// the audit record for a finished report.
    pub fn from_events(events: Vec<TraceEvent>) -> Self {
        Self { events }
    }

    pub fn push(&mut self, step: TraceStep) {
        self.events.push(TraceEvent {
            timestamp: Utc::now(),
            step,
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Render the session, decision, and event log as markdown.
    pub fn render_markdown(
        &self,
        session: &DebateSession,
        decision: Option<&FinalDecision>,
        conflicts: &ConflictSummary,
    ) -> String {
        let mut out = String::new();

        out.push_str("# Debate Audit Record\n\n");
        out.push_str(&format!("**Session:** {}\n", session.id));
        out.push_str(&format!("**Proposal:** {}\n", session.proposal.proposal_id));
        out.push_str(&format!(
            "**Reviewers:** {}\n\n",
            session.reviewers.join(", ")
        ));

        out.push_str("## Transcript\n\n");
        for opinion in session.transcript.opinions() {
            let score = opinion
                .score
                .map(|s| format!("{:.0}", s))
                .unwrap_or_else(|| "—".to_string());
            out.push_str(&format!(
                "- round {} | {} | {} | score {}",
                opinion.round, opinion.reviewer_id, opinion.vote, score
            ));
            if opinion.flagged {
                out.push_str(" | repaired");
            }
            out.push('\n');
            if !opinion.reasoning.is_empty() {
                out.push_str(&format!("  - {}\n", opinion.reasoning));
            }
        }

        out.push_str("\n## Decision\n\n");
        match decision {
            Some(decision) => {
                out.push_str(&format!("{}\n", decision.summary_line()));
                if let Some(rule) = &decision.overridden_by {
                    out.push_str(&format!("Overridden by hard rule `{}`.\n", rule));
                }
                if !decision.attribution.is_empty() {
                    out.push_str("\n### Attribution\n\n");
                    for entry in &decision.attribution {
                        out.push_str(&format!(
                            "- {}: weight {:.2}, score {:.0}, share {:.0}%\n",
                            entry.reviewer_id,
                            entry.weight,
                            entry.score,
                            entry.share * 100.0
                        ));
                    }
                }
            }
            None => out.push_str("No decision was produced.\n"),
        }

        if conflicts.total > 0 {
            out.push_str(&format!(
                "\n## Conflicts\n\n{} conflicts detected",
                conflicts.total
            ));
            if conflicts.requires_attention {
                out.push_str(" — review recommended");
            }
            out.push('\n');
        }

        out.push_str("\n## Event Log\n\n");
        for event in &self.events {
            out.push_str(&format!(
                "- {} {}\n",
                event.timestamp.format("%H:%M:%S%.3f"),
                describe(&event.step)
            ));
        }

        out
    }
}

fn describe(step: &TraceStep) -> String {
    match step {
        TraceStep::PhaseEntered { phase, reason } => {
            format!("phase {} ({})", phase, reason)
        }
        TraceStep::OpinionRecorded {
            reviewer_id,
            round,
            vote,
            ..
        } => format!("{} voted {} in round {}", reviewer_id, vote, round),
        TraceStep::SpeakerSelected { reviewer_id, turn } => {
            format!("{} takes the floor (turn {})", reviewer_id, turn)
        }
        TraceStep::ConvergenceChecked {
            turn,
            consensus_level,
            ..
        } => format!(
            "convergence check at turn {}: {:.0}% agreement",
            turn,
            consensus_level * 100.0
        ),
        TraceStep::ReviewerTimedOut { reviewer_id, round } => {
            format!("{} timed out in round {}", reviewer_id, round)
        }
        TraceStep::ProviderFailed {
            reviewer_id,
            detail,
            ..
        } => format!("{} provider failed: {}", reviewer_id, detail),
        TraceStep::MalformedJudgment {
            reviewer_id,
            detail,
            ..
        } => format!("{} returned a malformed judgment: {}", reviewer_id, detail),
        TraceStep::PersistenceDegraded { operation, detail } => {
            format!("persistence degraded ({}): {}", operation, detail)
        }
        TraceStep::DeadlineExceeded {
            elapsed_ms,
            budget_ms,
        } => format!("deadline exceeded ({}ms / {}ms)", elapsed_ms, budget_ms),
        TraceStep::StallDetected { checks } => {
            format!("stalled for {} consecutive checks", checks)
        }
        TraceStep::HardRuleFired { rule_id } => format!("hard rule fired: {}", rule_id),
        TraceStep::DecisionRendered {
            vote,
            weighted_score,
            confidence,
        } => format!(
            "decision: {} (score {:.1}, confidence {:.2})",
            vote, weighted_score, confidence
        ),
    }
}
