//! Conclave — Debate & Consensus Engine
//!
//! Several independent, differently-biased reviewers evaluate one
//! proposed artifact, argue through bounded rounds, and converge on a
//! single adjudicated decision with a reproducible audit trail.
//!
//! # Debate Flow
//!
//! ```text
//! Intake → InitialReactions → OpenFloor ──→ Arbitration → Done
//!   │            │               │ ▲             │
//!   │            │ parallel      │ │ turn loop   ├─ hard rules
//!   │            │ fan-out       ▼ │             ├─ weighted score
//!   │            │           speaker →           └─ FinalDecision
//!   │            │           provider →
//!   │            │           convergence check
//!   │            │
//!   │            └─ quorum miss → InsufficientQuorum
//!   └─ bad roster/config → ConfigurationError
//! ```
//!
//! Reviewer reasoning lives behind the [`provider::ReasoningProvider`]
//! trait; storage behind [`persistence::Persistence`]. Both degrade
//! gracefully — only configuration and quorum failures surface as
//! errors. The out-of-band learning step in [`weights`] nudges base
//! weights from real-world outcome feedback without ever touching a
//! session in flight.

pub mod arbitration;
pub mod conflict;
pub mod convergence;
pub mod opinion;
pub mod orchestrator;
pub mod persistence;
pub mod provider;
pub mod roster;
pub mod session;
pub mod speaker;
pub mod trace;
pub mod weights;

pub use arbitration::{
    Attribution, DecisionThresholds, FinalDecision, HardRule, HardRulePredicate, ScoringEngine,
};
pub use convergence::{ConsensusSnapshot, ConvergenceDetector, PositionShift};
pub use opinion::{Judgment, Opinion, Proposal, ReviewerId, Transcript, Vote};
pub use orchestrator::{DebateConfig, DebateError, DebateReport, DebateRunner, TerminationReason};
pub use persistence::{
    JsonFilePersistence, load_weight_store, MemoryPersistence, Persistence, RetryPolicy,
    RetryingPersistence,
};
pub use provider::{ProviderError, ReasoningProvider, ReviewRequest, ScriptedProvider};
pub use roster::{Reviewer, Roster};
pub use session::{DebatePhase, DebateSession};
pub use speaker::SpeakerSelector;
pub use trace::{ReasoningTraceBuilder, TraceEvent, TraceStep};
pub use weights::{OutcomeFeedback, WeightAdjustmentRule, WeightStore};
