//! Reasoning provider abstraction.
//!
//! A provider computes one reviewer's judgment for one round. Any
//! implementation — rule-based, LLM-backed, human-in-the-loop — can sit
//! behind this trait; the engine only requires that it answer within the
//! phase timeout or fail.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::opinion::{Judgment, Opinion, Proposal};
use crate::roster::Reviewer;

/// Error from a reasoning provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider failure: {0}")]
    Internal(String),
}

/// Everything a provider sees when asked for a judgment.
///
/// `visible_history` is the full transcript so far — everyone hears
/// everyone.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub proposal: Proposal,
    pub reviewer: Reviewer,
    pub round: u32,
    pub visible_history: Vec<Opinion>,
}

/// External capability that computes an opinion for a reviewer.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn evaluate(&self, request: ReviewRequest) -> Result<Judgment, ProviderError>;
}

/// Provider that replays a fixed sequence of judgments, then repeats the
/// last one. Drives the demo binary and deterministic tests.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Judgment>>,
    fallback: Judgment,
}

impl ScriptedProvider {
    /// Always answer with the same judgment.
    pub fn fixed(judgment: Judgment) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: judgment,
        }
    }

    /// Answer with each scripted judgment in turn, then repeat the last.
    pub fn sequence(mut judgments: Vec<Judgment>) -> Self {
        let fallback = judgments.pop().unwrap_or_else(Judgment::abstain);
        Self {
            script: Mutex::new(judgments.into_iter().collect()),
            fallback,
        }
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    async fn evaluate(&self, _request: ReviewRequest) -> Result<Judgment, ProviderError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| ProviderError::Internal("script lock poisoned".to_string()))?;
        Ok(script.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Provider that always fails. Exercises the abstention path in tests.
pub struct FailingProvider;

#[async_trait]
impl ReasoningProvider for FailingProvider {
    async fn evaluate(&self, _request: ReviewRequest) -> Result<Judgment, ProviderError> {
        Err(ProviderError::Unavailable("simulated outage".to_string()))
    }
}
