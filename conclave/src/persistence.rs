//! Persistence seam — best-effort storage with retry and backoff.
//!
//! The in-memory transcript is authoritative: storage failures are
//! logged, retried with exponential backoff, and never block the
//! decision.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::opinion::Opinion;
use crate::roster::{Reviewer, Roster};
use crate::session::DebateSession;
use crate::weights::WeightStore;

/// Error during persistence operations.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("serialize failed: {0}")]
    Serialize(String),

    #[error("io failed: {0}")]
    Io(String),

    #[error("backend failed: {0}")]
    Backend(String),
}

/// Storage consumed by the orchestrator. All operations are best-effort
/// from the engine's point of view.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_session(&self, session: &DebateSession) -> Result<(), PersistenceError>;

    async fn append_opinion(
        &self,
        session_id: &str,
        opinion: &Opinion,
    ) -> Result<(), PersistenceError>;

    async fn load_weights(&self, reviewer_id: &str) -> Result<Option<Reviewer>, PersistenceError>;
}

/// In-memory backend for tests and the demo binary.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    sessions: Mutex<BTreeMap<String, DebateSession>>,
    opinions: Mutex<BTreeMap<String, Vec<Opinion>>>,
    weights: Mutex<BTreeMap<String, Reviewer>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, session_id: &str) -> Option<DebateSession> {
        self.sessions.lock().ok()?.get(session_id).cloned()
    }

    pub fn opinion_count(&self, session_id: &str) -> usize {
        self.opinions
            .lock()
            .map(|opinions| opinions.get(session_id).map(|v| v.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn put_weights(&self, reviewer: Reviewer) {
        if let Ok(mut weights) = self.weights.lock() {
            weights.insert(reviewer.id.clone(), reviewer);
        }
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save_session(&self, session: &DebateSession) -> Result<(), PersistenceError> {
        self.sessions
            .lock()
            .map_err(|_| PersistenceError::Backend("lock poisoned".to_string()))?
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn append_opinion(
        &self,
        session_id: &str,
        opinion: &Opinion,
    ) -> Result<(), PersistenceError> {
        self.opinions
            .lock()
            .map_err(|_| PersistenceError::Backend("lock poisoned".to_string()))?
            .entry(session_id.to_string())
            .or_default()
            .push(opinion.clone());
        Ok(())
    }

    async fn load_weights(&self, reviewer_id: &str) -> Result<Option<Reviewer>, PersistenceError> {
        Ok(self
            .weights
            .lock()
            .map_err(|_| PersistenceError::Backend("lock poisoned".to_string()))?
            .get(reviewer_id)
            .cloned())
    }
}

/// File backend: session snapshots as pretty JSON, opinions as JSONL,
/// weights as one JSON file per reviewer under `weights/`.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    root: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", session_id))
    }

    fn opinions_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.opinions.jsonl", session_id))
    }

    fn weights_path(&self, reviewer_id: &str) -> PathBuf {
        self.root.join("weights").join(format!("{}.json", reviewer_id))
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn save_session(&self, session: &DebateSession) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))?;
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        tokio::fs::write(self.session_path(&session.id), json)
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }

    async fn append_opinion(
        &self,
        session_id: &str,
        opinion: &Opinion,
    ) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))?;
        let mut line = serde_json::to_string(opinion)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.opinions_path(session_id))
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }

    async fn load_weights(&self, reviewer_id: &str) -> Result<Option<Reviewer>, PersistenceError> {
        match tokio::fs::read_to_string(self.weights_path(reviewer_id)).await {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| PersistenceError::Serialize(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io(e.to_string())),
        }
    }
}

/// Hydrate a weight store from stored reviewer records, one lookup per
/// roster seat. Reviewers the backend does not know, and lookups that
/// fail, fall back to the roster's configured weights — a cold or broken
/// store never prevents a session from starting.
pub async fn load_weight_store(persistence: &dyn Persistence, roster: &Roster) -> WeightStore {
    let mut store = WeightStore::new();
    for reviewer in roster.iter() {
        match persistence.load_weights(&reviewer.id).await {
            Ok(Some(stored)) => store.upsert(stored),
            Ok(None) => store.upsert(reviewer.clone()),
            Err(e) => {
                warn!(
                    reviewer = %reviewer.id,
                    error = %e,
                    "loading stored weights failed, using roster default"
                );
                store.upsert(reviewer.clone());
            }
        }
    }
    store
}

/// Exponential backoff schedule for persistence retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

/// Wraps a backend with the retry policy. The final error is still
/// returned so callers can record the degradation.
pub struct RetryingPersistence<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Persistence> RetryingPersistence<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn with_retries<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PersistenceError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "persistence call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<P: Persistence> Persistence for RetryingPersistence<P> {
    async fn save_session(&self, session: &DebateSession) -> Result<(), PersistenceError> {
        self.with_retries("save_session", || self.inner.save_session(session))
            .await
    }

    async fn append_opinion(
        &self,
        session_id: &str,
        opinion: &Opinion,
    ) -> Result<(), PersistenceError> {
        self.with_retries("append_opinion", || {
            self.inner.append_opinion(session_id, opinion)
        })
        .await
    }

    async fn load_weights(&self, reviewer_id: &str) -> Result<Option<Reviewer>, PersistenceError> {
        self.with_retries("load_weights", || self.inner.load_weights(reviewer_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opinion::{Judgment, Proposal, Vote};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_session() -> DebateSession {
        DebateSession::new(Proposal::new("p-1", "payload"), vec!["trend".to_string()])
    }

    fn make_opinion() -> Opinion {
        Opinion::from_judgment("trend", 0, Judgment::new(Vote::Approve, 80.0), false)
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryPersistence::new();
        let session = make_session();

        store.save_session(&session).await.unwrap();
        store.append_opinion(&session.id, &make_opinion()).await.unwrap();

        assert_eq!(store.session(&session.id).unwrap().id, session.id);
        assert_eq!(store.opinion_count(&session.id), 1);
    }

    #[tokio::test]
    async fn test_memory_weights() {
        let store = MemoryPersistence::new();
        store.put_weights(Reviewer::new("risk", "Risk Assessor", 0.3));

        let loaded = store.load_weights("risk").await.unwrap().unwrap();
        assert!((loaded.base_weight - 0.3).abs() < f64::EPSILON);
        assert!(store.load_weights("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_session_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        let session = make_session();

        store.save_session(&session).await.unwrap();

        let json = tokio::fs::read_to_string(dir.path().join(format!("{}.json", session.id)))
            .await
            .unwrap();
        let restored: DebateSession = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, session.id);
    }

    #[tokio::test]
    async fn test_file_opinions_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());

        store.append_opinion("s-1", &make_opinion()).await.unwrap();
        store.append_opinion("s-1", &make_opinion()).await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("s-1.opinions.jsonl"))
            .await
            .unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_file_missing_weights_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        assert!(store.load_weights("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_weight_store_prefers_stored_records() {
        let backend = MemoryPersistence::new();
        let mut drifted = Reviewer::new("risk", "Risk Assessor", 0.42);
        drifted.performance.samples = 9;
        backend.put_weights(drifted);

        let roster = Roster::new(vec![
            Reviewer::new("trend", "Trend Analyst", 0.2),
            Reviewer::new("risk", "Risk Assessor", 0.3),
        ])
        .unwrap();

        let store = load_weight_store(&backend, &roster).await;
        // Stored record wins; unknown reviewer falls back to the roster.
        assert!((store.get("risk").unwrap().base_weight - 0.42).abs() < f64::EPSILON);
        assert_eq!(store.get("risk").unwrap().performance.samples, 9);
        assert!((store.get("trend").unwrap().base_weight - 0.2).abs() < f64::EPSILON);
    }

    /// Backend whose weight lookups always fail.
    struct WeightlessPersistence;

    #[async_trait]
    impl Persistence for WeightlessPersistence {
        async fn save_session(&self, _session: &DebateSession) -> Result<(), PersistenceError> {
            Ok(())
        }

        async fn append_opinion(
            &self,
            _session_id: &str,
            _opinion: &Opinion,
        ) -> Result<(), PersistenceError> {
            Ok(())
        }

        async fn load_weights(
            &self,
            _reviewer_id: &str,
        ) -> Result<Option<Reviewer>, PersistenceError> {
            Err(PersistenceError::Backend("index offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_load_weight_store_degrades_to_roster_defaults() {
        let roster = Roster::new(vec![Reviewer::new("brand", "Brand Guardian", 0.25)]).unwrap();
        let store = load_weight_store(&WeightlessPersistence, &roster).await;
        assert!((store.get("brand").unwrap().base_weight - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_policy_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2), Duration::from_millis(800));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    /// Backend that fails a fixed number of times before succeeding.
    struct FlakyPersistence {
        failures_left: AtomicU32,
        inner: MemoryPersistence,
    }

    #[async_trait]
    impl Persistence for FlakyPersistence {
        async fn save_session(&self, session: &DebateSession) -> Result<(), PersistenceError> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err(PersistenceError::Backend("transient".to_string()));
            }
            self.inner.save_session(session).await
        }

        async fn append_opinion(
            &self,
            session_id: &str,
            opinion: &Opinion,
        ) -> Result<(), PersistenceError> {
            self.inner.append_opinion(session_id, opinion).await
        }

        async fn load_weights(
            &self,
            reviewer_id: &str,
        ) -> Result<Option<Reviewer>, PersistenceError> {
            self.inner.load_weights(reviewer_id).await
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let flaky = FlakyPersistence {
            failures_left: AtomicU32::new(2),
            inner: MemoryPersistence::new(),
        };
        let store = RetryingPersistence::new(
            flaky,
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
            },
        );

        store.save_session(&make_session()).await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let flaky = FlakyPersistence {
            failures_left: AtomicU32::new(10),
            inner: MemoryPersistence::new(),
        };
        let store = RetryingPersistence::new(
            flaky,
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        );

        let err = store.save_session(&make_session()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Backend(_)));
    }
}
