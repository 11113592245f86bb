//! Outcome learner: the single writer of the statistics store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::persist::{self, PersistError};
use super::store::{ComplexityBucket, Sample, StatsKey, StatsSnapshot, StatsStore};
use crate::agents::Strategy;
use crate::task::{Domain, TaskId};

/// Result of running one strategy for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task_id: TaskId,
    pub domain: Domain,
    /// Complexity score the task was routed with
    pub complexity: f64,
    pub strategy: Strategy,
    pub success: bool,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub retries: u32,
    /// A later strategy took over within the same call (escalation)
    pub superseded: bool,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn key(&self) -> StatsKey {
        StatsKey::new(
            self.domain,
            ComplexityBucket::from_score(self.complexity),
            self.strategy,
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CallCounters {
    total: u64,
    succeeded: u64,
}

/// Records outcomes and maintains rolling success rates.
///
/// Writes are serialized through the store's write lock; every reader works
/// from a `StatsSnapshot`.
#[derive(Clone)]
pub struct OutcomeLearner {
    store: StatsStore,
    enabled: bool,
    persist_path: Option<PathBuf>,
    persist_lock: Arc<Mutex<()>>,
    calls: Arc<Mutex<CallCounters>>,
}

impl OutcomeLearner {
    pub fn new(store: StatsStore, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            persist_path: None,
            persist_lock: Arc::new(Mutex::new(())),
            calls: Arc::new(Mutex::new(CallCounters::default())),
        }
    }

    /// Learner whose store is loaded from (and later saved to) `path`.
    pub async fn load(path: PathBuf, window: usize, enabled: bool) -> Self {
        let entries = persist::load(&path).await;
        let store = StatsStore::with_entries(window, entries);
        let mut learner = Self::new(store, enabled);
        learner.persist_path = Some(path);
        learner
    }

    pub fn store(&self) -> &StatsStore {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        self.store.snapshot().await
    }

    /// Append `outcome` and update its bucket's rolling rate.
    ///
    /// No-op while learning is disabled.
    pub async fn record(&self, outcome: &OutcomeRecord) {
        if !self.enabled {
            return;
        }
        let key = outcome.key();
        self.store
            .append(
                key,
                Sample {
                    success: outcome.success,
                    elapsed_secs: outcome.elapsed_ms as f64 / 1000.0,
                    confidence: outcome.confidence.clamp(0.0, 1.0),
                    retries: outcome.retries,
                    recorded_at: Some(outcome.recorded_at),
                },
            )
            .await;

        if !outcome.superseded {
            let mut calls = self.calls.lock().await;
            calls.total += 1;
            if outcome.success {
                calls.succeeded += 1;
            }
        }

        tracing::debug!(
            task_id = %outcome.task_id,
            key = %key.encode(),
            success = outcome.success,
            "Recorded outcome"
        );
    }

    /// Automation calls recorded since start: (total, succeeded).
    pub async fn call_counts(&self) -> (u64, u64) {
        let calls = self.calls.lock().await;
        (calls.total, calls.succeeded)
    }

    /// Save the store to its file. No-op for in-memory learners.
    pub async fn persist(&self) -> Result<(), PersistError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.store.snapshot().await;
        persist::save(path, &snapshot).await
    }

    /// Persist every `interval` until the returned handle is aborted.
    pub fn spawn_periodic_persist(&self, interval: Duration) -> JoinHandle<()> {
        let learner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = learner.persist().await {
                    tracing::warn!("Periodic statistics persist failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool) -> OutcomeRecord {
        OutcomeRecord {
            task_id: TaskId::generate(),
            domain: Domain::Planning,
            complexity: 4.0,
            strategy: Strategy::SequentialDecomposition,
            success,
            confidence: 0.8,
            elapsed_ms: 1500,
            retries: 0,
            superseded: false,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rolling_rate_converges_to_injected_ratio() {
        let learner = OutcomeLearner::new(StatsStore::new(50), true);

        // 70% success, interleaved so every window has the same mix
        for i in 0..500 {
            learner.record(&outcome(i % 10 < 7)).await;
        }

        let snapshot = learner.snapshot().await;
        let stats = snapshot.get(&outcome(true).key()).unwrap();
        let rate = stats.rolling_success_rate().unwrap();
        assert!((rate - 0.7).abs() < 0.05, "rate {} did not converge", rate);
        assert_eq!(stats.recent().len(), 50);
        assert_eq!(stats.total_count(), 500);
    }

    #[tokio::test]
    async fn test_rolling_rate_tracks_drift() {
        let learner = OutcomeLearner::new(StatsStore::new(20), true);
        for _ in 0..100 {
            learner.record(&outcome(true)).await;
        }
        for _ in 0..20 {
            learner.record(&outcome(false)).await;
        }
        let snapshot = learner.snapshot().await;
        let stats = snapshot.get(&outcome(true).key()).unwrap();
        assert_eq!(stats.rolling_success_rate(), Some(0.0));
        assert!(stats.lifetime_success_rate().unwrap() > 0.8);
    }

    #[tokio::test]
    async fn test_disabled_learner_records_nothing() {
        let learner = OutcomeLearner::new(StatsStore::new(50), false);
        learner.record(&outcome(true)).await;
        assert!(learner.snapshot().await.is_empty());
        assert_eq!(learner.call_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_superseded_outcomes_do_not_count_as_calls() {
        let learner = OutcomeLearner::new(StatsStore::new(50), true);
        let mut first = outcome(false);
        first.superseded = true;
        learner.record(&first).await;
        learner.record(&outcome(true)).await;
        assert_eq!(learner.call_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_no_updates() {
        let learner = OutcomeLearner::new(StatsStore::new(1000), true);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let learner = learner.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    learner.record(&outcome(true)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let snapshot = learner.snapshot().await;
        assert_eq!(snapshot.get(&outcome(true).key()).unwrap().total_count(), 200);
    }

    #[tokio::test]
    async fn test_record_keeps_confidence_and_retries() {
        let learner = OutcomeLearner::new(StatsStore::new(50), true);
        let mut retried = outcome(false);
        retried.confidence = 0.2;
        retried.retries = 2;
        learner.record(&retried).await;
        let recorded_at = Utc::now();
        let mut first_try = outcome(true);
        first_try.recorded_at = recorded_at;
        learner.record(&first_try).await;

        let snapshot = learner.snapshot().await;
        let stats = snapshot.get(&first_try.key()).unwrap();
        assert!((stats.mean_confidence().unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(stats.total_retries(), 2);
        assert_eq!(stats.last_recorded_at(), Some(recorded_at));
        assert_eq!(stats.recent().back().map(|s| s.retries), Some(0));
    }

    #[tokio::test]
    async fn test_periodic_persist_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let learner = OutcomeLearner::load(path.clone(), 50, true).await;
        learner.record(&outcome(true)).await;
        let handle = learner.spawn_periodic_persist(Duration::from_millis(20));

        let mut written = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if path.exists() {
                written = true;
                break;
            }
        }
        handle.abort();
        assert!(written, "statistics file was never written");

        let reloaded = OutcomeLearner::load(path, 50, true).await;
        assert_eq!(reloaded.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.json");

        let learner = OutcomeLearner::load(path.clone(), 50, true).await;
        for i in 0..10 {
            learner.record(&outcome(i < 6)).await;
        }
        learner.persist().await.unwrap();

        let reloaded = OutcomeLearner::load(path, 50, true).await;
        let snapshot = reloaded.snapshot().await;
        let stats = snapshot.get(&outcome(true).key()).unwrap();
        assert_eq!(stats.total_count(), 10);
        assert!((stats.rolling_success_rate().unwrap() - 0.6).abs() < 1e-9);
    }
}
