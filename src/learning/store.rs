//! Shared success-rate statistics.
//!
//! The store is the only state that outlives an automation call. Many
//! selectors read it concurrently through point-in-time snapshots; writes go
//! through the `OutcomeLearner`, one at a time, under the write half of a
//! `RwLock`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agents::Strategy;
use crate::task::Domain;

/// Discretized complexity range used to key statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBucket {
    /// [0, 2.5)
    Simple,
    /// [2.5, 5)
    Moderate,
    /// [5, 7.5)
    Complex,
    /// [7.5, 10]
    VeryComplex,
}

impl ComplexityBucket {
    pub const ALL: [ComplexityBucket; 4] = [
        ComplexityBucket::Simple,
        ComplexityBucket::Moderate,
        ComplexityBucket::Complex,
        ComplexityBucket::VeryComplex,
    ];

    pub fn from_score(score: f64) -> Self {
        if score < 2.5 {
            ComplexityBucket::Simple
        } else if score < 5.0 {
            ComplexityBucket::Moderate
        } else if score < 7.5 {
            ComplexityBucket::Complex
        } else {
            ComplexityBucket::VeryComplex
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityBucket::Simple => "simple",
            ComplexityBucket::Moderate => "moderate",
            ComplexityBucket::Complex => "complex",
            ComplexityBucket::VeryComplex => "very_complex",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == s)
    }
}

impl std::fmt::Display for ComplexityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Statistics key: (domain, complexity bucket, strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatsKey {
    pub domain: Domain,
    pub bucket: ComplexityBucket,
    pub strategy: Strategy,
}

impl StatsKey {
    pub fn new(domain: Domain, bucket: ComplexityBucket, strategy: Strategy) -> Self {
        Self {
            domain,
            bucket,
            strategy,
        }
    }

    /// `domain/bucket/strategy`, the persisted form.
    pub fn encode(&self) -> String {
        format!(
            "{}/{}/{}",
            self.domain.as_str(),
            self.bucket.as_str(),
            self.strategy.as_str()
        )
    }

    /// Inverse of `encode`. Returns `None` for keys this build does not know.
    pub fn decode(s: &str) -> Option<Self> {
        let mut parts = s.split('/');
        let domain = parts.next()?.parse::<Domain>().ok()?;
        let bucket = ComplexityBucket::parse(parts.next()?)?;
        let strategy = parts.next()?.parse::<Strategy>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(domain, bucket, strategy))
    }
}

/// One observed outcome inside the rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub success: bool,
    pub elapsed_secs: f64,
    #[serde(default)]
    pub confidence: f64,
    /// Strategy re-runs and re-plans spent in the call before this outcome
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Aggregate carried over from a persisted file that had no sample window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Seed {
    pub average: f64,
    pub elapsed_secs: Option<f64>,
    pub confidence: Option<f64>,
    /// Window slots the seed stands in for
    pub weight: usize,
}

/// Counters and rolling window for one key.
///
/// # Invariants
/// - `success_count <= total_count`
/// - `recent.len() <= window`
#[derive(Debug, Clone, Default)]
pub struct BucketStats {
    success_count: u64,
    total_count: u64,
    total_retries: u64,
    last_recorded_at: Option<DateTime<Utc>>,
    recent: VecDeque<Sample>,
    seed: Option<Seed>,
}

impl BucketStats {
    pub(crate) fn restore(
        success_count: u64,
        total_count: u64,
        recent: VecDeque<Sample>,
        seed: Option<Seed>,
    ) -> Self {
        let last_recorded_at = recent.iter().filter_map(|s| s.recorded_at).max();
        Self {
            success_count: success_count.min(total_count),
            total_count,
            total_retries: recent.iter().map(|s| u64::from(s.retries)).sum(),
            last_recorded_at,
            recent,
            seed,
        }
    }

    /// Lifetime counters that outlive the window.
    pub(crate) fn with_history(
        mut self,
        total_retries: Option<u64>,
        last_recorded_at: Option<DateTime<Utc>>,
    ) -> Self {
        if let Some(total) = total_retries {
            self.total_retries = total;
        }
        self.last_recorded_at = self.last_recorded_at.max(last_recorded_at);
        self
    }

    fn push(&mut self, sample: Sample, window: usize) {
        self.total_count += 1;
        if sample.success {
            self.success_count += 1;
        }
        self.total_retries += u64::from(sample.retries);
        self.last_recorded_at = self.last_recorded_at.max(sample.recorded_at);
        self.recent.push_back(sample);
        while self.recent.len() > window {
            self.recent.pop_front();
        }
    }

    /// Slots still covered by the seed once real samples displace it.
    fn seed_weight(&self) -> usize {
        self.seed
            .map(|s| s.weight.saturating_sub(self.recent.len()))
            .unwrap_or(0)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn recent(&self) -> &VecDeque<Sample> {
        &self.recent
    }

    /// Outcomes currently contributing to the rolling average.
    pub fn samples(&self) -> usize {
        self.recent.len() + self.seed_weight()
    }

    /// Moving average of success over the window, `None` with no data.
    pub fn rolling_success_rate(&self) -> Option<f64> {
        let seed_weight = self.seed_weight();
        let n = self.recent.len() + seed_weight;
        if n == 0 {
            return None;
        }
        let successes = self.recent.iter().filter(|s| s.success).count() as f64;
        let seeded = self
            .seed
            .map(|s| s.average * seed_weight as f64)
            .unwrap_or(0.0);
        Some((successes + seeded) / n as f64)
    }

    /// Mean latency over the window, `None` with no data.
    pub fn mean_elapsed_secs(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return self.seed.and_then(|s| s.elapsed_secs);
        }
        let total: f64 = self.recent.iter().map(|s| s.elapsed_secs).sum();
        Some(total / self.recent.len() as f64)
    }

    /// Mean reported confidence over the window, `None` with no data.
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return self.seed.and_then(|s| s.confidence);
        }
        let total: f64 = self.recent.iter().map(|s| s.confidence).sum();
        Some(total / self.recent.len() as f64)
    }

    /// Retries summed over every outcome ever recorded.
    pub fn total_retries(&self) -> u64 {
        self.total_retries
    }

    pub fn last_recorded_at(&self) -> Option<DateTime<Utc>> {
        self.last_recorded_at
    }

    /// Success rate over every outcome ever recorded.
    pub fn lifetime_success_rate(&self) -> Option<f64> {
        if self.total_count == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.total_count as f64)
        }
    }
}

/// Success/cost estimate for one strategy in one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyEstimate {
    pub success_rate: f64,
    /// Expected latency in seconds
    pub cost_secs: f64,
    pub samples: usize,
    /// False when the estimate is the strategy's prior
    pub learned: bool,
}

impl StrategyEstimate {
    /// Success per unit of (log-damped) cost; higher is better.
    pub fn efficiency(&self) -> f64 {
        let denom = (self.cost_secs.max(0.0) + 1.0).ln().max(f64::EPSILON);
        self.success_rate / denom
    }
}

/// Per-strategy aggregate across all buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrategyTotals {
    pub used: u64,
    pub succeeded: u64,
    pub success_rate: f64,
}

/// Immutable point-in-time copy of the store.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    entries: BTreeMap<StatsKey, BucketStats>,
}

impl StatsSnapshot {
    /// Snapshot over explicit entries (tests, offline analysis).
    pub fn from_entries(entries: BTreeMap<StatsKey, BucketStats>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &StatsKey) -> Option<&BucketStats> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StatsKey, &BucketStats)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Learned estimate once the bucket has `min_samples` outcomes, else the
    /// strategy's prior.
    pub fn estimate(&self, key: &StatsKey, min_samples: usize) -> StrategyEstimate {
        let prior = StrategyEstimate {
            success_rate: key.strategy.prior_success_rate(),
            cost_secs: key.strategy.prior_cost_secs(),
            samples: 0,
            learned: false,
        };
        let Some(stats) = self.entries.get(key) else {
            return prior;
        };
        let samples = stats.samples();
        match stats.rolling_success_rate() {
            Some(rate) if samples >= min_samples.max(1) => StrategyEstimate {
                success_rate: rate,
                cost_secs: stats.mean_elapsed_secs().unwrap_or(prior.cost_secs),
                samples,
                learned: true,
            },
            _ => StrategyEstimate { samples, ..prior },
        }
    }

    pub fn strategy_totals(&self) -> BTreeMap<Strategy, StrategyTotals> {
        let mut totals: BTreeMap<Strategy, StrategyTotals> = BTreeMap::new();
        for (key, stats) in &self.entries {
            let entry = totals.entry(key.strategy).or_default();
            entry.used += stats.total_count;
            entry.succeeded += stats.success_count;
        }
        for entry in totals.values_mut() {
            if entry.used > 0 {
                entry.success_rate = entry.succeeded as f64 / entry.used as f64;
            }
        }
        totals
    }
}

/// Handle to the shared statistics table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatsStore {
    entries: Arc<RwLock<BTreeMap<StatsKey, BucketStats>>>,
    window: usize,
}

impl StatsStore {
    /// Empty store keeping the last `window` outcomes per key.
    pub fn new(window: usize) -> Self {
        Self::with_entries(window, BTreeMap::new())
    }

    pub(crate) fn with_entries(window: usize, mut entries: BTreeMap<StatsKey, BucketStats>) -> Self {
        let window = window.max(1);
        for stats in entries.values_mut() {
            while stats.recent.len() > window {
                stats.recent.pop_front();
            }
            if let Some(seed) = stats.seed.as_mut() {
                seed.weight = seed.weight.min(window);
            }
        }
        Self {
            entries: Arc::new(RwLock::new(entries)),
            window,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Point-in-time copy for lock-free reading.
    pub async fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            entries: self.entries.read().await.clone(),
        }
    }

    /// Append one outcome. Only the learner writes.
    pub(crate) async fn append(&self, key: StatsKey, sample: Sample) {
        let mut entries = self.entries.write().await;
        entries.entry(key).or_default().push(sample, self.window);
    }
}
