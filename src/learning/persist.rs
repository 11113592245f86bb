//! JSON persistence for the statistics store.
//!
//! File layout:
//!
//! ```json
//! {
//!   "version": 1,
//!   "updated_at": "2025-01-01T00:00:00Z",
//!   "entries": {
//!     "coding/moderate/multi_agent_pipeline": {
//!       "success_count": 12, "total_count": 15,
//!       "rolling_average": 0.8, "mean_elapsed_secs": 14.2,
//!       "mean_confidence": 0.82, "total_retries": 4,
//!       "last_recorded_at": "2025-01-01T00:00:00Z",
//!       "recent": [{"success": true, "elapsed_secs": 12.9, "confidence": 0.9,
//!                   "retries": 0, "recorded_at": "2025-01-01T00:00:00Z"}]
//!     }
//!   }
//! }
//! ```
//!
//! Loading is forward-compatible: unknown top-level fields, unknown entry
//! fields, keys naming buckets/strategies this build lacks, and malformed
//! entries are all skipped with a warning.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::store::{BucketStats, Sample, Seed, StatsKey, StatsSnapshot};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize statistics: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct StatsFile<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    entries: BTreeMap<String, PersistedEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct PersistedEntry<'a> {
    success_count: u64,
    total_count: u64,
    rolling_average: Option<f64>,
    mean_elapsed_secs: Option<f64>,
    mean_confidence: Option<f64>,
    total_retries: u64,
    last_recorded_at: Option<DateTime<Utc>>,
    recent: &'a VecDeque<Sample>,
}

#[derive(Debug, Deserialize)]
struct LoadedEntry {
    #[serde(default)]
    success_count: u64,
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    rolling_average: Option<f64>,
    #[serde(default)]
    mean_elapsed_secs: Option<f64>,
    #[serde(default)]
    mean_confidence: Option<f64>,
    #[serde(default)]
    total_retries: Option<u64>,
    #[serde(default)]
    last_recorded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    recent: Option<VecDeque<Sample>>,
}

/// Write `snapshot` to `path` atomically (temp file, then rename).
pub async fn save(path: &Path, snapshot: &StatsSnapshot) -> Result<(), PersistError> {
    let entries = snapshot
        .iter()
        .map(|(key, stats)| {
            (
                key.encode(),
                PersistedEntry {
                    success_count: stats.success_count(),
                    total_count: stats.total_count(),
                    rolling_average: stats.rolling_success_rate(),
                    mean_elapsed_secs: stats.mean_elapsed_secs(),
                    mean_confidence: stats.mean_confidence(),
                    total_retries: stats.total_retries(),
                    last_recorded_at: stats.last_recorded_at(),
                    recent: stats.recent(),
                },
            )
        })
        .collect();

    let file = StatsFile {
        version: FORMAT_VERSION,
        updated_at: Utc::now(),
        entries,
    };
    let data = serde_json::to_vec_pretty(&file)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|source| PersistError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, data)
        .await
        .map_err(|source| PersistError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|source| PersistError::Io {
            path: path.display().to_string(),
            source,
        })?;
    Ok(())
}

/// Read entries from `path`.
///
/// A missing file is an empty table. An unreadable or unparseable file is
/// logged and treated as empty so a corrupt stats file never blocks startup.
pub async fn load(path: &Path) -> BTreeMap<StatsKey, BucketStats> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(err) => {
            tracing::warn!("Failed to read statistics file {}: {}", path.display(), err);
            return BTreeMap::new();
        }
    };

    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to parse statistics file {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };

    if let Some(version) = value.get("version").and_then(|v| v.as_u64()) {
        if version > FORMAT_VERSION as u64 {
            tracing::warn!(
                version,
                "Statistics file {} is newer than this build; loading known fields only",
                path.display()
            );
        }
    }

    let Some(raw_entries) = value.get("entries").and_then(|v| v.as_object()) else {
        tracing::warn!("Statistics file {} has no entries map", path.display());
        return BTreeMap::new();
    };

    let mut entries = BTreeMap::new();
    for (raw_key, raw_entry) in raw_entries {
        let Some(key) = StatsKey::decode(raw_key) else {
            tracing::warn!(key = %raw_key, "Skipping statistics entry with unknown key");
            continue;
        };
        let entry: LoadedEntry = match serde_json::from_value(raw_entry.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %raw_key, "Skipping malformed statistics entry: {}", e);
                continue;
            }
        };
        entries.insert(key, restore_entry(entry));
    }

    tracing::debug!(
        entries = entries.len(),
        "Loaded statistics from {}",
        path.display()
    );
    entries
}

fn restore_entry(entry: LoadedEntry) -> BucketStats {
    let stats = match entry.recent {
        Some(recent) if !recent.is_empty() => {
            BucketStats::restore(entry.success_count, entry.total_count, recent, None)
        }
        _ => {
            let seed = entry
                .rolling_average
                .or_else(|| {
                    (entry.total_count > 0)
                        .then(|| entry.success_count as f64 / entry.total_count as f64)
                })
                .map(|average| Seed {
                    average: average.clamp(0.0, 1.0),
                    elapsed_secs: entry.mean_elapsed_secs,
                    confidence: entry.mean_confidence,
                    weight: entry.total_count as usize,
                });
            BucketStats::restore(entry.success_count, entry.total_count, VecDeque::new(), seed)
        }
    };
    stats.with_history(entry.total_retries, entry.last_recorded_at)
}
