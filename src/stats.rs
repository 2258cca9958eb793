//! Read-only composition of cache- and connection-side statistics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
	cache::CacheEngine,
	connection::{BackoffSnapshot, ConnectionManager},
};

/// Per-key cache statistics.
#[derive(Clone, Debug, Serialize)]
pub struct KeyStatistics {
	/// Number of fresh lookups served for this key.
	pub hits: u64,
	/// Number of lookups that missed (absent or expired) for this key.
	pub misses: u64,
	/// Size of the currently cached payload, in bytes.
	pub payload_size: usize,
	/// Age of the currently cached entry, in milliseconds.
	pub age_ms: u64,
	/// Wall-clock time the currently cached entry was fetched.
	pub last_fetch_time: DateTime<Utc>,
	/// Average recorded fetch duration for this key, in milliseconds.
	pub avg_duration_ms: f64,
	/// Largest recorded fetch duration for this key, in milliseconds.
	pub max_duration_ms: f64,
}

/// Cache-engine-side statistics: size, per-key detail, and the connection
/// manager's error rate and active backoff paths.
#[derive(Clone, Debug, Serialize)]
pub struct CacheStatistics {
	/// Number of keys currently holding an entry.
	pub size: usize,
	/// Statistics for each cached key.
	pub per_key: HashMap<String, KeyStatistics>,
	/// Overall upstream error rate.
	pub error_rate: f64,
	/// Upstream error rate scoped to each cached key, same units as `error_rate`.
	pub error_rate_by_path: HashMap<String, f64>,
	/// Keys currently rejected by backoff, with escalation detail.
	pub backoff_paths: Vec<BackoffSnapshot>,
}

/// Overall health derived from cache and connection statistics.
#[derive(Clone, Debug, Serialize)]
pub struct HealthStatus {
	/// `false` once any path is in backoff or the upstream error rate is non-zero.
	pub healthy: bool,
	/// Number of entries currently cached.
	pub cache_size: usize,
	/// Number of requests currently queued or dispatching.
	pub queue_depth: usize,
	/// Number of paths currently in backoff.
	pub paths_in_backoff: usize,
}

/// The `/cache/stats`, `/queue/stats`, and `/health` read surface described
/// in the external interface: a thin composition over [`CacheEngine`] and
/// [`ConnectionManager`], neither of which needs to know about the other's
/// presentation.
#[derive(Clone)]
pub struct StatisticsAggregator {
	cache: CacheEngine,
	connection: ConnectionManager,
}
impl StatisticsAggregator {
	/// Build an aggregator over a cache engine and its connection manager.
	pub fn new(cache: CacheEngine, connection: ConnectionManager) -> Self {
		Self { cache, connection }
	}

	/// `/cache/stats` — cache-side statistics, including CM-derived error rate
	/// and active backoff paths.
	pub async fn cache_stats(&self) -> CacheStatistics {
		self.cache.statistics().await
	}

	/// `/queue/stats` — connection manager dispatch queue telemetry.
	pub async fn queue_stats(&self) -> crate::connection::QueueTelemetry {
		self.connection.telemetry().await
	}

	/// `/health` — a coarse healthy/degraded signal.
	pub async fn health(&self) -> HealthStatus {
		let cache = self.cache.statistics().await;
		let queue = self.connection.telemetry().await;

		HealthStatus {
			healthy: queue.backoff_paths.is_empty() && queue.error_rate == 0.0,
			cache_size: cache.size,
			queue_depth: queue.queue_depth + queue.active_count,
			paths_in_backoff: queue.backoff_paths.len(),
		}
	}
}
