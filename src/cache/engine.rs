//! The cache engine: keyed lookups, coalesced fetches, and stale-while-revalidate.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::{Mutex, RwLock};

use crate::{
	_prelude::*,
	cache::{
		entry::CacheEntry,
		state::{FetchResult, KeySlot, PendingFetch},
	},
	config::{AppConfig, request_path},
	connection::ConnectionManager,
	plugin::PluginRegistry,
	stats::{CacheStatistics, KeyStatistics},
	validation,
};

#[derive(Default)]
struct KeyCounters {
	hits: u64,
	misses: u64,
}

struct Inner {
	config: Arc<AppConfig>,
	connection: ConnectionManager,
	plugins: PluginRegistry,
	entries: RwLock<HashMap<String, Arc<KeySlot>>>,
	pending: Mutex<HashMap<String, PendingFetch>>,
	stale_refreshing: Mutex<HashSet<String>>,
	counters: Mutex<HashMap<String, KeyCounters>>,
}

/// Keyed response cache sitting in front of a single upstream, with
/// single-flight coalescing, stale-while-revalidate, and pluggable
/// validation.
///
/// Cheaply `Clone`able: every clone shares the same entries, in-flight
/// fetches, and counters.
#[derive(Clone)]
pub struct CacheEngine {
	inner: Arc<Inner>,
}
impl CacheEngine {
	/// Build a cache engine around a connection manager and plugin registry.
	pub fn new(config: Arc<AppConfig>, connection: ConnectionManager, plugins: PluginRegistry) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				connection,
				plugins,
				entries: RwLock::new(HashMap::new()),
				pending: Mutex::new(HashMap::new()),
				stale_refreshing: Mutex::new(HashSet::new()),
				counters: Mutex::new(HashMap::new()),
			}),
		}
	}

	/// Pure read: returns the entry for `full_url` if one exists and is still
	/// fresh. Never triggers an upstream fetch. Schedules a background
	/// refresh as a side effect if the entry has crossed its stale-time
	/// threshold.
	#[tracing::instrument(skip(self), fields(full_url))]
	pub async fn lookup(&self, full_url: &str) -> Option<CacheEntry> {
		let now = Instant::now();
		let raw = self.raw_entry(full_url).await;

		match raw {
			Some(entry) if entry.is_fresh(now) => {
				self.record_hit(full_url).await;
				let stale_due = entry.is_stale_due(now);

				#[cfg(feature = "metrics")]
				crate::metrics::record_lookup(full_url, true, stale_due);

				if stale_due {
					self.schedule_stale_refresh(full_url.to_string());
				}

				Some(entry)
			},
			_ => {
				self.record_miss(full_url).await;

				#[cfg(feature = "metrics")]
				crate::metrics::record_lookup(full_url, false, false);

				None
			},
		}
	}

	/// Read-through fetch: return a fresh cached entry immediately, or
	/// coalesce concurrent callers behind a single upstream fetch.
	///
	/// If the fetch takes longer than `slow_timeout` (defaulting to
	/// [`crate::config::CacheConfig::slow_request_timeout`]) and a previous
	/// (possibly expired) entry exists, that entry is served while the fetch
	/// continues in the background — the slow timeout never cancels the
	/// underlying upstream call. The returned `bool` is `true` when the
	/// entry served is a cache hit (fresh or stale), `false` when it was
	/// fetched fresh in this call.
	#[tracing::instrument(skip(self), fields(full_url))]
	pub async fn get_or_fetch(&self, full_url: &str, slow_timeout: Option<Duration>) -> Result<(CacheEntry, bool)> {
		if let Some(entry) = self.lookup(full_url).await {
			return Ok((entry, true));
		}

		let timeout = slow_timeout.unwrap_or_else(|| self.inner.config.cache.slow_request_timeout());
		let pending = self.join_or_start_fetch(full_url).await;

		tokio::select! {
			result = pending.clone().wait() => self.resolve_fetch_result(full_url, result).await,
			_ = tokio::time::sleep(timeout) => {
				if let Some(stale) = self.raw_entry(full_url).await {
					tracing::debug!(full_url, "slow backend, serving stale entry while refresh continues");

					Ok((stale, true))
				} else {
					tracing::debug!(full_url, "slow backend with nothing cached yet, waiting for fetch");

					let result = pending.wait().await;
					self.resolve_fetch_result(full_url, result).await
				}
			}
		}
	}

	async fn resolve_fetch_result(&self, full_url: &str, result: FetchResult) -> Result<(CacheEntry, bool)> {
		match result {
			Ok(entry) => Ok((entry, false)),
			Err(err) => {
				if let Some(stale) = self.raw_entry(full_url).await {
					tracing::warn!(full_url, error = %err, "fetch failed, serving stale entry");

					Ok((stale, true))
				} else {
					tracing::warn!(full_url, error = %err, "fetch failed with nothing cached to fall back to");

					Err(Error::NoCachedEntry { key: full_url.to_string() })
				}
			},
		}
	}

	/// Explicitly trigger (and await) an upstream fetch for `full_url`,
	/// coalescing with any fetch already in flight. Used by the polling
	/// scheduler and by callers that want to force a refresh.
	pub async fn refresh(&self, full_url: &str) -> Result<CacheEntry> {
		let pending = self.join_or_start_fetch(full_url).await;

		pending.wait().await.map_err(Error::Fetch)
	}

	/// Explicit insert, bypassing validation and plugin notification.
	pub async fn store(&self, full_url: &str, payload: Bytes, headers: HeaderMap) {
		let path = request_path(full_url);
		let ttl = self.inner.config.ttl_for_path(path);
		let stale_time = self.inner.config.stale_time_for_path(path);
		let entry = CacheEntry::new(payload, headers, ttl, stale_time, Instant::now());

		self.install_entry(full_url, entry).await;
	}

	/// Wipe every cached entry. Leaves backoff state and statistics counters
	/// untouched — those belong to the connection manager and are tracked
	/// independently of what's in the cache map.
	pub async fn clear(&self) {
		self.inner.entries.write().await.clear();
	}

	/// A combined snapshot of cache- and connection-side statistics.
	pub async fn statistics(&self) -> CacheStatistics {
		let entries = self.inner.entries.read().await;
		let counters = self.inner.counters.lock().await;
		let now = Instant::now();

		let mut per_key = HashMap::new();
		let mut error_rate_by_path = HashMap::new();
		for (key, slot) in entries.iter() {
			let entry = slot.entry.read().await;
			let Some(entry) = entry.as_ref() else { continue };
			let key_counters = counters.get(key);

			per_key.insert(
				key.clone(),
				KeyStatistics {
					hits: key_counters.map(|c| c.hits).unwrap_or(0),
					misses: key_counters.map(|c| c.misses).unwrap_or(0),
					payload_size: entry.payload_size(),
					age_ms: entry.age(now).as_millis() as u64,
					last_fetch_time: entry.last_fetch_time,
					avg_duration_ms: entry.avg_duration_ms(),
					max_duration_ms: entry.max_duration_ms(),
				},
			);
			error_rate_by_path.insert(key.clone(), self.inner.connection.error_rate_for_path(key).await);
		}

		let telemetry = self.inner.connection.telemetry().await;

		CacheStatistics {
			size: entries.len(),
			per_key,
			error_rate: telemetry.error_rate,
			error_rate_by_path,
			backoff_paths: telemetry.backoff_paths,
		}
	}

	async fn raw_entry(&self, key: &str) -> Option<CacheEntry> {
		let entries = self.inner.entries.read().await;

		match entries.get(key) {
			Some(slot) => slot.entry.read().await.clone(),
			None => None,
		}
	}

	async fn install_entry(&self, key: &str, entry: CacheEntry) {
		let slot = {
			let mut entries = self.inner.entries.write().await;
			entries.entry(key.to_string()).or_insert_with(|| Arc::new(KeySlot::default())).clone()
		};

		*slot.entry.write().await = Some(entry);
	}

	async fn record_hit(&self, key: &str) {
		self.inner.counters.lock().await.entry(key.to_string()).or_default().hits += 1;
	}

	async fn record_miss(&self, key: &str) {
		self.inner.counters.lock().await.entry(key.to_string()).or_default().misses += 1;
	}

	fn schedule_stale_refresh(&self, key: String) {
		let engine = self.clone();

		tokio::spawn(async move {
			{
				let mut refreshing = engine.inner.stale_refreshing.lock().await;
				if !refreshing.insert(key.clone()) {
					// Another task is already refreshing this key.
					return;
				}
			}

			tracing::debug!(full_url = key.as_str(), "starting background stale refresh");

			// A refresh failure must never clear the existing stale-but-valid
			// entry; `dispatch_and_store` only overwrites it on success, so
			// an error here is simply dropped.
			let _ = engine.refresh(&key).await;

			engine.inner.stale_refreshing.lock().await.remove(&key);
		});
	}

	async fn join_or_start_fetch(&self, full_url: &str) -> PendingFetch {
		let mut pending = self.inner.pending.lock().await;

		if let Some(existing) = pending.get(full_url) {
			return existing.clone();
		}

		let (tx, watcher) = PendingFetch::new();
		pending.insert(full_url.to_string(), watcher.clone());
		drop(pending);

		let engine = self.clone();
		let key = full_url.to_string();

		tokio::spawn(async move {
			let result = engine.dispatch_and_store(&key).await;

			// Remove from the pending map before observers are notified, so
			// a caller that subscribes right after `changed()` fires always
			// sees a fresh `join_or_start_fetch` call start a new fetch
			// rather than reattaching to one that's already finished.
			engine.inner.pending.lock().await.remove(&key);

			tx.send(Some(result.map_err(Arc::new))).ok();
		});

		watcher
	}

	async fn dispatch_and_store(&self, full_url: &str) -> Result<CacheEntry> {
		let path = request_path(full_url).to_string();
		let response = self.inner.connection.fetch(full_url).await?;

		let accepted = match self.inner.plugins.should_cache(&path, &response.data) {
			Some(decision) => decision,
			None => validation::should_cache(&self.inner.config.cache.validation, &path, &response.data),
		};

		if !accepted {
			tracing::warn!(full_url, "response rejected by validation policy");

			return Err(Error::Rejected { path, reason: "failed validation policy".into() });
		}

		let ttl = self.inner.config.ttl_for_path(&path);
		let stale_time = self.inner.config.stale_time_for_path(&path);
		let mut entry = CacheEntry::new(response.data.clone(), response.headers.clone(), ttl, stale_time, Instant::now());

		entry.record_duration(response.duration);
		self.install_entry(full_url, entry.clone()).await;

		self.inner.plugins.notify(&path, response.data);

		Ok(entry)
	}
}
