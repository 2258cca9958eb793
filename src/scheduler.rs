//! Keeps polled paths warm on a per-path interval, independent of client traffic.

use tokio::task::JoinHandle;

use crate::{_prelude::*, cache::CacheEngine, config::AppConfig, connection::ConnectionManager};

/// Polls a configured set of paths on independent timers, refreshing each
/// one through the same coalesced fetch path a client request would use.
pub struct PollingScheduler {
	cache: CacheEngine,
	connection: ConnectionManager,
	config: Arc<AppConfig>,
	handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}
impl PollingScheduler {
	/// Build a scheduler over the cache engine and connection manager it will drive.
	pub fn new(cache: CacheEngine, connection: ConnectionManager, config: Arc<AppConfig>) -> Self {
		Self { cache, connection, config, handles: tokio::sync::Mutex::new(Vec::new()) }
	}

	/// Fetch every polled path once, in parallel, before serving traffic.
	/// Concurrency is bounded only by the connection manager's own dispatch
	/// cap, not by this loop.
	pub async fn warm_cache(&self) {
		let handles: Vec<_> = self
			.config
			.polled_urls()
			.map(|url| {
				let cache = self.cache.clone();
				let path = url.path.clone();

				tokio::spawn(async move {
					if let Err(err) = cache.refresh(&path).await {
						tracing::warn!(path = path.as_str(), error = %err, "warm-cache fetch failed");
					}
				})
			})
			.collect();

		for handle in handles {
			handle.await.ok();
		}
	}

	/// Start one independent polling loop per configured path. Idempotent:
	/// calling this twice without an intervening `stop` just adds a second
	/// set of loops.
	pub async fn start(self: &Arc<Self>) {
		let mut handles = self.handles.lock().await;

		for url in self.config.polled_urls() {
			let Some(interval) = url.poll_interval() else { continue };
			let scheduler = self.clone();
			let path = url.path.clone();

			handles.push(tokio::spawn(async move {
				let mut ticker = tokio::time::interval(interval);
				ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
				// the first tick fires immediately; warm_cache already covered
				// the initial fetch, so skip it here.
				ticker.tick().await;

				loop {
					ticker.tick().await;
					scheduler.tick(&path).await;
				}
			}));
		}
	}

	/// Refresh one path, unless it is currently in backoff.
	pub async fn tick(&self, path: &str) {
		if self.connection.is_backoff_active(path).await {
			tracing::debug!(path, "skipping scheduled poll, path is in backoff");

			return;
		}

		if let Err(err) = self.cache.refresh(path).await {
			tracing::warn!(path, error = %err, "scheduled poll failed");
		}
	}

	/// Stop every polling loop. Idempotent.
	pub async fn stop(&self) {
		let mut handles = self.handles.lock().await;

		for handle in handles.drain(..) {
			handle.abort();
		}
	}
}
