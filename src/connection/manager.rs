//! Bounded-concurrency upstream dispatch with per-path backoff and telemetry.

use std::{
	collections::{HashMap, VecDeque},
	sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use http::HeaderMap;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::{
	_prelude::*,
	config::request_path,
	connection::{
		backoff::BackoffState,
		queue::{CompletedRequest, CompletedRing, QueuedRequest},
	},
};

const ERROR_WINDOW: Duration = Duration::from_secs(10 * 60);

/// A single upstream failure, retained for the error-rate sliding window.
#[derive(Clone, Debug)]
struct ErrorEvent {
	path: String,
	at: Instant,
}

/// Successful fetch result: body, headers, and how long dispatch took.
#[derive(Clone, Debug)]
pub struct FetchedResponse {
	/// Response body.
	pub data: Bytes,
	/// Response headers.
	pub headers: HeaderMap,
	/// Wall-clock time the dispatch took.
	pub duration: Duration,
}

struct Job {
	full_url: String,
	seq: u64,
	respond_to: oneshot::Sender<Result<FetchedResponse>>,
}

struct ActiveRequest {
	seq: u64,
	full_url: String,
	started_at: Instant,
}

struct Inner {
	client: reqwest::Client,
	backend_base: url::Url,
	timeout: Duration,
	max_concurrent: usize,
	job_tx: mpsc::UnboundedSender<Job>,
	seq: AtomicU64,
	queued: Mutex<VecDeque<QueuedRequest>>,
	active: Mutex<Vec<ActiveRequest>>,
	completed: Mutex<CompletedRing>,
	backoff: RwLock<HashMap<String, BackoffState>>,
	errors: Mutex<VecDeque<ErrorEvent>>,
}

/// Dispatches upstream fetches through a bounded pool of workers, tracking
/// per-path backoff and a rolling window of recent errors.
///
/// Cheaply `Clone`able: every clone shares the same worker pool, queue, and
/// backoff table.
#[derive(Clone)]
pub struct ConnectionManager {
	inner: std::sync::Arc<Inner>,
}
impl ConnectionManager {
	/// Build a manager dispatching against `backend_base`, bounded to
	/// `max_concurrent` in-flight requests at a time.
	pub fn new(backend_base: url::Url, timeout: Duration, max_concurrent: usize) -> Self {
		Self::with_client(reqwest::Client::new(), backend_base, timeout, max_concurrent)
	}

	/// Like [`Self::new`], but with a caller-supplied [`reqwest::Client`]
	/// (useful in tests, to point a shared client at a mock server).
	pub fn with_client(client: reqwest::Client, backend_base: url::Url, timeout: Duration, max_concurrent: usize) -> Self {
		let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
		let job_rx = std::sync::Arc::new(Mutex::new(job_rx));

		let inner = std::sync::Arc::new(Inner {
			client,
			backend_base,
			timeout,
			max_concurrent: max_concurrent.max(1),
			job_tx,
			seq: AtomicU64::new(0),
			queued: Mutex::new(VecDeque::new()),
			active: Mutex::new(Vec::new()),
			completed: Mutex::new(CompletedRing::default()),
			backoff: RwLock::new(HashMap::new()),
			errors: Mutex::new(VecDeque::new()),
		});

		for _ in 0..inner.max_concurrent {
			let inner = inner.clone();
			let job_rx = job_rx.clone();

			tokio::spawn(async move {
				loop {
					let job = {
						let mut rx = job_rx.lock().await;
						rx.recv().await
					};

					match job {
						Some(job) => Self::run_job(&inner, job).await,
						None => break,
					}
				}
			});
		}

		Self { inner }
	}

	/// Dispatch a fetch for `full_url` (path plus query string), subject to
	/// the concurrency cap and any active backoff for this path.
	#[tracing::instrument(skip(self), fields(full_url))]
	pub async fn fetch(&self, full_url: &str) -> Result<FetchedResponse> {
		let now = Instant::now();

		if let Some(state) = self.inner.backoff.read().await.get(full_url)
			&& state.is_active(now)
		{
			tracing::warn!(full_url, "rejecting dispatch, path is in backoff");

			return Err(Error::Backoff {
				path: full_url.to_string(),
				retry_after: state.retry_after(now),
				consecutive_errors: state.consecutive_errors,
			});
		}

		let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);

		{
			let mut queued = self.inner.queued.lock().await;
			queued.push_back(QueuedRequest { seq, full_url: full_url.to_string(), queued_at: now });
		}

		let (tx, rx) = oneshot::channel();
		let job = Job { full_url: full_url.to_string(), seq, respond_to: tx };

		// An error here only happens if every worker task has stopped, which
		// only happens once the last `ConnectionManager` clone is dropped.
		self.inner.job_tx.send(job).ok();

		match rx.await {
			Ok(result) => result,
			Err(_) => Err(Error::Io(std::io::Error::other("dispatch worker dropped without responding"))),
		}
	}

	/// Whether a path currently has an active backoff window.
	pub async fn is_backoff_active(&self, full_url: &str) -> bool {
		let now = Instant::now();

		self.inner.backoff.read().await.get(full_url).is_some_and(|state| state.is_active(now))
	}

	async fn run_job(inner: &Inner, job: Job) {
		{
			let mut queued = inner.queued.lock().await;
			queued.retain(|q| q.seq != job.seq);
		}

		let start = Instant::now();
		{
			let mut active = inner.active.lock().await;
			active.push(ActiveRequest { seq: job.seq, full_url: job.full_url.clone(), started_at: start });
		}

		let result = Self::call_upstream(&inner.client, &inner.backend_base, &job.full_url, inner.timeout).await;
		let duration = start.elapsed();

		{
			let mut active = inner.active.lock().await;
			active.retain(|a| a.seq != job.seq);
		}

		// Metric labels are grouped by bare path to keep label cardinality sane,
		// but backoff (like the cache entries it protects) is keyed by the full
		// URL, query string included — `fetch`/`is_backoff_active` both read it
		// that way, so `record_success`/`record_failure` must write it that way.
		let metric_path = request_path(&job.full_url).to_string();

		match &result {
			Ok(_) => {
				#[cfg(feature = "metrics")]
				crate::metrics::record_upstream(&metric_path, "success", duration);

				Self::record_success(inner, &job.full_url).await;
			},
			Err(err) => {
				tracing::warn!(full_url = %job.full_url, error = %err, "upstream dispatch failed");

				#[cfg(feature = "metrics")]
				crate::metrics::record_upstream(&metric_path, "error", duration);

				Self::record_failure(inner, &job.full_url, start + duration).await;
			},
		}

		#[cfg(feature = "metrics")]
		crate::metrics::record_backoff_active(
			&metric_path,
			inner.backoff.read().await.get(&job.full_url).is_some_and(|s| s.is_active(Instant::now())),
		);

		{
			let mut completed = inner.completed.lock().await;
			completed.push(CompletedRequest {
				full_url: job.full_url,
				duration_ms: duration.as_millis() as u64,
				success: result.is_ok(),
			});
		}

		job.respond_to.send(result).ok();
	}

	async fn call_upstream(client: &reqwest::Client, base: &url::Url, full_url: &str, timeout: Duration) -> Result<FetchedResponse> {
		let target = format!("{}{}", base.as_str().trim_end_matches('/'), full_url);
		let start = Instant::now();
		let response = client.get(&target).timeout(timeout).send().await?;
		let status = response.status();

		if status.as_u16() >= 500 {
			return Err(Error::Upstream { status, url: target });
		}

		let headers = response.headers().clone();
		let data = response.bytes().await?;

		Ok(FetchedResponse { data, headers, duration: start.elapsed() })
	}

	async fn record_success(inner: &Inner, path: &str) {
		inner.backoff.write().await.remove(path);
	}

	async fn record_failure(inner: &Inner, path: &str, at: Instant) {
		let mut errors = inner.errors.lock().await;

		errors.push_back(ErrorEvent { path: path.to_string(), at });
		let cutoff = at.saturating_sub(ERROR_WINDOW);
		while errors.front().is_some_and(|e| e.at < cutoff) {
			errors.pop_front();
		}
		drop(errors);

		let mut backoff = inner.backoff.write().await;
		let next = match backoff.get(path) {
			Some(state) => state.escalate(at),
			None => BackoffState::first_failure(at),
		};

		tracing::warn!(path, consecutive_errors = next.consecutive_errors, delay = ?next.current_delay, "engaging backoff");
		backoff.insert(path.to_string(), next);
	}

	/// Overall error rate: failures recorded in the last ten minutes, one
	/// count per minute of window.
	pub async fn error_rate(&self) -> f64 {
		let errors = self.inner.errors.lock().await;

		errors.len() as f64 / (ERROR_WINDOW.as_secs() as f64 / 60.0)
	}

	/// Error rate scoped to a single cache key (the full URL a fetch was
	/// dispatched for), same units as [`Self::error_rate`].
	pub async fn error_rate_for_path(&self, full_url: &str) -> f64 {
		let errors = self.inner.errors.lock().await;
		let count = errors.iter().filter(|e| e.path == full_url).count();

		count as f64 / (ERROR_WINDOW.as_secs() as f64 / 60.0)
	}

	/// A read-only snapshot of dispatch queue and backoff state, for the
	/// statistics surface.
	pub async fn telemetry(&self) -> QueueTelemetry {
		let now = Instant::now();
		let queued = self.inner.queued.lock().await;
		let active = self.inner.active.lock().await;
		let completed = self.inner.completed.lock().await;
		let backoff = self.inner.backoff.read().await;

		QueueTelemetry {
			max_concurrent: self.inner.max_concurrent,
			queue_depth: queued.len(),
			active_count: active.len(),
			queued_urls: queued.iter().map(|q| q.full_url.clone()).collect(),
			active_requests: active
				.iter()
				.map(|a| ActiveRequestSnapshot { full_url: a.full_url.clone(), elapsed_ms: now.duration_since(a.started_at).as_millis() as u64 })
				.collect(),
			recent_completions: completed.iter().cloned().collect(),
			error_rate: self.error_rate().await,
			backoff_paths: backoff
				.iter()
				.filter(|(_, state)| state.is_active(now))
				.map(|(path, state)| BackoffSnapshot {
					path: path.clone(),
					consecutive_errors: state.consecutive_errors,
					retry_after_ms: state.retry_after(now).as_millis() as u64,
				})
				.collect(),
		}
	}
}

/// A request currently being dispatched, for telemetry.
#[derive(Clone, Debug, Serialize)]
pub struct ActiveRequestSnapshot {
	/// Request target being dispatched.
	pub full_url: String,
	/// How long it has been in flight, in milliseconds.
	pub elapsed_ms: u64,
}

/// A path currently rejected by backoff, for telemetry.
#[derive(Clone, Debug, Serialize)]
pub struct BackoffSnapshot {
	/// Path in backoff.
	pub path: String,
	/// Consecutive failures that led to this backoff.
	pub consecutive_errors: u32,
	/// Time remaining before the path is retried, in milliseconds.
	pub retry_after_ms: u64,
}

/// Read-only view of the connection manager's internal state.
#[derive(Clone, Debug, Serialize)]
pub struct QueueTelemetry {
	/// Configured concurrency cap.
	pub max_concurrent: usize,
	/// Number of requests waiting for a free dispatch slot.
	pub queue_depth: usize,
	/// Number of requests currently dispatching.
	pub active_count: usize,
	/// Request targets waiting to dispatch, in FIFO order.
	pub queued_urls: Vec<String>,
	/// Requests currently dispatching.
	pub active_requests: Vec<ActiveRequestSnapshot>,
	/// Recently completed requests, newest first.
	pub recent_completions: Vec<CompletedRequest>,
	/// Overall error rate across all paths.
	pub error_rate: f64,
	/// Paths currently rejected by backoff.
	pub backoff_paths: Vec<BackoffSnapshot>,
}
