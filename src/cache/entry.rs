//! A single cached response and the small amount of bookkeeping kept with it.

use std::collections::VecDeque;

use bytes::Bytes;
use http::HeaderMap;

use crate::_prelude::*;

/// Number of recent fetch durations kept per entry for latency reporting.
pub const MAX_DURATION_SAMPLES: usize = 25;

/// A cached upstream response plus the freshness window it was stored with.
#[derive(Clone, Debug)]
pub struct CacheEntry {
	/// Response body as returned by the upstream.
	pub payload: Bytes,
	/// Response headers as returned by the upstream.
	pub headers: HeaderMap,
	/// When this entry was fetched, monotonic clock for freshness arithmetic.
	pub fetched_at: Instant,
	/// When this entry was fetched, wall-clock time for reporting.
	pub last_fetch_time: DateTime<Utc>,
	/// How long the entry is considered fresh.
	pub ttl: Duration,
	/// How far into its life, before `ttl`, a background refresh is due.
	pub stale_time: Duration,
	durations: VecDeque<Duration>,
}
impl CacheEntry {
	/// Build a new entry, freshly fetched, with no recorded durations yet.
	pub fn new(payload: Bytes, headers: HeaderMap, ttl: Duration, stale_time: Duration, fetched_at: Instant) -> Self {
		Self { payload, headers, fetched_at, last_fetch_time: Utc::now(), ttl, stale_time, durations: VecDeque::new() }
	}

	/// Age of this entry relative to `now`.
	pub fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.fetched_at)
	}

	/// Whether the entry is still inside its freshness window.
	pub fn is_fresh(&self, now: Instant) -> bool {
		self.age(now) < self.ttl
	}

	/// Whether the entry is fresh but has crossed the stale-refresh threshold,
	/// meaning a background refresh should be kicked off.
	pub fn is_stale_due(&self, now: Instant) -> bool {
		self.is_fresh(now) && self.age(now) >= self.stale_time
	}

	/// Push a fetch-duration sample, evicting the oldest once the ring is full.
	pub fn record_duration(&mut self, sample: Duration) {
		if self.durations.len() >= MAX_DURATION_SAMPLES {
			self.durations.pop_front();
		}

		self.durations.push_back(sample);
	}

	/// Recorded fetch durations, oldest first.
	pub fn durations(&self) -> &VecDeque<Duration> {
		&self.durations
	}

	/// Average recorded fetch duration in milliseconds, or `0.0` with none recorded.
	pub fn avg_duration_ms(&self) -> f64 {
		if self.durations.is_empty() {
			return 0.0;
		}

		let total: f64 = self.durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();

		total / self.durations.len() as f64
	}

	/// Largest recorded fetch duration in milliseconds, or `0.0` with none recorded.
	pub fn max_duration_ms(&self) -> f64 {
		self.durations.iter().map(|d| d.as_secs_f64() * 1000.0).fold(0.0, f64::max)
	}

	/// Size of the stored payload in bytes.
	pub fn payload_size(&self) -> usize {
		self.payload.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(ttl: Duration, stale_time: Duration) -> CacheEntry {
		CacheEntry::new(Bytes::from_static(b"{}"), HeaderMap::new(), ttl, stale_time, Instant::now())
	}

	#[test]
	fn freshness_windows() {
		let e = entry(Duration::from_secs(60), Duration::from_secs(30));
		let now = e.fetched_at;

		assert!(e.is_fresh(now));
		assert!(!e.is_stale_due(now));
		assert!(e.is_stale_due(now + Duration::from_secs(31)));
		assert!(e.is_fresh(now + Duration::from_secs(31)));
		assert!(!e.is_fresh(now + Duration::from_secs(61)));
	}

	#[test]
	fn duration_ring_caps_at_max_samples() {
		let mut e = entry(Duration::from_secs(60), Duration::from_secs(30));

		for i in 0..(MAX_DURATION_SAMPLES + 10) {
			e.record_duration(Duration::from_millis(i as u64));
		}

		assert_eq!(e.durations().len(), MAX_DURATION_SAMPLES);
		// the oldest samples (0..10) should have been evicted
		assert_eq!(e.durations().front().copied(), Some(Duration::from_millis(10)));
	}
}
