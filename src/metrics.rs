//! Optional Prometheus-compatible counters for the cache engine and
//! connection manager, recorded via the `metrics` facade.

use std::sync::OnceLock;

use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;

use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_REQUESTS_TOTAL: &str = "cache_proxy_requests_total";
const METRIC_HITS_TOTAL: &str = "cache_proxy_hits_total";
const METRIC_MISSES_TOTAL: &str = "cache_proxy_misses_total";
const METRIC_STALE_TOTAL: &str = "cache_proxy_stale_total";
const METRIC_UPSTREAM_TOTAL: &str = "cache_proxy_upstream_total";
const METRIC_UPSTREAM_DURATION: &str = "cache_proxy_upstream_duration_seconds";
const METRIC_BACKOFF_ACTIVE: &str = "cache_proxy_backoff_active";

/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the
/// recorder is installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder().map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a cache lookup, tagging whether it hit and whether it was stale.
pub fn record_lookup(path: &str, hit: bool, stale: bool) {
	let labels = path_labels(path);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);

	if hit {
		metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

		if stale {
			metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
		}
	} else {
		metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
	}
}

/// Record an upstream dispatch outcome and its duration.
pub fn record_upstream(path: &str, status: &'static str, duration: Duration) {
	metrics::counter!(METRIC_UPSTREAM_TOTAL, status_labels(path, status).iter()).increment(1);
	metrics::histogram!(METRIC_UPSTREAM_DURATION, path_labels(path).iter()).record(duration.as_secs_f64());
}

/// Set the backoff-active gauge for a path.
pub fn record_backoff_active(path: &str, active: bool) {
	metrics::gauge!(METRIC_BACKOFF_ACTIVE, path_labels(path).iter()).set(if active { 1.0 } else { 0.0 });
}

fn path_labels(path: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("path", path.to_owned()));

	labels
}

fn status_labels(path: &str, status: &'static str) -> LabelSet {
	let mut labels = path_labels(path);

	labels.push(Label::new("status", status));

	labels
}

#[cfg(test)]
mod tests {
	use std::borrow::Borrow;

	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};

	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
	}

	fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str, labels: &[(&str, &str)]) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter && Borrow::<str>::borrow(key.key().name()) == name && labels_match(key, labels))
					.then(|| match value {
						DebugValue::Counter(value) => *value,
						_ => 0,
					})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels.into_iter().zip(expected_sorted).all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn records_hits_misses_and_stale_counts() {
		let snapshot = capture_metrics(|| {
			record_lookup("/p", true, false);
			record_lookup("/p", true, true);
			record_lookup("/p", false, false);
		});
		let base = [("path", "/p")];

		assert_eq!(counter_value(&snapshot, "cache_proxy_requests_total", &base), 3);
		assert_eq!(counter_value(&snapshot, "cache_proxy_hits_total", &base), 2);
		assert_eq!(counter_value(&snapshot, "cache_proxy_misses_total", &base), 1);
		assert_eq!(counter_value(&snapshot, "cache_proxy_stale_total", &base), 1);
	}

	#[test]
	fn records_upstream_outcomes_by_status() {
		let snapshot = capture_metrics(|| {
			record_upstream("/p", "success", Duration::from_millis(20));
			record_upstream("/p", "error", Duration::from_millis(5));
		});

		assert_eq!(counter_value(&snapshot, "cache_proxy_upstream_total", &[("path", "/p"), ("status", "success")]), 1);
		assert_eq!(counter_value(&snapshot, "cache_proxy_upstream_total", &[("path", "/p"), ("status", "error")]), 1);
	}
}
