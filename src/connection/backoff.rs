//! Per-path exponential backoff tracking.

use crate::_prelude::*;

/// Delay applied after the first consecutive failure for a path.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
/// Ceiling the backoff delay never grows past.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Backoff bookkeeping for a single upstream path.
#[derive(Clone, Debug)]
pub struct BackoffState {
	/// Number of consecutive failures observed for this path.
	pub consecutive_errors: u32,
	/// Delay applied after the most recent failure.
	pub current_delay: Duration,
	/// Instant at which this path may next be dispatched.
	pub next_retry_at: Instant,
}
impl BackoffState {
	/// Build the state following a path's first recorded failure.
	pub fn first_failure(now: Instant) -> Self {
		Self { consecutive_errors: 1, current_delay: INITIAL_BACKOFF, next_retry_at: now + INITIAL_BACKOFF }
	}

	/// Double the delay (capped at [`MAX_BACKOFF`]) following another failure.
	pub fn escalate(&self, now: Instant) -> Self {
		let delay = (self.current_delay * 2).min(MAX_BACKOFF);

		Self { consecutive_errors: self.consecutive_errors + 1, current_delay: delay, next_retry_at: now + delay }
	}

	/// Whether the path is still within its backoff window.
	pub fn is_active(&self, now: Instant) -> bool {
		now < self.next_retry_at
	}

	/// Time remaining before the path may be retried.
	pub fn retry_after(&self, now: Instant) -> Duration {
		self.next_retry_at.saturating_duration_since(now)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn escalation_doubles_and_caps() {
		let now = Instant::now();
		let mut state = BackoffState::first_failure(now);

		assert_eq!(state.current_delay, Duration::from_secs(5));

		let mut seen = vec![state.current_delay];
		for _ in 0..8 {
			state = state.escalate(now);
			seen.push(state.current_delay);
		}

		assert_eq!(seen, vec![5, 10, 20, 40, 80, 160, 300, 300, 300].into_iter().map(Duration::from_secs).collect::<Vec<_>>());
	}

	#[test]
	fn active_window_respects_next_retry_at() {
		let now = Instant::now();
		let state = BackoffState::first_failure(now);

		assert!(state.is_active(now));
		assert!(!state.is_active(now + Duration::from_secs(6)));
	}
}
