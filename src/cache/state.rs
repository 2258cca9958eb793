//! Per-key coordination primitives used by [`super::engine::CacheEngine`].
//!
//! Unlike the donor crate's small, fixed set of tenant/provider registrations,
//! this cache's key space (full request URLs) is open-ended, so there is no
//! fixed per-key state machine to walk. Instead each key gets a slot holding
//! the last validated entry, and a short-lived single-flight watcher is
//! created only while a fetch for that key is in progress.

use tokio::sync::{RwLock, watch};

use crate::{cache::entry::CacheEntry, error::Error};

/// Outcome of a coalesced backend fetch, shared across every caller waiting on it.
pub(crate) type FetchResult = Result<CacheEntry, std::sync::Arc<Error>>;

/// Holds the last validated entry for one cache key.
///
/// Read and written behind a `RwLock` so concurrent lookups don't block each
/// other while a single writer installs a freshly fetched entry.
#[derive(Debug, Default)]
pub(crate) struct KeySlot {
	pub(crate) entry: RwLock<Option<CacheEntry>>,
}

/// The single-flight watcher installed for a key while a fetch is underway.
///
/// The driving caller spawns the actual upstream call as a detached task and
/// holds the sending half; every caller (including the driver) awaits a
/// cloned receiver. Dropping a receiver never cancels the spawned task, which
/// is what lets `get_or_fetch`'s slow-timeout race the fetch without
/// cancelling it.
pub(crate) struct PendingFetch {
	pub(crate) rx: watch::Receiver<Option<FetchResult>>,
}
impl PendingFetch {
	pub(crate) fn new() -> (watch::Sender<Option<FetchResult>>, Self) {
		let (tx, rx) = watch::channel(None);

		(tx, Self { rx })
	}

	/// Wait for the fetch driving this watcher to complete.
	pub(crate) async fn wait(mut self) -> FetchResult {
		loop {
			if let Some(result) = self.rx.borrow().clone() {
				return result;
			}

			if self.rx.changed().await.is_err() {
				// The sender was dropped without ever sending a value, which
				// only happens if the driving task panicked before finishing.
				return Err(std::sync::Arc::new(Error::Io(std::io::Error::other(
					"fetch task ended without producing a result",
				))));
			}
		}
	}
}
impl Clone for PendingFetch {
	fn clone(&self) -> Self {
		Self { rx: self.rx.clone() }
	}
}
