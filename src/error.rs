//! Crate-wide error types and `Result` alias.

use std::time::Duration;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the cache proxy core.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	SystemTime(#[from] std::time::SystemTimeError),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	/// An explicit [`crate::cache::CacheEngine::refresh`] call reports the
	/// cause of the coalesced fetch it waited on.
	#[error(transparent)]
	Fetch(std::sync::Arc<Error>),

	/// A path is currently rejected by backoff; carries when it will next be tried.
	#[error("'{path}' is in backoff: retry after {retry_after:?} ({consecutive_errors} consecutive failures)")]
	Backoff { path: String, retry_after: Duration, consecutive_errors: u32 },
	/// The upstream responded, but with a status this crate treats as a failure.
	#[error("upstream responded {status} for {url}")]
	Upstream { status: http::StatusCode, url: String },
	/// A fetched response failed the cache's validation policy and was not stored.
	#[error("response for '{path}' rejected by validation: {reason}")]
	Rejected { path: String, reason: String },
	/// A configuration value, or a validation-policy field, failed its own checks.
	#[error("validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
	/// The upstream fetch failed and there is no stale entry to fall back to.
	#[error("no cached entry for '{key}'")]
	NoCachedEntry { key: String },

	#[error("metrics error: {0}")]
	Metrics(String),
}

#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}
