//! Configuration data shapes.
//!
//! These types describe the shape of configuration the cache engine,
//! connection manager, and scheduler need to operate. Parsing them from a
//! file, environment, or remote config service is a concern of the binary
//! that embeds this crate, not of this crate — only the shapes and their
//! `validate()` checks live here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_max_concurrent_requests() -> usize {
	2
}

fn default_timeout_secs() -> u64 {
	30
}

fn default_slow_request_timeout_secs() -> u64 {
	5
}

fn default_ttl_secs() -> u64 {
	60
}

fn default_stale_time_secs() -> u64 {
	30
}

fn default_poll_interval_secs() -> u64 {
	60
}

/// The single upstream this proxy fronts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
	/// Base URL of the upstream service, e.g. `http://upstream.internal:8080`.
	pub url: url::Url,
	/// Per-request timeout against the upstream.
	#[serde(default = "default_timeout_secs", rename = "timeout_secs")]
	pub timeout_secs: u64,
}
impl BackendConfig {
	/// Validate field invariants.
	pub fn validate(&self) -> Result<()> {
		if self.url.scheme() != "http" && self.url.scheme() != "https" {
			return Err(Error::Validation {
				field: "backend.url",
				reason: "must be an http or https URL".into(),
			});
		}
		if self.timeout_secs == 0 {
			return Err(Error::Validation {
				field: "backend.timeout_secs",
				reason: "must be greater than zero".into(),
			});
		}

		Ok(())
	}

	/// Request timeout as a [`Duration`].
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}

/// Connection manager tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
	/// Maximum number of upstream requests in flight at once.
	#[serde(default = "default_max_concurrent_requests")]
	pub max_concurrent_requests: usize,
}
impl Default for ProxyConfig {
	fn default() -> Self {
		Self { max_concurrent_requests: default_max_concurrent_requests() }
	}
}
impl ProxyConfig {
	/// Validate field invariants.
	pub fn validate(&self) -> Result<()> {
		if self.max_concurrent_requests == 0 {
			return Err(Error::Validation {
				field: "proxy.max_concurrent_requests",
				reason: "must be greater than zero".into(),
			});
		}

		Ok(())
	}
}

/// Validation policy applied to a fetched response before it is cached.
///
/// This is the "hard-coded" half of the validation contract: a plugin may
/// override these defaults per-path via [`crate::plugin::Plugin::should_cache`],
/// but when no plugin opts in, these rules decide whether a response is
/// cacheable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
	/// Paths whose response body must be a non-null JSON object to be cached.
	#[serde(default)]
	pub protected_json_paths: Vec<String>,
	/// A path whose response body is expected to be CSV with at least four
	/// commas per payload; anything else is rejected.
	#[serde(default)]
	pub csv_path: Option<String>,
}

/// Cache engine tuning shared by every path unless overridden in [`UrlConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
	/// How long an entry is considered fresh.
	#[serde(default = "default_ttl_secs", rename = "default_ttl_secs")]
	pub default_ttl_secs: u64,
	/// How long into an entry's life a background refresh is scheduled.
	#[serde(default = "default_stale_time_secs", rename = "default_stale_time_secs")]
	pub default_stale_time_secs: u64,
	/// How long [`crate::cache::CacheEngine::get_or_fetch`] waits on a slow
	/// backend before falling back to a stale entry, if one exists.
	#[serde(default = "default_slow_request_timeout_secs", rename = "slow_request_timeout_secs")]
	pub slow_request_timeout_secs: u64,
	/// Built-in validation rules.
	#[serde(default)]
	pub validation: ValidationConfig,
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			default_ttl_secs: default_ttl_secs(),
			default_stale_time_secs: default_stale_time_secs(),
			slow_request_timeout_secs: default_slow_request_timeout_secs(),
			validation: ValidationConfig::default(),
		}
	}
}
impl CacheConfig {
	/// Validate field invariants.
	pub fn validate(&self) -> Result<()> {
		if self.default_ttl_secs == 0 {
			return Err(Error::Validation {
				field: "cache.default_ttl_secs",
				reason: "must be greater than zero".into(),
			});
		}
		if self.default_stale_time_secs >= self.default_ttl_secs {
			return Err(Error::Validation {
				field: "cache.default_stale_time_secs",
				reason: "must be less than default_ttl_secs".into(),
			});
		}

		Ok(())
	}

	/// Default freshness window as a [`Duration`].
	pub fn default_ttl(&self) -> Duration {
		Duration::from_secs(self.default_ttl_secs)
	}

	/// Default stale-refresh threshold as a [`Duration`].
	pub fn default_stale_time(&self) -> Duration {
		Duration::from_secs(self.default_stale_time_secs)
	}

	/// Slow-request fallback timeout as a [`Duration`].
	pub fn slow_request_timeout(&self) -> Duration {
		Duration::from_secs(self.slow_request_timeout_secs)
	}
}

/// Per-path overrides and, for polled paths, a warm/refresh interval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UrlConfig {
	/// Request path (and, for non-polled entries, query string) this entry covers.
	pub path: String,
	/// Overrides [`CacheConfig::default_ttl_secs`] for this path.
	pub ttl_secs: Option<u64>,
	/// Overrides [`CacheConfig::default_stale_time_secs`] for this path.
	pub stale_time_secs: Option<u64>,
	/// When set, the polling scheduler keeps this path warm at this interval.
	#[serde(default)]
	pub poll_interval_secs: Option<u64>,
}
impl UrlConfig {
	/// Validate field invariants.
	pub fn validate(&self) -> Result<()> {
		if self.path.is_empty() {
			return Err(Error::Validation { field: "url.path", reason: "must not be empty".into() });
		}
		if let Some(ttl) = self.ttl_secs
			&& ttl == 0
		{
			return Err(Error::Validation {
				field: "url.ttl_secs",
				reason: "must be greater than zero".into(),
			});
		}
		if let (Some(ttl), Some(stale)) = (self.ttl_secs, self.stale_time_secs)
			&& stale >= ttl
		{
			return Err(Error::Validation {
				field: "url.stale_time_secs",
				reason: "must be less than ttl_secs".into(),
			});
		}

		Ok(())
	}

	/// Whether the scheduler should poll this path on an interval.
	pub fn is_polled(&self) -> bool {
		self.poll_interval_secs.is_some()
	}

	/// Poll interval as a [`Duration`], if this path is polled.
	pub fn poll_interval(&self) -> Option<Duration> {
		self.poll_interval_secs.map(Duration::from_secs)
	}
}

/// Top-level configuration handed to the core by its embedding application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
	/// The single upstream this proxy fronts.
	pub backend: BackendConfig,
	/// Connection manager tuning.
	#[serde(default)]
	pub proxy: ProxyConfig,
	/// Cache engine tuning.
	#[serde(default)]
	pub cache: CacheConfig,
	/// Per-path overrides, keyed by path.
	#[serde(default)]
	pub urls: Vec<UrlConfig>,
}
impl AppConfig {
	/// Validate the whole configuration, including every [`UrlConfig`] entry.
	pub fn validate(&self) -> Result<()> {
		self.backend.validate()?;
		self.proxy.validate()?;
		self.cache.validate()?;
		for url in &self.urls {
			url.validate()?;
		}

		Ok(())
	}

	/// The [`UrlConfig`] override for an exact path, if one is configured.
	pub fn url_config_for_path(&self, path: &str) -> Option<&UrlConfig> {
		self.urls.iter().find(|u| u.path == path)
	}

	/// TTL to use for a path: its override, or the cache-wide default.
	pub fn ttl_for_path(&self, path: &str) -> Duration {
		self.url_config_for_path(path)
			.and_then(|u| u.ttl_secs)
			.map(Duration::from_secs)
			.unwrap_or_else(|| self.cache.default_ttl())
	}

	/// Stale-refresh threshold to use for a path: its override, or the default.
	pub fn stale_time_for_path(&self, path: &str) -> Duration {
		self.url_config_for_path(path)
			.and_then(|u| u.stale_time_secs)
			.map(Duration::from_secs)
			.unwrap_or_else(|| self.cache.default_stale_time())
	}

	/// All paths the scheduler should keep warm.
	pub fn polled_urls(&self) -> impl Iterator<Item = &UrlConfig> {
		self.urls.iter().filter(|u| u.is_polled())
	}
}

/// The path portion of a full request target, i.e. everything before `?`.
pub fn request_path(full_url: &str) -> &str {
	full_url.split('?').next().unwrap_or(full_url)
}
