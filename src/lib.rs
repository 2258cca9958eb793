//! Caching reverse-proxy core: a keyed response cache with
//! stale-while-revalidate semantics, a bounded-concurrency upstream dispatch
//! pipeline with per-path exponential backoff, and a polling scheduler that
//! keeps hot paths warm independent of client traffic.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod plugin;
pub mod scheduler;
pub mod stats;
pub mod validation;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")]
pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{CacheEngine, entry::CacheEntry},
	config::{AppConfig, BackendConfig, CacheConfig, ProxyConfig, UrlConfig, ValidationConfig},
	connection::{ActiveRequestSnapshot, BackoffSnapshot, CompletedRequest, ConnectionManager, FetchedResponse, QueueTelemetry},
	error::{Error, Result},
	plugin::{BoxFuture, Plugin, PluginRegistry},
	scheduler::PollingScheduler,
	stats::{CacheStatistics, HealthStatus, KeyStatistics, StatisticsAggregator},
};
