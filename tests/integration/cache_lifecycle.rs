//! Cold-start, stale-refresh, and validation-rejection scenarios.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use cache_proxy_core::{
	AppConfig, BackendConfig, CacheConfig, CacheEngine, ConnectionManager, PluginRegistry, ProxyConfig, StatisticsAggregator, UrlConfig,
	ValidationConfig,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

fn config(server_uri: &str, urls: Vec<UrlConfig>, validation: ValidationConfig) -> Arc<AppConfig> {
	Arc::new(AppConfig {
		backend: BackendConfig { url: url::Url::parse(server_uri).unwrap(), timeout_secs: 5 },
		proxy: ProxyConfig::default(),
		cache: CacheConfig { default_ttl_secs: 60, default_stale_time_secs: 1, slow_request_timeout_secs: 1, validation },
		urls,
	})
}

fn engine(config: Arc<AppConfig>) -> (CacheEngine, ConnectionManager) {
	let connection = ConnectionManager::with_client(reqwest::Client::new(), config.backend.url.clone(), config.backend.timeout(), 4);
	let cache = CacheEngine::new(config, connection.clone(), PluginRegistry::default());

	(cache, connection)
}

#[tokio::test]
async fn cold_miss_then_hit_is_reflected_in_statistics() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	Mock::given(method("GET")).and(path("/widgets")).respond_with(ResponseTemplate::new(200).set_body_string("widget-data")).mount(&server).await;

	let config = config(&server.uri(), vec![], ValidationConfig::default());
	let (cache, connection) = engine(config);
	let stats = StatisticsAggregator::new(cache.clone(), connection);

	assert!(cache.lookup("/widgets").await.is_none());

	let (entry, served_from_cache) = cache.get_or_fetch("/widgets", None).await.unwrap();
	assert!(!served_from_cache);
	assert_eq!(entry.payload, Bytes::from_static(b"widget-data"));

	let (_, served_from_cache) = cache.get_or_fetch("/widgets", None).await.unwrap();
	assert!(served_from_cache);

	let snapshot = stats.cache_stats().await;
	let key_stats = snapshot.per_key.get("/widgets").expect("key statistics present");
	assert_eq!(key_stats.hits, 1);
	assert_eq!(key_stats.misses, 1);

	let health = stats.health().await;
	assert!(health.healthy);
	assert_eq!(health.cache_size, 1);
}

#[tokio::test]
async fn stale_entry_is_served_and_refreshed_in_background() {
	let server = MockServer::start().await;
	Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("v1")).up_to_n_times(1).mount(&server).await;
	Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("v2")).mount(&server).await;

	let config = config(&server.uri(), vec![], ValidationConfig::default());
	let (cache, _connection) = engine(config);

	let (first, _) = cache.get_or_fetch("/ticking", None).await.unwrap();
	assert_eq!(first.payload, Bytes::from_static(b"v1"));

	// `default_stale_time_secs` above is 1s; wait past it so the entry is
	// stale-but-fresh and `lookup` kicks off a background refresh.
	tokio::time::sleep(Duration::from_millis(1100)).await;

	let stale = cache.lookup("/ticking").await.expect("entry still fresh enough to serve");
	assert_eq!(stale.payload, Bytes::from_static(b"v1"));

	// give the spawned background refresh a moment to land.
	tokio::time::sleep(Duration::from_millis(100)).await;

	let refreshed = cache.lookup("/ticking").await.expect("entry still present");
	assert_eq!(refreshed.payload, Bytes::from_static(b"v2"));
}

#[tokio::test]
async fn validation_policy_rejects_a_configured_path() {
	let server = MockServer::start().await;
	Mock::given(method("GET")).and(path("/report.csv")).respond_with(ResponseTemplate::new(200).set_body_string("not,a,csv")).mount(&server).await;

	let validation = ValidationConfig { protected_json_paths: vec![], csv_path: Some("/report.csv".into()) };
	let config = config(&server.uri(), vec![], validation);
	let (cache, _connection) = engine(config);

	let err = cache.get_or_fetch("/report.csv", None).await.unwrap_err();
	assert!(matches!(err, cache_proxy_core::Error::NoCachedEntry { .. }));
	assert!(cache.lookup("/report.csv").await.is_none());
}
