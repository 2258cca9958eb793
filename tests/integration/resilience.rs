//! Backoff propagation, slow-backend fallback, and scheduler warm-up.

use std::sync::Arc;

use bytes::Bytes;
use cache_proxy_core::{
	AppConfig, BackendConfig, CacheConfig, CacheEngine, ConnectionManager, Error, PluginRegistry, PollingScheduler, ProxyConfig, StatisticsAggregator,
	UrlConfig, ValidationConfig,
};
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

fn config(server_uri: &str, urls: Vec<UrlConfig>) -> Arc<AppConfig> {
	Arc::new(AppConfig {
		backend: BackendConfig { url: url::Url::parse(server_uri).unwrap(), timeout_secs: 5 },
		proxy: ProxyConfig::default(),
		cache: CacheConfig::default(),
		urls,
	})
}

#[tokio::test]
async fn repeated_upstream_failures_surface_as_backoff_through_the_cache() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

	let config = config(&server.uri(), vec![]);
	let connection = ConnectionManager::with_client(reqwest::Client::new(), config.backend.url.clone(), config.backend.timeout(), 1);
	let cache = CacheEngine::new(config, connection.clone(), PluginRegistry::default());
	let stats = StatisticsAggregator::new(cache.clone(), connection);

	assert!(cache.get_or_fetch("/flaky", None).await.is_err());

	let err = cache.get_or_fetch("/flaky", None).await.unwrap_err();
	assert!(matches!(err, Error::NoCachedEntry { .. }));

	let health = stats.health().await;
	assert!(!health.healthy);
	assert_eq!(health.paths_in_backoff, 1);
}

#[tokio::test]
async fn slow_backend_serves_stale_entry_without_cancelling_the_refresh() {
	let server = MockServer::start().await;
	Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("v1")).up_to_n_times(1).mount(&server).await;
	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(300)).set_body_string("v2"))
		.mount(&server)
		.await;

	let config = Arc::new(AppConfig {
		backend: BackendConfig { url: url::Url::parse(&server.uri()).unwrap(), timeout_secs: 5 },
		proxy: ProxyConfig::default(),
		cache: CacheConfig { default_ttl_secs: 1, default_stale_time_secs: 0, slow_request_timeout_secs: 1, validation: ValidationConfig::default() },
		urls: vec![],
	});
	let connection = ConnectionManager::with_client(reqwest::Client::new(), config.backend.url.clone(), config.backend.timeout(), 4);
	let cache = CacheEngine::new(config, connection, PluginRegistry::default());

	let (first, _) = cache.get_or_fetch("/expensive", None).await.unwrap();
	assert_eq!(first.payload, Bytes::from_static(b"v1"));

	// Let the entry fully expire so the next call must fetch, not just serve stale-but-fresh.
	tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

	let (served, from_cache) = cache.get_or_fetch("/expensive", Some(std::time::Duration::from_millis(50))).await.unwrap();
	assert!(from_cache);
	assert_eq!(served.payload, Bytes::from_static(b"v1"));

	// The slow fetch that was already in flight keeps running after the
	// caller above fell back to the stale entry; once it lands the cache
	// reflects the new value without anyone having to ask again.
	tokio::time::sleep(std::time::Duration::from_millis(500)).await;
	let refreshed = cache.lookup("/expensive").await.expect("entry present");
	assert_eq!(refreshed.payload, Bytes::from_static(b"v2"));
}

#[tokio::test]
async fn scheduler_warms_every_polled_path_and_skips_backoff_on_tick() {
	let server = MockServer::start().await;
	Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("warm")).mount(&server).await;

	let config = config(&server.uri(), vec![
		UrlConfig { path: "/a".into(), ttl_secs: None, stale_time_secs: None, poll_interval_secs: Some(60) },
		UrlConfig { path: "/b".into(), ttl_secs: None, stale_time_secs: None, poll_interval_secs: Some(60) },
	]);
	let connection = ConnectionManager::with_client(reqwest::Client::new(), config.backend.url.clone(), config.backend.timeout(), 4);
	let cache = CacheEngine::new(config.clone(), connection.clone(), PluginRegistry::default());
	let scheduler = PollingScheduler::new(cache.clone(), connection, config);

	scheduler.warm_cache().await;

	assert!(cache.lookup("/a").await.is_some());
	assert!(cache.lookup("/b").await.is_some());
}
