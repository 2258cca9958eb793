//! Pluggable hooks into the cache pipeline: validation overrides and
//! fetch-completion notifications.

use std::{future::Future, pin::Pin};

use bytes::Bytes;

/// A boxed, `'a`-bounded future, used to keep [`Plugin`] dyn-compatible
/// without pulling in an async-trait macro crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A hook into the cache pipeline.
///
/// Every method has a default no-op implementation, so a plugin can
/// implement only what it needs. `on_response` is fire-and-forget: the cache
/// engine never awaits it before returning a response, and nothing it does
/// can reject a fetch.
pub trait Plugin: Send + Sync + std::fmt::Debug {
	/// Called once when the plugin is registered.
	fn initialize(&self) -> BoxFuture<'_, ()> {
		Box::pin(async {})
	}

	/// Called after a successful fetch, once the entry is already visible in
	/// the cache. Never blocks the caller that triggered the fetch.
	fn on_response(&self, _path: &str, _data: Bytes) -> BoxFuture<'_, ()> {
		Box::pin(async {})
	}

	/// Override the built-in validation policy for `path`. Returning `None`
	/// defers to the built-in policy; `Some(true)`/`Some(false)` accepts or
	/// rejects the response outright.
	fn should_cache(&self, _path: &str, _data: &[u8]) -> Option<bool> {
		None
	}

	/// Called once when the owning engine is shutting down.
	fn shutdown(&self) -> BoxFuture<'_, ()> {
		Box::pin(async {})
	}
}

/// An ordered collection of [`Plugin`]s, consulted by the cache engine.
#[derive(Clone, Default)]
pub struct PluginRegistry {
	plugins: std::sync::Arc<Vec<std::sync::Arc<dyn Plugin>>>,
}
impl PluginRegistry {
	/// Build a registry from an ordered list of plugins.
	pub fn new(plugins: Vec<std::sync::Arc<dyn Plugin>>) -> Self {
		Self { plugins: std::sync::Arc::new(plugins) }
	}

	/// Run every plugin's `initialize` hook to completion.
	pub async fn initialize_all(&self) {
		for plugin in self.plugins.iter() {
			plugin.initialize().await;
		}
	}

	/// Notify every plugin of a completed fetch, fire-and-forget.
	///
	/// Each notification runs on its own detached task so a slow or
	/// misbehaving plugin can never delay the caller, and a panicking plugin
	/// is contained to its own task instead of propagating.
	pub fn notify(&self, path: &str, data: Bytes) {
		for plugin in self.plugins.iter() {
			let plugin = plugin.clone();
			let path = path.to_string();

			tokio::spawn(async move { plugin.on_response(&path, data.clone()).await });
		}
	}

	/// First plugin override for `path`, if any plugin has an opinion.
	pub fn should_cache(&self, path: &str, data: &[u8]) -> Option<bool> {
		self.plugins.iter().find_map(|plugin| plugin.should_cache(path, data))
	}

	/// Run every plugin's `shutdown` hook to completion.
	pub async fn shutdown_all(&self) {
		for plugin in self.plugins.iter() {
			plugin.shutdown().await;
		}
	}
}
