//! Built-in validation policy applied when no plugin overrides it.

use crate::config::ValidationConfig;

/// Decide whether a fetched body should be cached, per [`ValidationConfig`].
///
/// Paths not covered by either rule are accepted unconditionally.
pub fn should_cache(config: &ValidationConfig, path: &str, data: &[u8]) -> bool {
	if config.protected_json_paths.iter().any(|p| p == path) {
		return is_non_null_json_object(data);
	}

	if config.csv_path.as_deref() == Some(path) {
		return is_plausible_csv(data);
	}

	true
}

fn is_non_null_json_object(data: &[u8]) -> bool {
	matches!(serde_json::from_slice::<serde_json::Value>(data), Ok(serde_json::Value::Object(_)))
}

fn is_plausible_csv(data: &[u8]) -> bool {
	match std::str::from_utf8(data) {
		Ok(text) => text.matches(',').count() >= 4,
		Err(_) => false,
	}
}
