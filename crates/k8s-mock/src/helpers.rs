//! Helper functions for mock Kubernetes testing.

/// Deep merge two JSON values (patch into base), JSON merge patch style.
pub fn merge_json(base: serde_json::Value, patch: serde_json::Value) -> serde_json::Value {
	match (base, patch) {
		(serde_json::Value::Object(mut base_map), serde_json::Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				let base_value = base_map.remove(&key).unwrap_or(serde_json::Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			serde_json::Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}
