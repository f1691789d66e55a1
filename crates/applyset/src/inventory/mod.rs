//! Inventory objects: persisted markers recording the set of resources
//! that were applied together.
//!
//! An inventory object is an ordinary resource (a ConfigMap by default)
//! carrying the [`INVENTORY_LABEL`]. Its data section stores one key per
//! tracked object, which later invocations use to detect what was applied
//! before. How the tracked set maps onto a storage resource is decided by
//! injected strategy functions, so alternate representations can be
//! substituted without touching the client.

pub mod client;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Label identifying an inventory object. Its value is the inventory id.
pub const INVENTORY_LABEL: &str = "applyset.dev/inventory-id";

/// Errors from inventory classification and encoding.
#[derive(Debug, Error)]
pub enum InventoryError {
	#[error("found {0} inventory objects, expected at most one")]
	MultipleInventoryObjects(usize),

	#[error("inventory object missing metadata.name")]
	MissingName,

	#[error("invalid inventory entry `{0}`")]
	InvalidEntry(String),
}

/// Identifying information for an inventory object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryInfo {
	/// Name of the storage resource.
	pub name: String,
	/// Namespace of the storage resource, empty if unset.
	pub namespace: String,
	/// Value of the inventory label, empty if unset.
	pub id: String,
}

impl InventoryInfo {
	/// Extract inventory identity from a manifest.
	pub fn from_manifest(manifest: &Value) -> Result<Self, InventoryError> {
		let name = manifest
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.ok_or(InventoryError::MissingName)?
			.to_string();
		let namespace = manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("")
			.to_string();
		let id = manifest
			.pointer("/metadata/labels")
			.and_then(|labels| labels.get(INVENTORY_LABEL))
			.and_then(Value::as_str)
			.unwrap_or("")
			.to_string();

		Ok(Self {
			name,
			namespace,
			id,
		})
	}
}

/// Identity of a tracked object as recorded in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjMetadata {
	/// API group, empty for the core group.
	pub group: String,
	pub kind: String,
	/// Namespace, empty for cluster-scoped objects.
	pub namespace: String,
	pub name: String,
}

impl ObjMetadata {
	/// Extract tracked-object identity from a manifest.
	pub fn from_manifest(manifest: &Value) -> Option<Self> {
		let api_version = manifest.get("apiVersion")?.as_str()?;
		let group = match api_version.split_once('/') {
			Some((g, _)) => g,
			None => "",
		};
		let kind = manifest.get("kind")?.as_str()?;
		let name = manifest.pointer("/metadata/name")?.as_str()?;
		let namespace = manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("");

		Some(Self {
			group: group.to_string(),
			kind: kind.to_string(),
			namespace: namespace.to_string(),
			name: name.to_string(),
		})
	}

	/// Inventory data key for this object.
	///
	/// Underscores are safe separators: names and namespaces are DNS-1123
	/// labels, kinds are alphanumeric, and groups contain only dots and
	/// dashes besides alphanumerics.
	pub fn to_key(&self) -> String {
		format!(
			"{}_{}_{}_{}",
			self.group, self.kind, self.namespace, self.name
		)
	}

	/// Parse an inventory data key back into object identity.
	pub fn from_key(key: &str) -> Result<Self, InventoryError> {
		let parts: Vec<&str> = key.split('_').collect();
		let [group, kind, namespace, name] = parts[..] else {
			return Err(InventoryError::InvalidEntry(key.to_string()));
		};
		if kind.is_empty() || name.is_empty() {
			return Err(InventoryError::InvalidEntry(key.to_string()));
		}

		Ok(Self {
			group: group.to_string(),
			kind: kind.to_string(),
			namespace: namespace.to_string(),
			name: name.to_string(),
		})
	}
}

impl fmt::Display for ObjMetadata {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
	}
}

/// Strategy reading the tracked object set out of a storage object.
pub type WrapInventoryFn = fn(&Value) -> Result<Vec<ObjMetadata>, InventoryError>;

/// Strategy materializing an inventory into a concrete storage resource.
pub type InventoryToStorageFn = fn(&InventoryInfo, &[ObjMetadata]) -> Value;

/// Returns true if the manifest carries the inventory label.
pub fn is_inventory_object(manifest: &Value) -> bool {
	manifest
		.pointer("/metadata/labels")
		.and_then(|labels| labels.get(INVENTORY_LABEL))
		.and_then(Value::as_str)
		.is_some()
}

/// Split a set of manifests into the inventory object and the rest.
///
/// At most one inventory object may be present. Zero inventory objects is
/// not an error: the full input comes back as regular objects.
pub fn split_manifests(
	objs: Vec<Value>,
) -> Result<(Option<InventoryInfo>, Vec<Value>), InventoryError> {
	let (inventory, regular): (Vec<Value>, Vec<Value>) =
		objs.into_iter().partition(is_inventory_object);

	match inventory.len() {
		0 => Ok((None, regular)),
		1 => Ok((Some(InventoryInfo::from_manifest(&inventory[0])?), regular)),
		n => Err(InventoryError::MultipleInventoryObjects(n)),
	}
}

/// Read the tracked object set out of a ConfigMap storage object.
///
/// A missing or empty data section yields an empty set. The result is
/// sorted so repeated loads compare equal.
pub fn wrap_configmap_inventory(storage: &Value) -> Result<Vec<ObjMetadata>, InventoryError> {
	let Some(data) = storage.get("data").and_then(Value::as_object) else {
		return Ok(Vec::new());
	};

	let mut objs = data
		.keys()
		.map(|key| ObjMetadata::from_key(key))
		.collect::<Result<Vec<_>, _>>()?;
	objs.sort();
	Ok(objs)
}

/// Materialize an inventory and its tracked set into a ConfigMap resource.
pub fn inventory_to_configmap(info: &InventoryInfo, objs: &[ObjMetadata]) -> Value {
	let data: serde_json::Map<String, Value> = objs
		.iter()
		.map(|obj| (obj.to_key(), Value::String(String::new())))
		.collect();

	let mut metadata = serde_json::json!({
		"name": info.name,
		"labels": { INVENTORY_LABEL: info.id },
	});
	if !info.namespace.is_empty() {
		metadata["namespace"] = Value::String(info.namespace.clone());
	}

	serde_json::json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": metadata,
		"data": data,
	})
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;

	fn inventory_manifest(name: &str) -> Value {
		serde_json::json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {
				"name": name,
				"namespace": "default",
				"labels": { INVENTORY_LABEL: "test-id" }
			}
		})
	}

	fn regular_manifest(name: &str) -> Value {
		serde_json::json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": { "name": name, "namespace": "default" }
		})
	}

	#[test]
	fn test_split_no_inventory_returns_all_as_regular() {
		let objs = vec![regular_manifest("a"), regular_manifest("b")];

		let (info, regular) = split_manifests(objs.clone()).unwrap();
		assert_eq!(info, None);
		assert_eq!(regular, objs);
	}

	#[test]
	fn test_split_single_inventory() {
		let objs = vec![
			regular_manifest("a"),
			inventory_manifest("inv"),
			regular_manifest("b"),
		];

		let (info, regular) = split_manifests(objs).unwrap();
		let info = info.unwrap();
		assert_eq!(info.name, "inv");
		assert_eq!(info.namespace, "default");
		assert_eq!(info.id, "test-id");
		assert_eq!(regular.len(), 2);
	}

	#[test]
	fn test_split_multiple_inventory_objects_errors() {
		let objs = vec![inventory_manifest("one"), inventory_manifest("two")];

		let result = split_manifests(objs);
		assert_matches!(result, Err(InventoryError::MultipleInventoryObjects(2)));
	}

	#[test]
	fn test_split_inventory_missing_name_errors() {
		let objs = vec![serde_json::json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": { "labels": { INVENTORY_LABEL: "test-id" } }
		})];

		assert_matches!(split_manifests(objs), Err(InventoryError::MissingName));
	}

	#[rstest]
	#[case::core_namespaced("", "ConfigMap", "default", "app", "_ConfigMap_default_app")]
	#[case::grouped("apps", "Deployment", "prod", "web", "apps_Deployment_prod_web")]
	#[case::cluster_scoped("", "Namespace", "", "prod", "_Namespace__prod")]
	fn test_obj_metadata_key_round_trip(
		#[case] group: &str,
		#[case] kind: &str,
		#[case] namespace: &str,
		#[case] name: &str,
		#[case] key: &str,
	) {
		let obj = ObjMetadata {
			group: group.to_string(),
			kind: kind.to_string(),
			namespace: namespace.to_string(),
			name: name.to_string(),
		};

		assert_eq!(obj.to_key(), key);
		assert_eq!(ObjMetadata::from_key(key).unwrap(), obj);
	}

	#[rstest]
	#[case::too_few_parts("only_three_parts")]
	#[case::empty_kind("group__ns_name")]
	#[case::empty_name("group_Kind_ns_")]
	fn test_obj_metadata_invalid_key(#[case] key: &str) {
		assert_matches!(ObjMetadata::from_key(key), Err(InventoryError::InvalidEntry(_)));
	}

	#[test]
	fn test_obj_metadata_from_manifest() {
		let manifest = serde_json::json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": { "name": "web", "namespace": "prod" }
		});

		let obj = ObjMetadata::from_manifest(&manifest).unwrap();
		assert_eq!(obj.group, "apps");
		assert_eq!(obj.kind, "Deployment");
		assert_eq!(obj.namespace, "prod");
		assert_eq!(obj.name, "web");
	}

	#[test]
	fn test_configmap_strategies_round_trip() {
		let info = InventoryInfo {
			name: "inv".to_string(),
			namespace: "default".to_string(),
			id: "test-id".to_string(),
		};
		let objs = vec![
			ObjMetadata {
				group: "".to_string(),
				kind: "ConfigMap".to_string(),
				namespace: "default".to_string(),
				name: "app".to_string(),
			},
			ObjMetadata {
				group: "apps".to_string(),
				kind: "Deployment".to_string(),
				namespace: "default".to_string(),
				name: "web".to_string(),
			},
		];

		let storage = inventory_to_configmap(&info, &objs);
		assert!(is_inventory_object(&storage));
		assert_eq!(
			storage.pointer("/metadata/namespace").and_then(Value::as_str),
			Some("default")
		);

		let mut expected = objs;
		expected.sort();
		assert_eq!(wrap_configmap_inventory(&storage).unwrap(), expected);
	}

	#[test]
	fn test_wrap_configmap_inventory_without_data() {
		let storage = inventory_manifest("inv");
		assert_eq!(wrap_configmap_inventory(&storage).unwrap(), Vec::new());
	}
}
