//! REST mapping: resolving resource kind and version identifiers to API
//! endpoint and scope information via the cluster's discovery API.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),
}

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}

/// A resolved API resource with its scope.
#[derive(Debug, Clone)]
pub struct ResourceMapping {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
}

/// Resolver translating resource kind/version identifiers into API
/// endpoint and scope information.
///
/// Built by querying the cluster's discovery API once; lookups afterward
/// are O(1) by GroupVersionKind.
#[derive(Debug, Clone, Default)]
pub struct RestMapper {
	mappings: HashMap<GroupVersionKind, ResourceMapping>,
}

impl RestMapper {
	/// Build a mapper by querying the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only
	/// 2 API calls, falling back to full legacy discovery on older
	/// clusters.
	#[instrument(skip(client))]
	pub async fn discover(client: &Client) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				let discovery = Discovery::new(client.clone())
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?;
				Ok(Self::from_discovery(discovery))
			}
		}
	}

	/// Build a mapper from a completed Discovery.
	fn from_discovery(discovery: Discovery) -> Self {
		let mut mappings = HashMap::new();

		for group in discovery.groups() {
			// Iterate all versions, not just recommended, so we can handle
			// manifests using older API versions (e.g., v1alpha1 vs v1beta1)
			for ver in group.versions() {
				for (ar, caps) in group.versioned_resources(ver) {
					let gvk = gvk_from_api_resource(&ar);

					let scope = match caps.scope {
						Scope::Namespaced => ResourceScope::Namespaced,
						Scope::Cluster => ResourceScope::ClusterWide,
					};

					mappings.insert(
						gvk,
						ResourceMapping {
							api_resource: ar,
							scope,
						},
					);
				}
			}
		}

		Self { mappings }
	}

	/// Build a mapper from a static resource list.
	///
	/// Intended for embedders that already know their resource types and
	/// for test doubles that must not touch a cluster.
	pub fn from_resources(
		resources: impl IntoIterator<Item = (GroupVersionKind, ResourceMapping)>,
	) -> Self {
		Self {
			mappings: resources.into_iter().collect(),
		}
	}

	/// Look up a resource by its GroupVersionKind.
	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&ResourceMapping> {
		self.mappings.get(gvk)
	}

	/// Iterate over all known resources.
	pub fn iter(&self) -> impl Iterator<Item = (&GroupVersionKind, &ResourceMapping)> {
		self.mappings.iter()
	}
}

/// Extract a GroupVersionKind from a Kubernetes manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	Some(GroupVersionKind::gvk(group, version, kind))
}

/// Create a GroupVersionKind from a kube ApiResource.
fn gvk_from_api_resource(ar: &ApiResource) -> GroupVersionKind {
	GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::grouped("apps/v1", "Deployment", "apps", "v1")]
	#[case::core("v1", "ConfigMap", "", "v1")]
	#[case::nested_group("networking.k8s.io/v1", "Ingress", "networking.k8s.io", "v1")]
	fn test_gvk_from_manifest(
		#[case] api_version: &str,
		#[case] kind: &str,
		#[case] group: &str,
		#[case] version: &str,
	) {
		let manifest = serde_json::json!({
			"apiVersion": api_version,
			"kind": kind,
			"metadata": { "name": "test" }
		});

		let gvk = gvk_from_manifest(&manifest).unwrap();
		assert_eq!(gvk.group, group);
		assert_eq!(gvk.version, version);
		assert_eq!(gvk.kind, kind);
		assert_eq!(gvk.api_version(), api_version);
	}

	#[rstest]
	#[case::missing_api_version(serde_json::json!({ "kind": "Deployment" }))]
	#[case::missing_kind(serde_json::json!({ "apiVersion": "v1" }))]
	#[case::not_an_object(serde_json::json!("ConfigMap"))]
	fn test_gvk_from_manifest_incomplete(#[case] manifest: serde_json::Value) {
		assert!(gvk_from_manifest(&manifest).is_none());
	}

	#[test]
	fn test_from_resources_lookup() {
		let gvk = GroupVersionKind::gvk("", "v1", "ConfigMap");
		let mapper = RestMapper::from_resources([(
			gvk.clone(),
			ResourceMapping {
				api_resource: ApiResource::from_gvk_with_plural(&gvk, "configmaps"),
				scope: ResourceScope::Namespaced,
			},
		)]);

		let mapping = mapper.lookup(&gvk).unwrap();
		assert_eq!(mapping.scope, ResourceScope::Namespaced);
		assert_eq!(mapping.api_resource.plural, "configmaps");

		let unknown = GroupVersionKind::gvk("example.dev", "v1", "Widget");
		assert!(mapper.lookup(&unknown).is_none());
	}
}
