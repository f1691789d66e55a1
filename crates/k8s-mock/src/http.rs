//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual
//! kubeconfig-based connections, unlike in-process tower mocks.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::merge_json,
};

/// In-memory resource state shared between endpoint handlers.
///
/// Resources are keyed by `(collection_path, name)`, where the collection
/// path is e.g. `/api/v1/namespaces/default/configmaps`.
#[derive(Clone, Default)]
pub struct ResourceStore {
	inner: Arc<RwLock<HashMap<(String, String), serde_json::Value>>>,
}

impl ResourceStore {
	fn get(&self, api_path: &str, name: &str) -> Option<serde_json::Value> {
		self.inner
			.read()
			.unwrap()
			.get(&(api_path.to_string(), name.to_string()))
			.cloned()
	}

	fn insert(&self, api_path: String, name: String, value: serde_json::Value) {
		self.inner.write().unwrap().insert((api_path, name), value);
	}

	fn insert_if_absent(&self, api_path: String, name: String, value: serde_json::Value) {
		self.inner
			.write()
			.unwrap()
			.entry((api_path, name))
			.or_insert(value);
	}

	fn remove(&self, api_path: &str, name: &str) -> Option<serde_json::Value> {
		self.inner
			.write()
			.unwrap()
			.remove(&(api_path.to_string(), name.to_string()))
	}

	/// All resources whose collection path matches `list_path`, either
	/// directly or as a cluster-wide view over namespaced collections.
	fn list(&self, list_path: &str) -> Vec<serde_json::Value> {
		let inner = self.inner.read().unwrap();

		let direct: Vec<_> = inner
			.iter()
			.filter(|((api_path, _), _)| api_path == list_path)
			.map(|(_, v)| v.clone())
			.collect();
		if !direct.is_empty() {
			return direct;
		}

		inner
			.iter()
			.filter(|((api_path, _), _)| {
				cluster_wide_path(api_path).as_deref() == Some(list_path)
			})
			.map(|(_, v)| v.clone())
			.collect()
	}
}

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Resources to serve as raw manifests. The server derives API paths
	/// from apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<serde_json::Value>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	store: ResourceStore,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = MockDiscovery::default();
		let store = ResourceStore::default();

		debug!(uri = %server.uri(), "started mock K8s server");

		for manifest in self.resources {
			if let Some((api_path, name)) = api_path_for_manifest(&manifest, &discovery) {
				trace!(api_path = %api_path, name = %name, "registered resource");
				store.insert(api_path, name, manifest);
			}
		}

		// The default namespace always exists
		store.insert_if_absent(
			"/api/v1/namespaces".to_string(),
			"default".to_string(),
			serde_json::json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": { "name": "default" }
			}),
		);

		mount_version(&server).await;
		mount_discovery(&server, &discovery, self.discovery_mode).await;
		mount_resources(&server, &store).await;

		RunningHttpMockK8sServer { server, store }
	}
}

/// Derive the collection path and name for a manifest using discovery data.
fn api_path_for_manifest(
	manifest: &serde_json::Value,
	discovery: &MockDiscovery,
) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.get("metadata")?.get("name")?.as_str()?.to_string();
	let namespace = manifest
		.get("metadata")
		.and_then(|m| m.get("namespace"))
		.and_then(|n| n.as_str());

	let is_core = !api_version.contains('/');
	let resource = if is_core {
		discovery.core_resources.iter().find(|r| r.kind == kind)?
	} else {
		discovery
			.group_resources
			.get(api_version)?
			.iter()
			.find(|r| r.kind == kind)?
	};

	let root = if is_core { "/api" } else { "/apis" };
	let path = if resource.namespaced {
		let ns = namespace.unwrap_or("default");
		format!(
			"{}/{}/namespaces/{}/{}",
			root, api_version, ns, resource.name
		)
	} else {
		format!("{}/{}/{}", root, api_version, resource.name)
	};

	Some((path, name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Get the current state of a stored resource, if any.
	///
	/// `api_path` is the collection path, e.g.
	/// `/api/v1/namespaces/default/configmaps`.
	pub fn resource(&self, api_path: &str, name: &str) -> Option<serde_json::Value> {
		self.store.get(api_path, name)
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context_and_namespace("mock-context", "default")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom
	/// context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		self.kubeconfig_with_context_and_namespace(context_name, "default")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom
	/// context name and context namespace.
	pub fn kubeconfig_with_context_and_namespace(
		&self,
		context_name: &str,
		namespace: &str,
	) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some(namespace.to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

fn not_found_status() -> serde_json::Value {
	serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": "not found",
		"reason": "NotFound",
		"code": 404
	})
}

fn list_response(items: Vec<serde_json::Value>) -> serde_json::Value {
	serde_json::json!({
		"kind": "List",
		"apiVersion": "v1",
		"metadata": { "resourceVersion": "1" },
		"items": items
	})
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "28",
			"gitVersion": "v1.28.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

/// One resource entry in an aggregated discovery response.
fn aggregated_resource(resource: &MockApiResource, group: &str, version: &str) -> serde_json::Value {
	serde_json::json!({
		"resource": resource.name,
		"responseKind": {
			"group": group,
			"version": version,
			"kind": resource.kind
		},
		"scope": if resource.namespaced { "Namespaced" } else { "Cluster" },
		"verbs": resource.verbs,
	})
}

/// One group entry in an aggregated discovery response.
fn aggregated_group(group: &str, version: &str, resources: &[MockApiResource]) -> serde_json::Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| aggregated_resource(r, group, version))
		.collect();

	serde_json::json!({
		"metadata": { "name": group },
		"versions": [{
			"version": version,
			"resources": resources,
			"freshness": "Current"
		}]
	})
}

/// One resource entry in a legacy APIResourceList response.
fn legacy_resource(resource: &MockApiResource) -> serde_json::Value {
	serde_json::json!({
		"name": resource.name,
		"singularName": "",
		"namespaced": resource.namespaced,
		"kind": resource.kind,
		"verbs": resource.verbs,
	})
}

/// A legacy APIResourceList body for one group version.
fn legacy_resource_list(group_version: &str, resources: &[MockApiResource]) -> serde_json::Value {
	let resources: Vec<_> = resources.iter().map(legacy_resource).collect();
	serde_json::json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// Aggregated discovery endpoints are matched first, on the Accept
	// header. The Content-Type must indicate the aggregated discovery
	// format for clients to parse it correctly.
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	match mode {
		DiscoveryMode::Aggregated => {
			let core_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": [aggregated_group("", "v1", &discovery.core_resources)]
			});

			let groups: Vec<_> = discovery
				.group_resources
				.iter()
				.map(|(gv, rs)| {
					let (group, version) = gv.split_once('/').unwrap_or(("", gv));
					aggregated_group(group, version, rs)
				})
				.collect();
			let apis_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": groups
			});

			for (endpoint, body) in [("/api", core_body), ("/apis", apis_body)] {
				// set_body_raw, since set_body_json overwrites Content-Type
				let body = serde_json::to_vec(&body)
					.expect("serializing discovery JSON should never fail");

				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(
						ResponseTemplate::new(200)
							.set_body_raw(body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
					)
					.mount(server)
					.await;
			}
		}
		DiscoveryMode::Legacy => {
			// Return 406 Not Acceptable for aggregated discovery requests,
			// forcing the client down the legacy path
			for endpoint in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	// Legacy discovery endpoints (fallback): core API versions
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	// API group list
	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			serde_json::json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	// Core resources (/api/v1)
	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(legacy_resource_list("v1", &discovery.core_resources)),
		)
		.mount(server)
		.await;

	// Group resources (e.g., /apis/apps/v1)
	for (gv, rs) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{}", gv)))
			.respond_with(ResponseTemplate::new(200).set_body_json(legacy_resource_list(gv, rs)))
			.mount(server)
			.await;
	}
}

async fn mount_resources(server: &MockServer, store: &ResourceStore) {
	// PATCH - merge request body into the existing resource, persisting
	// unless dry-run is requested
	let patch_store = store.clone();
	Mock::given(method("PATCH"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (api_path, name) = split_resource_path(req.url.path());
			let is_dry_run = req.url.query().unwrap_or("").contains("dryRun");

			let patch: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);

			let merged = match patch_store.get(&api_path, &name) {
				Some(existing) => merge_json(existing, patch),
				None => patch,
			};

			if !is_dry_run {
				patch_store.insert(api_path, name, merged.clone());
			}

			ResponseTemplate::new(200).set_body_json(merged)
		})
		.mount(server)
		.await;

	// POST - create, echoing the request body back
	let post_store = store.clone();
	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let is_dry_run = req.url.query().unwrap_or("").contains("dryRun");

			let body: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);
			let name = body
				.pointer("/metadata/name")
				.and_then(|v| v.as_str())
				.unwrap_or("")
				.to_string();

			if !is_dry_run && !name.is_empty() {
				post_store.insert(req.url.path().to_string(), name, body.clone());
			}

			ResponseTemplate::new(200).set_body_json(body)
		})
		.mount(server)
		.await;

	// DELETE - remove the resource from the store
	let delete_store = store.clone();
	Mock::given(method("DELETE"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (api_path, name) = split_resource_path(req.url.path());

			match delete_store.remove(&api_path, &name) {
				Some(_) => ResponseTemplate::new(200).set_body_json(serde_json::json!({
					"kind": "Status",
					"apiVersion": "v1",
					"metadata": {},
					"status": "Success",
					"details": { "name": name }
				})),
				None => ResponseTemplate::new(404).set_body_json(not_found_status()),
			}
		})
		.mount(server)
		.await;

	// GET - catch-all serving both single resources and lists
	let get_store = store.clone();
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let path_str = req.url.path();
			let (api_path, name) = split_resource_path(path_str);

			// Single resource request
			if !name.is_empty() {
				if let Some(resource) = get_store.get(&api_path, &name) {
					return ResponseTemplate::new(200).set_body_json(resource);
				}
			}

			// LIST over the full request path (the trailing segment is the
			// collection, not a name)
			let items = get_store.list(path_str);
			if !items.is_empty() {
				return ResponseTemplate::new(200).set_body_json(list_response(items));
			}

			if !name.is_empty() {
				return ResponseTemplate::new(404).set_body_json(not_found_status());
			}

			ResponseTemplate::new(200).set_body_json(list_response(Vec::new()))
		})
		.mount(server)
		.await;
}

/// Split a Kubernetes API path into (collection_path, resource_name).
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> (`/api/v1/namespaces/default/configmaps`, `my-config`)
/// - `/apis/apps/v1/namespaces/default/deployments/my-deploy` -> (`/apis/apps/v1/namespaces/default/deployments`, `my-deploy`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
fn split_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rfind('/') {
		Some(last_slash) => (
			path[..last_slash].to_string(),
			path[last_slash + 1..].to_string(),
		),
		None => (path.to_string(), String::new()),
	}
}

/// Rewrite a namespaced collection path into its cluster-wide form.
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps` -> Some(`/api/v1/configmaps`)
/// - `/apis/apps/v1/namespaces/default/deployments` -> Some(`/apis/apps/v1/deployments`)
/// - `/api/v1/namespaces` -> None (already cluster-wide for namespaces)
fn cluster_wide_path(path: &str) -> Option<String> {
	let ns_idx = path.find("/namespaces/")?;
	let before_ns = &path[..ns_idx];
	let after_ns = &path[ns_idx + "/namespaces/".len()..];

	let slash_idx = after_ns.find('/')?;
	Some(format!("{}{}", before_ns, &after_ns[slash_idx..]))
}
