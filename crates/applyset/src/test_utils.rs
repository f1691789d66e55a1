//! Common test utilities.

use async_trait::async_trait;
use kube::{core::Status, Client, Config};

use crate::{
	factory::{ClientFactory, ConfigError},
	mapper::{DiscoveryError, ResourceMapping, ResourceScope, RestMapper},
};

/// A mapper with the handful of core types the tests exercise.
pub fn test_mapper() -> RestMapper {
	use kube::{core::GroupVersionKind, discovery::ApiResource};

	let entries = [
		("", "v1", "ConfigMap", "configmaps", ResourceScope::Namespaced),
		("", "v1", "Secret", "secrets", ResourceScope::Namespaced),
		(
			"",
			"v1",
			"Namespace",
			"namespaces",
			ResourceScope::ClusterWide,
		),
		(
			"apps",
			"v1",
			"Deployment",
			"deployments",
			ResourceScope::Namespaced,
		),
	];

	RestMapper::from_resources(entries.map(|(group, version, kind, plural, scope)| {
		let gvk = GroupVersionKind::gvk(group, version, kind);
		let api_resource = ApiResource::from_gvk_with_plural(&gvk, plural);
		(
			gvk,
			ResourceMapping {
				api_resource,
				scope,
			},
		)
	}))
}

/// A [`ClientFactory`] double with scriptable failures.
///
/// The client it hands out points at an unroutable localhost address; it
/// is only good for construction-time behavior, never for API calls.
pub struct FakeFactory {
	pub namespace: String,
	pub enforce: bool,
	pub mapper: RestMapper,
	pub fail_client: bool,
	pub fail_namespace: bool,
	pub fail_mapper: bool,
}

impl FakeFactory {
	pub fn with_namespace(namespace: &str) -> Self {
		Self {
			namespace: namespace.to_string(),
			enforce: false,
			mapper: test_mapper(),
			fail_client: false,
			fail_namespace: false,
			fail_mapper: false,
		}
	}
}

#[async_trait]
impl ClientFactory for FakeFactory {
	fn client(&self) -> Result<Client, ConfigError> {
		if self.fail_client {
			return Err(ConfigError::NoCurrentContext);
		}

		let uri: http::Uri = "http://127.0.0.1:1".parse().expect("static uri");
		Client::try_from(Config::new(uri)).map_err(ConfigError::Kube)
	}

	fn namespace(&self) -> Result<(String, bool), ConfigError> {
		if self.fail_namespace {
			return Err(ConfigError::NoCurrentContext);
		}
		Ok((self.namespace.clone(), self.enforce))
	}

	async fn rest_mapper(&self) -> Result<RestMapper, DiscoveryError> {
		if self.fail_mapper {
			return Err(DiscoveryError::FullDiscovery(kube::Error::Api(
				Status::failure("discovery unavailable", "ServiceUnavailable")
					.with_code(503)
					.boxed(),
			)));
		}
		Ok(self.mapper.clone())
	}
}
