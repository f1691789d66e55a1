//! The provider seam: a capability bundle binding the cluster access
//! factory to the inventory and manifest subsystems.

use std::{io::Read, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::{
	factory::{ClientFactory, ConfigError},
	inventory::{
		self,
		client::{InventoryClient, InventoryClientError},
		inventory_to_configmap, wrap_configmap_inventory, InventoryError, InventoryInfo,
	},
	manifest::{ManifestReader, ReaderOptions},
	mapper::{DiscoveryError, RestMapper},
};

/// Errors surfaced by provider operations.
///
/// Every variant is a verbatim passthrough from a collaborating subsystem;
/// the provider originates no failures of its own.
#[derive(Debug, Error)]
pub enum ProviderError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Discovery(#[from] DiscoveryError),
}

/// Capability bundle for declarative apply tooling.
///
/// Wraps a cluster access factory and hands out pre-built inventory and
/// manifest facilities. Any implementation providing these operations is
/// substitutable; tests supply fakes that never touch a real cluster.
#[async_trait]
pub trait Provider: Send + Sync {
	/// The cluster access handle the provider was built with.
	fn factory(&self) -> Arc<dyn ClientFactory>;

	/// Construct an inventory client bound to this provider's cluster.
	fn inventory_client(&self) -> Result<InventoryClient, InventoryClientError>;

	/// Split a set of manifests into the inventory object and the regular
	/// objects.
	fn split_inventory(
		&self,
		objs: Vec<Value>,
	) -> Result<(Option<InventoryInfo>, Vec<Value>), InventoryError>;

	/// Build a REST mapper for this provider's cluster.
	async fn rest_mapper(&self) -> Result<RestMapper, DiscoveryError>;

	/// Construct a manifest reader.
	///
	/// With no arguments the reader consumes the given input stream and is
	/// labeled `stdin` for diagnostics. Otherwise `args[0]` names a
	/// manifest file or directory; any further arguments are ignored.
	async fn manifest_reader(
		&self,
		input: Box<dyn Read + Send>,
		args: &[String],
	) -> Result<ManifestReader, ProviderError>;
}

/// A [`Provider`] that stores its inventory in a ConfigMap.
pub struct ConfigMapProvider {
	factory: Arc<dyn ClientFactory>,
}

impl ConfigMapProvider {
	/// Wrap a cluster access factory.
	///
	/// Nothing is validated here; failures surface on first use of the
	/// returned capabilities.
	pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
		Self { factory }
	}
}

#[async_trait]
impl Provider for ConfigMapProvider {
	fn factory(&self) -> Arc<dyn ClientFactory> {
		self.factory.clone()
	}

	fn inventory_client(&self) -> Result<InventoryClient, InventoryClientError> {
		InventoryClient::new(
			self.factory.as_ref(),
			wrap_configmap_inventory,
			inventory_to_configmap,
		)
	}

	fn split_inventory(
		&self,
		objs: Vec<Value>,
	) -> Result<(Option<InventoryInfo>, Vec<Value>), InventoryError> {
		inventory::split_manifests(objs)
	}

	async fn rest_mapper(&self) -> Result<RestMapper, DiscoveryError> {
		self.factory.rest_mapper().await
	}

	#[instrument(skip(self, input, args), fields(arg_count = args.len()))]
	async fn manifest_reader(
		&self,
		input: Box<dyn Read + Send>,
		args: &[String],
	) -> Result<ManifestReader, ProviderError> {
		// The namespace and the mapper must come from the same factory so
		// that enforcement and type resolution agree on the invocation
		// context.
		let (namespace, enforce_namespace) = self.factory.namespace()?;
		let mapper = self.factory.rest_mapper().await?;

		let options = ReaderOptions {
			mapper,
			namespace,
			enforce_namespace,
		};

		let reader = match args.first() {
			None => ManifestReader::stream("stdin", input, options),
			Some(path) => ManifestReader::path(path, options),
		};
		Ok(reader)
	}
}
