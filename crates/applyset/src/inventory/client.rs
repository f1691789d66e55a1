//! Cluster client for reading and writing the inventory storage object.

use kube::{
	api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams},
	Client,
};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use super::{InventoryError, InventoryInfo, InventoryToStorageFn, ObjMetadata, WrapInventoryFn};
use crate::{
	factory::{ClientFactory, ConfigError},
	mapper::{gvk_from_manifest, ResourceScope, RestMapper},
};

/// Errors that can occur on inventory cluster operations.
#[derive(Debug, Error)]
pub enum InventoryClientError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Inventory(#[from] InventoryError),

	#[error("inventory storage object missing apiVersion or kind")]
	MissingStorageType,

	#[error("inventory storage type {api_version}/{kind} is not known to the cluster")]
	UnknownStorageType { api_version: String, kind: String },

	#[error("fetching inventory {name}")]
	Fetch {
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("storing inventory {name}")]
	Store {
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("deleting inventory {name}")]
	Delete {
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("converting inventory storage object")]
	StorageConversion(#[source] serde_json::Error),
}

/// Client for the persisted inventory object.
///
/// The storage representation is decided by the two injected strategies:
/// one reads the tracked set out of a storage object, the other
/// materializes an inventory into a storable resource. The default pair
/// stores the set as ConfigMap data keys.
pub struct InventoryClient {
	client: Client,
	wrap: WrapInventoryFn,
	to_storage: InventoryToStorageFn,
}

impl std::fmt::Debug for InventoryClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InventoryClient").finish_non_exhaustive()
	}
}

impl InventoryClient {
	/// Construct a client from the factory plus storage strategies.
	///
	/// Errors from the factory's client construction are propagated
	/// unchanged.
	pub fn new(
		factory: &dyn ClientFactory,
		wrap: WrapInventoryFn,
		to_storage: InventoryToStorageFn,
	) -> Result<Self, InventoryClientError> {
		Ok(Self {
			client: factory.client()?,
			wrap,
			to_storage,
		})
	}

	/// Read the tracked object set from the cluster.
	///
	/// An absent storage object yields an empty set.
	#[instrument(skip(self, mapper), fields(name = %inv.name))]
	pub async fn load(
		&self,
		inv: &InventoryInfo,
		mapper: &RestMapper,
	) -> Result<Vec<ObjMetadata>, InventoryClientError> {
		let storage = (self.to_storage)(inv, &[]);
		let api = self.storage_api(&storage, mapper)?;

		match api.get(&inv.name).await {
			Ok(obj) => {
				let value =
					serde_json::to_value(&obj).map_err(InventoryClientError::StorageConversion)?;
				Ok((self.wrap)(&value)?)
			}
			Err(kube::Error::Api(ref err)) if err.code == 404 => {
				tracing::debug!(name = %inv.name, "no inventory stored yet");
				Ok(Vec::new())
			}
			Err(e) => Err(InventoryClientError::Fetch {
				name: inv.name.clone(),
				source: Box::new(e),
			}),
		}
	}

	/// Store the tracked object set, creating the storage object if absent.
	///
	/// Existing entries are kept: a store merges into the current set.
	#[instrument(skip(self, objs, mapper), fields(name = %inv.name, count = objs.len()))]
	pub async fn store(
		&self,
		inv: &InventoryInfo,
		objs: &[ObjMetadata],
		mapper: &RestMapper,
	) -> Result<(), InventoryClientError> {
		let desired = (self.to_storage)(inv, objs);
		let api = self.storage_api(&desired, mapper)?;

		let result = api
			.patch(&inv.name, &PatchParams::default(), &Patch::Merge(&desired))
			.await;

		match result {
			Ok(_) => Ok(()),
			Err(kube::Error::Api(ref err)) if err.code == 404 => {
				let obj: DynamicObject = serde_json::from_value(desired)
					.map_err(InventoryClientError::StorageConversion)?;

				api.create(&PostParams::default(), &obj)
					.await
					.map_err(|e| InventoryClientError::Store {
						name: inv.name.clone(),
						source: Box::new(e),
					})?;
				Ok(())
			}
			Err(e) => Err(InventoryClientError::Store {
				name: inv.name.clone(),
				source: Box::new(e),
			}),
		}
	}

	/// Delete the inventory storage object. An absent object is not an
	/// error.
	#[instrument(skip(self, mapper), fields(name = %inv.name))]
	pub async fn delete(
		&self,
		inv: &InventoryInfo,
		mapper: &RestMapper,
	) -> Result<(), InventoryClientError> {
		let storage = (self.to_storage)(inv, &[]);
		let api = self.storage_api(&storage, mapper)?;

		match api.delete(&inv.name, &DeleteParams::default()).await {
			Ok(_) => Ok(()),
			Err(kube::Error::Api(ref err)) if err.code == 404 => Ok(()),
			Err(e) => Err(InventoryClientError::Delete {
				name: inv.name.clone(),
				source: Box::new(e),
			}),
		}
	}

	/// Resolve the dynamic API for a materialized storage object.
	fn storage_api(
		&self,
		storage: &Value,
		mapper: &RestMapper,
	) -> Result<Api<DynamicObject>, InventoryClientError> {
		let gvk = gvk_from_manifest(storage).ok_or(InventoryClientError::MissingStorageType)?;
		let mapping =
			mapper
				.lookup(&gvk)
				.ok_or_else(|| InventoryClientError::UnknownStorageType {
					api_version: gvk.api_version(),
					kind: gvk.kind.clone(),
				})?;

		let api = match mapping.scope {
			ResourceScope::Namespaced => {
				let namespace = storage
					.pointer("/metadata/namespace")
					.and_then(Value::as_str)
					.unwrap_or("default");
				Api::namespaced_with(self.client.clone(), namespace, &mapping.api_resource)
			}
			ResourceScope::ClusterWide => {
				Api::all_with(self.client.clone(), &mapping.api_resource)
			}
		};
		Ok(api)
	}
}
