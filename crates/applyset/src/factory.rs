//! Cluster access configuration: kubeconfig loading, context selection,
//! and client construction.

use std::time::Duration;

use async_trait::async_trait;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use crate::mapper::{DiscoveryError, RestMapper};

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when resolving cluster access configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("kubeconfig has no current context and no context was selected")]
	NoCurrentContext,

	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// A handle supplying cluster access facilities.
///
/// This is the configuration seam of the crate: it yields the client, the
/// invocation namespace, and the REST mapper for one cluster context.
/// Implementations must be immutable after construction; tests substitute
/// doubles that never touch a real cluster.
#[async_trait]
pub trait ClientFactory: Send + Sync {
	/// A client for the cluster this factory is bound to.
	fn client(&self) -> Result<Client, ConfigError>;

	/// Resolve the invocation namespace and the enforce flag.
	///
	/// The flag is true when the namespace came from an explicit override
	/// rather than the kubeconfig context. Manifests read under an enforced
	/// namespace must match it exactly.
	fn namespace(&self) -> Result<(String, bool), ConfigError>;

	/// Build a REST mapper from the cluster's discovery API.
	async fn rest_mapper(&self) -> Result<RestMapper, DiscoveryError>;
}

/// Options for building a [`KubeconfigFactory`].
#[derive(Debug, Clone, Default)]
pub struct FactoryOptions {
	/// Context name to use instead of the kubeconfig's current context.
	pub context: Option<String>,

	/// Namespace override. When set, namespace enforcement is enabled.
	pub namespace: Option<String>,
}

/// A [`ClientFactory`] backed by a kubeconfig context.
#[derive(Clone)]
pub struct KubeconfigFactory {
	client: Client,
	context_name: String,
	context_namespace: Option<String>,
	namespace_override: Option<String>,
}

impl std::fmt::Debug for KubeconfigFactory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KubeconfigFactory")
			.field("context_name", &self.context_name)
			.field("namespace_override", &self.namespace_override)
			.finish_non_exhaustive()
	}
}

impl KubeconfigFactory {
	/// Build a factory from the default kubeconfig locations
	/// (`$KUBECONFIG` or `~/.kube/config`).
	#[instrument(skip_all)]
	pub async fn from_default_kubeconfig(options: FactoryOptions) -> Result<Self, ConfigError> {
		let kubeconfig = Kubeconfig::read()?;
		Self::from_kubeconfig(kubeconfig, options).await
	}

	/// Build a factory from the given kubeconfig.
	///
	/// The context is taken from `options.context` if set, otherwise from
	/// the kubeconfig's `current-context`. The context's namespace is kept
	/// for later resolution via [`ClientFactory::namespace`].
	#[instrument(skip_all)]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		options: FactoryOptions,
	) -> Result<Self, ConfigError> {
		let context_name = match options.context {
			Some(name) => name,
			None => kubeconfig
				.current_context
				.clone()
				.ok_or(ConfigError::NoCurrentContext)?,
		};

		let named = kubeconfig
			.contexts
			.iter()
			.find(|c| c.name == context_name)
			.ok_or_else(|| ConfigError::ContextNotFound(context_name.clone()))?;
		let context_namespace = named.context.as_ref().and_then(|c| c.namespace.clone());

		tracing::debug!(context = %context_name, "using kubeconfig context");

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(context_name.clone()),
				..Default::default()
			},
		)
		.await?;
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);

		let client = Client::try_from(config)?;

		Ok(Self {
			client,
			context_name,
			context_namespace,
			namespace_override: options.namespace,
		})
	}

	/// Name of the kubeconfig context this factory is bound to.
	pub fn context_name(&self) -> &str {
		&self.context_name
	}
}

#[async_trait]
impl ClientFactory for KubeconfigFactory {
	fn client(&self) -> Result<Client, ConfigError> {
		Ok(self.client.clone())
	}

	fn namespace(&self) -> Result<(String, bool), ConfigError> {
		match &self.namespace_override {
			Some(ns) => Ok((ns.clone(), true)),
			None => {
				let ns = self
					.context_namespace
					.clone()
					.unwrap_or_else(|| "default".to_string());
				Ok((ns, false))
			}
		}
	}

	async fn rest_mapper(&self) -> Result<RestMapper, DiscoveryError> {
		RestMapper::discover(&self.client).await
	}
}
