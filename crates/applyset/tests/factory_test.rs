//! Integration tests for KubeconfigFactory using mock-server kubeconfigs.

use applyset::factory::{ClientFactory, ConfigError, FactoryOptions, KubeconfigFactory};
use assert_matches::assert_matches;
use k8s_mock::HttpMockK8sServer;

#[tokio::test]
async fn test_namespace_from_context() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let kubeconfig = server.kubeconfig_with_context_and_namespace("mock-context", "team-a");

	let factory = KubeconfigFactory::from_kubeconfig(kubeconfig, FactoryOptions::default())
		.await
		.expect("factory should build");

	assert_eq!(factory.context_name(), "mock-context");
	assert_eq!(factory.namespace().unwrap(), ("team-a".to_string(), false));
}

#[tokio::test]
async fn test_namespace_defaults_when_context_has_none() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let mut kubeconfig = server.kubeconfig();
	kubeconfig.contexts[0]
		.context
		.as_mut()
		.expect("context should be set")
		.namespace = None;

	let factory = KubeconfigFactory::from_kubeconfig(kubeconfig, FactoryOptions::default())
		.await
		.expect("factory should build");

	assert_eq!(factory.namespace().unwrap(), ("default".to_string(), false));
}

#[tokio::test]
async fn test_namespace_override_enables_enforcement() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let kubeconfig = server.kubeconfig_with_context_and_namespace("mock-context", "team-a");

	let options = FactoryOptions {
		namespace: Some("ops".to_string()),
		..Default::default()
	};
	let factory = KubeconfigFactory::from_kubeconfig(kubeconfig, options)
		.await
		.expect("factory should build");

	assert_eq!(factory.namespace().unwrap(), ("ops".to_string(), true));
}

#[tokio::test]
async fn test_explicit_context_selection() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let mut kubeconfig = server.kubeconfig_with_context("wanted-context");
	// Stale current-context must lose against an explicit selection
	kubeconfig.current_context = Some("missing-context".to_string());

	let options = FactoryOptions {
		context: Some("wanted-context".to_string()),
		..Default::default()
	};
	let factory = KubeconfigFactory::from_kubeconfig(kubeconfig, options)
		.await
		.expect("factory should build");

	assert_eq!(factory.context_name(), "wanted-context");
}

#[tokio::test]
async fn test_context_not_found() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let kubeconfig = server.kubeconfig();

	let options = FactoryOptions {
		context: Some("nonexistent".to_string()),
		..Default::default()
	};
	let result = KubeconfigFactory::from_kubeconfig(kubeconfig, options).await;

	assert_matches!(
		result,
		Err(ConfigError::ContextNotFound(name)) if name == "nonexistent"
	);
}

#[tokio::test]
async fn test_no_current_context() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let mut kubeconfig = server.kubeconfig();
	kubeconfig.current_context = None;

	let result = KubeconfigFactory::from_kubeconfig(kubeconfig, FactoryOptions::default()).await;

	assert_matches!(result, Err(ConfigError::NoCurrentContext));
}
