//! End-to-end provider flow against the HTTP mock server.

use std::{io::Cursor, sync::Arc};

use applyset::{
	factory::{ClientFactory, FactoryOptions, KubeconfigFactory},
	inventory::{ObjMetadata, INVENTORY_LABEL},
	manifest::ManifestReader,
	provider::{ConfigMapProvider, Provider},
};
use assert_matches::assert_matches;
use indoc::indoc;
use k8s_mock::{HttpMockK8sServer, RunningHttpMockK8sServer};
use serde_json::Value;

async fn setup() -> (RunningHttpMockK8sServer, ConfigMapProvider) {
	let server = HttpMockK8sServer::builder().build().start().await;

	let factory = KubeconfigFactory::from_kubeconfig(server.kubeconfig(), FactoryOptions::default())
		.await
		.expect("factory should build");
	let provider = ConfigMapProvider::new(Arc::new(factory) as Arc<dyn ClientFactory>);

	(server, provider)
}

#[tokio::test]
async fn test_stream_flow_reads_and_defaults_namespace() {
	let (_server, provider) = setup().await;

	let input = indoc! {"
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: app
		---
		apiVersion: apps/v1
		kind: Deployment
		metadata:
		  name: web
		  namespace: prod
	"};

	let reader = provider
		.manifest_reader(Box::new(input.as_bytes()), &[])
		.await
		.unwrap();
	assert_matches!(&reader, ManifestReader::Stream { .. });
	assert_eq!(reader.source_name(), "stdin");
	// Namespace comes from the kubeconfig context of the same factory
	assert_eq!(reader.options().namespace, "default");

	let objs = reader.read().unwrap();
	assert_eq!(objs.len(), 2);
	assert_eq!(
		objs[0].pointer("/metadata/namespace").and_then(Value::as_str),
		Some("default")
	);
	assert_eq!(
		objs[1].pointer("/metadata/namespace").and_then(Value::as_str),
		Some("prod")
	);
}

#[tokio::test]
async fn test_path_flow_reads_directory_in_order() {
	let (_server, provider) = setup().await;

	let dir = tempfile::tempdir().unwrap();
	std::fs::write(
		dir.path().join("01-app.yaml"),
		"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n",
	)
	.unwrap();
	std::fs::write(
		dir.path().join("02-web.yaml"),
		"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n",
	)
	.unwrap();
	std::fs::write(dir.path().join("README.md"), "not a manifest\n").unwrap();

	let args = vec![
		dir.path().to_str().unwrap().to_string(),
		"ignored-extra-arg".to_string(),
	];
	let reader = provider
		.manifest_reader(Box::new(Cursor::new(Vec::new())), &args)
		.await
		.unwrap();
	assert_matches!(
		&reader,
		ManifestReader::Path { path, .. } if path == dir.path()
	);

	let objs = reader.read().unwrap();
	let names: Vec<_> = objs
		.iter()
		.filter_map(|o| o.pointer("/metadata/name").and_then(Value::as_str))
		.collect();
	assert_eq!(names, vec!["app", "web"]);
}

#[tokio::test]
async fn test_split_and_inventory_round_trip() {
	let (server, provider) = setup().await;

	let input = indoc! {"
		apiVersion: v1
		kind: ConfigMap
		metadata:
		  name: inventory
		  labels:
		    applyset.dev/inventory-id: id-1
		---
		apiVersion: apps/v1
		kind: Deployment
		metadata:
		  name: web
	"};

	let reader = provider
		.manifest_reader(Box::new(input.as_bytes()), &[])
		.await
		.unwrap();
	let objs = reader.read().unwrap();

	let (info, regular) = provider.split_inventory(objs).unwrap();
	let info = info.expect("inventory object should be detected");
	assert_eq!(info.name, "inventory");
	assert_eq!(info.id, "id-1");
	assert_eq!(regular.len(), 1);

	let tracked: Vec<ObjMetadata> = regular
		.iter()
		.map(|o| ObjMetadata::from_manifest(o).unwrap())
		.collect();

	let client = provider.inventory_client().unwrap();
	let mapper = provider.rest_mapper().await.unwrap();

	client.store(&info, &tracked, &mapper).await.unwrap();

	let stored = server
		.resource("/api/v1/namespaces/default/configmaps", "inventory")
		.expect("inventory should be persisted");
	assert_eq!(
		stored
			.pointer("/metadata/labels")
			.and_then(|l| l.get(INVENTORY_LABEL))
			.and_then(Value::as_str),
		Some("id-1")
	);

	let loaded = client.load(&info, &mapper).await.unwrap();
	assert_eq!(loaded, tracked);
}
