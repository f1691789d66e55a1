//! Manifest readers: producing ordered sequences of resource objects from
//! a stream or a filesystem path.

use std::{
	fmt,
	io::Read,
	path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;
use walkdir::WalkDir;

use crate::mapper::{gvk_from_manifest, ResourceScope, RestMapper};

/// Errors that can occur while reading manifests.
#[derive(Debug, Error)]
pub enum ReaderError {
	#[error("reading manifests from {source_name}")]
	Io {
		source_name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("walking manifest directory {path}")]
	Walk {
		path: String,
		#[source]
		source: walkdir::Error,
	},

	#[error("parsing YAML from {source_name}")]
	Parse {
		source_name: String,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("manifest document is not an object: {0}")]
	NotAnObject(String),

	#[error("manifest missing apiVersion or kind")]
	MissingTypeMeta,

	#[error("unknown resource type {api_version}/{kind} for {name}")]
	UnknownResourceType {
		api_version: String,
		kind: String,
		name: String,
	},

	#[error(
		"namespace mismatch for {kind}/{name}: manifest says {found}, invocation requires {required}"
	)]
	NamespaceMismatch {
		kind: String,
		name: String,
		found: String,
		required: String,
	},
}

/// Options shared by all manifest readers.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
	/// Resolver for resource scope decisions.
	pub mapper: RestMapper,
	/// Default namespace for namespaced resources that carry none.
	pub namespace: String,
	/// When true, namespaced resources must match `namespace` exactly.
	pub enforce_namespace: bool,
}

/// A manifest source producing an ordered sequence of resource objects.
///
/// The two variants differ only in where documents come from; the
/// consumption contract is the same.
pub enum ManifestReader {
	/// Documents come from an in-memory stream, e.g. standard input.
	Stream {
		/// Diagnostic label for the stream, e.g. `"stdin"`.
		source: String,
		input: Box<dyn Read + Send>,
		options: ReaderOptions,
	},

	/// Documents come from a file or directory on disk.
	Path {
		path: PathBuf,
		options: ReaderOptions,
	},
}

impl fmt::Debug for ManifestReader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Stream { source, .. } => f
				.debug_struct("Stream")
				.field("source", source)
				.finish_non_exhaustive(),
			Self::Path { path, .. } => f
				.debug_struct("Path")
				.field("path", path)
				.finish_non_exhaustive(),
		}
	}
}

impl ManifestReader {
	/// Create a stream-backed reader.
	pub fn stream(
		source: impl Into<String>,
		input: Box<dyn Read + Send>,
		options: ReaderOptions,
	) -> Self {
		Self::Stream {
			source: source.into(),
			input,
			options,
		}
	}

	/// Create a path-backed reader for a manifest file or directory.
	pub fn path(path: impl Into<PathBuf>, options: ReaderOptions) -> Self {
		Self::Path {
			path: path.into(),
			options,
		}
	}

	/// Diagnostic name of the source.
	pub fn source_name(&self) -> String {
		match self {
			Self::Stream { source, .. } => source.clone(),
			Self::Path { path, .. } => path.display().to_string(),
		}
	}

	/// The options the reader was built with.
	pub fn options(&self) -> &ReaderOptions {
		match self {
			Self::Stream { options, .. } => options,
			Self::Path { options, .. } => options,
		}
	}

	/// Read all documents from the source and resolve their namespaces.
	///
	/// `List` kinds are flattened and empty documents skipped; document
	/// order is preserved.
	#[instrument(skip(self), fields(source = %self.source_name()))]
	pub fn read(self) -> Result<Vec<Value>, ReaderError> {
		let (mut objs, options) = match self {
			Self::Stream {
				source,
				mut input,
				options,
			} => {
				let mut buf = String::new();
				input.read_to_string(&mut buf).map_err(|e| ReaderError::Io {
					source_name: source.clone(),
					source: e,
				})?;
				(parse_documents(&buf, &source)?, options)
			}
			Self::Path { path, options } => (read_path(&path)?, options),
		};

		resolve_namespaces(&mut objs, &options)?;
		tracing::debug!(count = objs.len(), "read manifests");
		Ok(objs)
	}
}

/// Parse a multi-document YAML string into resource objects.
fn parse_documents(input: &str, source_name: &str) -> Result<Vec<Value>, ReaderError> {
	let mut objs = Vec::new();
	for document in serde_yaml::Deserializer::from_str(input) {
		let value = Value::deserialize(document).map_err(|e| ReaderError::Parse {
			source_name: source_name.to_string(),
			source: e,
		})?;
		collect_objects(value, &mut objs)?;
	}
	Ok(objs)
}

/// Collect resource objects from a parsed document, flattening `List`
/// kinds and skipping empty documents.
fn collect_objects(value: Value, out: &mut Vec<Value>) -> Result<(), ReaderError> {
	match value {
		Value::Null => {}
		Value::Array(items) => {
			for item in items {
				collect_objects(item, out)?;
			}
		}
		Value::Object(mut map) => {
			if map.get("kind").and_then(Value::as_str) == Some("List") {
				if let Some(Value::Array(items)) = map.remove("items") {
					for item in items {
						collect_objects(item, out)?;
					}
				}
			} else {
				out.push(Value::Object(map));
			}
		}
		other => return Err(ReaderError::NotAnObject(other.to_string())),
	}
	Ok(())
}

/// Read manifests from a file, or from every manifest file under a
/// directory in sorted order.
fn read_path(path: &Path) -> Result<Vec<Value>, ReaderError> {
	let mut files = Vec::new();
	if path.is_dir() {
		for entry in WalkDir::new(path).sort_by_file_name() {
			let entry = entry.map_err(|e| ReaderError::Walk {
				path: path.display().to_string(),
				source: e,
			})?;
			if entry.file_type().is_file() && is_manifest_file(entry.path()) {
				files.push(entry.into_path());
			}
		}
	} else {
		files.push(path.to_path_buf());
	}

	let mut objs = Vec::new();
	for file in files {
		let source_name = file.display().to_string();
		let content = std::fs::read_to_string(&file).map_err(|e| ReaderError::Io {
			source_name: source_name.clone(),
			source: e,
		})?;
		objs.extend(parse_documents(&content, &source_name)?);
	}
	Ok(objs)
}

/// Returns true for file extensions the path reader consumes.
fn is_manifest_file(path: &Path) -> bool {
	matches!(
		path.extension().and_then(|e| e.to_str()),
		Some("yaml" | "yml" | "json")
	)
}

/// Default and validate namespaces against the invocation context.
///
/// Namespaced resources without a namespace get the default one. Under
/// enforcement, a namespaced resource carrying a different namespace is
/// rejected.
fn resolve_namespaces(objs: &mut [Value], options: &ReaderOptions) -> Result<(), ReaderError> {
	for obj in objs.iter_mut() {
		let gvk = gvk_from_manifest(obj).ok_or(ReaderError::MissingTypeMeta)?;
		let name = obj
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.unwrap_or("")
			.to_string();

		let mapping =
			options
				.mapper
				.lookup(&gvk)
				.ok_or_else(|| ReaderError::UnknownResourceType {
					api_version: gvk.api_version(),
					kind: gvk.kind.clone(),
					name: name.clone(),
				})?;

		match mapping.scope {
			ResourceScope::ClusterWide => {}
			ResourceScope::Namespaced => {
				let found = obj
					.pointer("/metadata/namespace")
					.and_then(Value::as_str)
					.unwrap_or("")
					.to_string();

				if found.is_empty() {
					set_namespace(obj, &options.namespace);
				} else if options.enforce_namespace && found != options.namespace {
					return Err(ReaderError::NamespaceMismatch {
						kind: gvk.kind.clone(),
						name,
						found,
						required: options.namespace.clone(),
					});
				}
			}
		}
	}
	Ok(())
}

/// Set metadata.namespace on a manifest, creating metadata if missing.
fn set_namespace(obj: &mut Value, namespace: &str) {
	let Value::Object(map) = obj else { return };

	let metadata = map
		.entry("metadata")
		.or_insert_with(|| Value::Object(Default::default()));
	if let Value::Object(metadata) = metadata {
		metadata.insert(
			"namespace".to_string(),
			Value::String(namespace.to_string()),
		);
	}
}
