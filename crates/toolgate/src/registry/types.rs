// Registry document model
//
// These types mirror the on-disk registry JSON. They are inputs only: the
// call path never touches them. A single resolution step turns a
// `RegistryDoc` into the immutable `ResolvedRegistry` (see resolve.rs).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parsed registry document.
///
/// Unknown top-level keys are rejected outright; a typo'd section name is a
/// configuration bug, not something to tolerate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistryDoc {
	/// Schema version for compatibility
	#[serde(default = "default_schema_version")]
	pub schema_version: String,

	/// Backend server definitions (absent in the legacy inline variant)
	#[serde(default)]
	pub servers: Vec<ServerDef>,

	/// Named schema fragments, referenced as `#/schemas/<name>`
	#[serde(default)]
	pub schemas: Map<String, Value>,

	/// Tool definitions, base and virtual, in document order
	#[serde(default)]
	pub tools: Vec<ToolDef>,
}

fn default_schema_version() -> String {
	"1.0".to_string()
}

/// A backend MCP server definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDef {
	/// Unique server name, referenced by base tools
	pub name: String,

	#[serde(default)]
	pub description: String,

	/// Exactly one of the stdio or remote forms
	#[serde(flatten)]
	pub endpoint: ServerEndpoint,
}

/// How to reach a backend: a spawned subprocess or a remote URL.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerEndpoint {
	Stdio {
		stdio: StdioSpec,
	},
	Remote {
		url: String,
		transport: RemoteTransport,
		#[serde(default)]
		auth: AuthMode,
	},
}

/// Subprocess launch spec for a stdio backend.
///
/// `env` is a sorted map so the canonical fingerprint does not depend on
/// declaration order.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StdioSpec {
	pub command: String,

	#[serde(default)]
	pub args: Vec<String>,

	#[serde(default)]
	pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RemoteTransport {
	#[serde(rename = "sse")]
	Sse,
	#[serde(rename = "streamableHttp")]
	StreamableHttp,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum AuthMode {
	#[serde(rename = "none")]
	#[default]
	None,
	#[serde(rename = "oauth")]
	Oauth,
}

/// A tool definition: a base tool (has `server`) or a virtual tool
/// (has `source` pointing at another tool in the same document).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDef {
	/// Name exposed to clients (unique within the document)
	pub name: String,

	/// Backend reference: a server name, or an inline stdio definition in
	/// the legacy registry variant
	#[serde(default)]
	pub server: Option<ServerRef>,

	/// Name of the tool this one derives from
	#[serde(default)]
	pub source: Option<String>,

	/// Tool name on the upstream server (defaults to `name` for base
	/// tools, inherited otherwise)
	#[serde(default)]
	pub original_name: Option<String>,

	#[serde(default)]
	pub description: Option<String>,

	/// Input schema override (JSON Schema, may use `#/schemas/` refs)
	#[serde(default)]
	pub input_schema: Option<Value>,

	/// Output schema annotated with `source_field` path expressions
	#[serde(default)]
	pub output_schema: Option<Value>,

	/// Arguments injected at call time (supports `${VAR}` substitution)
	#[serde(default)]
	pub defaults: Map<String, Value>,

	/// Fields removed from the advertised schema
	#[serde(default)]
	pub hide_fields: Vec<String>,

	/// Semantic version of this tool definition
	#[serde(default)]
	pub version: Option<String>,

	/// Expected hash of the upstream tool's contract, checked once the
	/// backend session is ready
	#[serde(default)]
	pub expected_schema_hash: Option<String>,

	/// How hash drift and version-pin mismatches are handled
	#[serde(default)]
	pub validation_mode: Option<ValidationMode>,

	/// Required version of the direct source tool
	#[serde(default)]
	pub source_version_pin: Option<String>,
}

/// Server reference on a base tool. The unified variant uses a name; the
/// legacy variant inlines the stdio definition on the tool itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServerRef {
	Name(String),
	Inline(StdioSpec),
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ValidationMode {
	/// Mismatch disables the tool
	Strict,
	/// Mismatch is logged and the tool kept
	#[default]
	Warn,
	/// Mismatch is ignored
	Skip,
}

impl RegistryDoc {
	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}

	pub fn len(&self) -> usize {
		self.tools.len()
	}
}

impl ToolDef {
	/// Create a base tool bound to a named server.
	pub fn base(name: impl Into<String>, server: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			server: Some(ServerRef::Name(server.into())),
			source: None,
			original_name: None,
			description: None,
			input_schema: None,
			output_schema: None,
			defaults: Map::new(),
			hide_fields: Vec::new(),
			version: None,
			expected_schema_hash: None,
			validation_mode: None,
			source_version_pin: None,
		}
	}

	/// Create a virtual tool deriving from another tool.
	pub fn derive(name: impl Into<String>, source: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			server: None,
			source: Some(source.into()),
			original_name: None,
			description: None,
			input_schema: None,
			output_schema: None,
			defaults: Map::new(),
			hide_fields: Vec::new(),
			version: None,
			expected_schema_hash: None,
			validation_mode: None,
			source_version_pin: None,
		}
	}

	/// Builder: set the upstream tool name
	pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
		self.original_name = Some(name.into());
		self
	}

	/// Builder: set description
	pub fn with_description(mut self, desc: impl Into<String>) -> Self {
		self.description = Some(desc.into());
		self
	}

	/// Builder: set the input schema
	pub fn with_input_schema(mut self, schema: Value) -> Self {
		self.input_schema = Some(schema);
		self
	}

	/// Builder: set the output schema
	pub fn with_output_schema(mut self, schema: Value) -> Self {
		self.output_schema = Some(schema);
		self
	}

	/// Builder: add a default value
	pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
		self.defaults.insert(key.into(), value);
		self
	}

	/// Builder: hide fields from the advertised schema
	pub fn with_hidden_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.hide_fields
			.extend(fields.into_iter().map(Into::into));
		self
	}

	/// Builder: set the tool version
	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}
}

impl ServerDef {
	/// Create a stdio server definition.
	pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			description: String::new(),
			endpoint: ServerEndpoint::Stdio {
				stdio: StdioSpec {
					command: command.into(),
					args: Vec::new(),
					env: BTreeMap::new(),
				},
			},
		}
	}

	/// Create a remote server definition.
	pub fn remote(
		name: impl Into<String>,
		url: impl Into<String>,
		transport: RemoteTransport,
	) -> Self {
		Self {
			name: name.into(),
			description: String::new(),
			endpoint: ServerEndpoint::Remote {
				url: url.into(),
				transport,
				auth: AuthMode::None,
			},
		}
	}
}
