// Registry error types

use thiserror::Error;

use crate::projection::ProjectionError;

/// Errors that can occur while loading or resolving a registry. Every one
/// of these is fatal at startup (exit code 1): the process never serves a
/// partially valid registry.
#[derive(Error, Debug)]
pub enum RegistryError {
	#[error("failed to parse registry: {0}")]
	ParseError(#[from] serde_json::Error),

	#[error("failed to read registry file: {0}")]
	IoError(#[from] std::io::Error),

	#[error("duplicate tool name: '{0}'")]
	DuplicateToolName(String),

	#[error("duplicate server name: '{0}'")]
	DuplicateServerName(String),

	#[error("tool '{0}' must declare exactly one of 'server' or 'source'")]
	AmbiguousBinding(String),

	#[error("tool '{tool}' references unknown server '{server}'")]
	UnknownServer { tool: String, server: String },

	#[error("tool '{tool}' references unknown source tool '{source}'")]
	UnknownSource { tool: String, source: String },

	#[error("source cycle detected: {}", .0.join(" -> "))]
	SourceCycle(Vec<String>),

	#[error("source chain too deep for tool '{0}'")]
	ChainTooDeep(String),

	#[error("unknown schema reference '{reference}' in tool '{tool}'")]
	UnknownSchemaRef { tool: String, reference: String },

	#[error("schema reference cycle through '#/schemas/{0}'")]
	SchemaRefCycle(String),

	#[error("tool '{tool}' has an invalid output schema: {source}")]
	InvalidProjection {
		tool: String,
		#[source]
		source: ProjectionError,
	},

	#[error(
		"tool '{tool}' hides required field '{field}' without providing a default"
	)]
	HiddenRequiredField { tool: String, field: String },

	#[error(
		"tool '{tool}' drops field '{field}' required by its chain root and provides no default"
	)]
	MissingRequiredField { tool: String, field: String },
}
