// Registry resolution
//
// Turns a parsed `RegistryDoc` into the immutable `ResolvedRegistry` the
// call path consults. Resolution walks every tool's source chain, late-binds
// overridable fields, merges defaults and hidden fields, enforces the
// registry invariants, and precompiles everything that can be precompiled:
// advertised schemas and output projection plans. After this step the
// document types are never touched again.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::error::RegistryError;
use super::interpolate::{interpolate_str, interpolate_value};
use super::types::{
	RegistryDoc, ServerDef, ServerEndpoint, ServerRef, ToolDef, ValidationMode,
};
use crate::projection::{strip_source_fields, ProjectionPlan};

/// Source chains longer than this are assumed to be cyclic even if the
/// cycle check misses them.
const MAX_CHAIN_DEPTH: usize = 64;

/// A fully resolved tool, immutable for the life of the process.
#[derive(Debug)]
pub struct ResolvedTool {
	/// Name clients call
	pub exposed_name: String,
	/// Server the upstream call is dispatched on
	pub backend_name: String,
	/// Tool name at the upstream server
	pub upstream_name: String,
	pub description: Option<String>,
	pub version: Option<String>,
	/// Effective input schema as declared in the registry, `$ref`-expanded,
	/// before hiding. `None` when no schema is declared anywhere in the
	/// chain (the upstream-reported schema is used for advertising then).
	pub declared_input_schema: Option<Value>,
	/// Client-facing input schema: declared schema minus hidden and
	/// defaulted fields
	pub advertised_input_schema: Option<Value>,
	/// Client-facing output schema with `source_field` stripped
	pub advertised_output_schema: Option<Value>,
	/// Arguments injected at call time, fully flattened across the chain
	pub effective_defaults: Map<String, Value>,
	/// Hidden argument names, merged across the chain
	pub hide_fields: BTreeSet<String>,
	/// Compiled output projection, if an output schema was declared
	pub projection: Option<ProjectionPlan>,
	/// Expected upstream contract hash, from the chain root
	pub expected_schema_hash: Option<String>,
	/// How drift and pin mismatches are handled for this tool
	pub validation_mode: ValidationMode,
}

impl ResolvedTool {
	/// Strip hidden and defaulted fields from an input schema. Used both at
	/// resolution time (declared schemas) and at startup surface assembly
	/// (upstream-reported schemas for tools that declare none).
	pub fn advertise_input_schema(&self, schema: &Value) -> Value {
		advertise_schema(schema, &self.hide_fields, &self.effective_defaults)
	}
}

/// The resolved registry: a read-only map from exposed name to tool, plus
/// the unified server definitions.
#[derive(Debug)]
pub struct ResolvedRegistry {
	tools: HashMap<String, Arc<ResolvedTool>>,
	/// Document order of exposed names, for a stable tool surface
	order: Vec<String>,
	servers: Vec<ServerDef>,
	server_index: HashMap<String, usize>,
}

impl ResolvedRegistry {
	/// Resolve a normalized registry document. Any invariant violation is
	/// fatal; the caller maps it to exit code 1.
	pub fn resolve(doc: RegistryDoc) -> Result<Self, RegistryError> {
		// Phase 1: structural checks that need no resolution.
		let mut seen = HashSet::new();
		for server in &doc.servers {
			if !seen.insert(server.name.as_str()) {
				return Err(RegistryError::DuplicateServerName(server.name.clone()));
			}
		}
		let mut seen = HashSet::new();
		for tool in &doc.tools {
			if !seen.insert(tool.name.as_str()) {
				return Err(RegistryError::DuplicateToolName(tool.name.clone()));
			}
			match (&tool.server, &tool.source) {
				(Some(_), None) | (None, Some(_)) => {},
				_ => return Err(RegistryError::AmbiguousBinding(tool.name.clone())),
			}
		}

		// Phase 2: environment interpolation on server definitions.
		let servers: Vec<ServerDef> = doc.servers.iter().map(interpolate_server).collect();
		let server_index: HashMap<String, usize> = servers
			.iter()
			.enumerate()
			.map(|(i, s)| (s.name.clone(), i))
			.collect();

		// Phase 3 runs per tool below: `$ref` expansion happens while the
		// effective schemas are being selected.
		let by_name: HashMap<&str, &ToolDef> =
			doc.tools.iter().map(|t| (t.name.as_str(), t)).collect();

		let mut tools = HashMap::new();
		let mut order = Vec::new();

		for tool in &doc.tools {
			let Some(resolved) =
				resolve_tool(tool, &by_name, &server_index, &doc.schemas)?
			else {
				// Dropped by a strict version pin.
				continue;
			};
			order.push(resolved.exposed_name.clone());
			tools.insert(resolved.exposed_name.clone(), Arc::new(resolved));
		}

		tracing::info!(
			target: "registry",
			tools = tools.len(),
			servers = servers.len(),
			"registry resolved"
		);

		Ok(Self {
			tools,
			order,
			servers,
			server_index,
		})
	}

	/// O(1) lookup by exposed name.
	pub fn get(&self, exposed_name: &str) -> Option<&Arc<ResolvedTool>> {
		self.tools.get(exposed_name)
	}

	/// Resolved tools in document order.
	pub fn tools(&self) -> impl Iterator<Item = &Arc<ResolvedTool>> {
		self.order.iter().filter_map(|name| self.tools.get(name))
	}

	pub fn server(&self, name: &str) -> Option<&ServerDef> {
		self.server_index.get(name).map(|i| &self.servers[*i])
	}

	pub fn servers(&self) -> impl Iterator<Item = &ServerDef> {
		self.servers.iter()
	}

	pub fn len(&self) -> usize {
		self.tools.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}
}

fn interpolate_server(server: &ServerDef) -> ServerDef {
	let mut server = server.clone();
	if let ServerEndpoint::Stdio { stdio } = &mut server.endpoint {
		let context = format!("server '{}'", server.name);
		for arg in &mut stdio.args {
			*arg = interpolate_str(arg, &context);
		}
		for value in stdio.env.values_mut() {
			*value = interpolate_str(value, &context);
		}
	}
	server
}

/// Walk one tool's source chain and build its resolved form. Returns
/// `Ok(None)` when a strict version pin drops the tool.
fn resolve_tool(
	tool: &ToolDef,
	by_name: &HashMap<&str, &ToolDef>,
	server_index: &HashMap<String, usize>,
	schemas: &Map<String, Value>,
) -> Result<Option<ResolvedTool>, RegistryError> {
	// Lineage from the tool itself down to the base tool.
	let mut lineage: Vec<&ToolDef> = vec![tool];
	let mut visited: HashSet<&str> = HashSet::from([tool.name.as_str()]);
	let mut current = tool;
	while let Some(source_name) = current.source.as_deref() {
		let source = by_name
			.get(source_name)
			.copied()
			.ok_or_else(|| RegistryError::UnknownSource {
				tool: current.name.clone(),
				source: source_name.to_string(),
			})?;
		if !visited.insert(source.name.as_str()) {
			let mut cycle: Vec<String> =
				lineage.iter().map(|t| t.name.clone()).collect();
			cycle.push(source.name.clone());
			return Err(RegistryError::SourceCycle(cycle));
		}
		if lineage.len() >= MAX_CHAIN_DEPTH {
			return Err(RegistryError::ChainTooDeep(tool.name.clone()));
		}
		lineage.push(source);
		current = source;
	}
	let base = *lineage.last().expect("lineage contains at least the tool");

	// The base tool binds the backend.
	let backend_name = match &base.server {
		Some(ServerRef::Name(name)) => name.clone(),
		// The loader rewrites inline definitions before resolution.
		Some(ServerRef::Inline(_)) | None => {
			return Err(RegistryError::AmbiguousBinding(base.name.clone()));
		},
	};
	if !server_index.contains_key(&backend_name) {
		return Err(RegistryError::UnknownServer {
			tool: base.name.clone(),
			server: backend_name,
		});
	}

	// Late-binding override: most specific non-null wins.
	let description = lineage.iter().find_map(|t| t.description.clone());
	let version = lineage.iter().find_map(|t| t.version.clone());
	let validation_mode = lineage
		.iter()
		.find_map(|t| t.validation_mode)
		.unwrap_or_default();
	let upstream_name = lineage
		.iter()
		.find_map(|t| t.original_name.clone())
		.unwrap_or_else(|| base.name.clone());

	let declared_input_schema = lineage
		.iter()
		.find_map(|t| t.input_schema.as_ref())
		.map(|s| expand_refs(s, schemas, &mut Vec::new(), &tool.name))
		.transpose()?;
	let output_schema = lineage
		.iter()
		.find_map(|t| t.output_schema.as_ref())
		.map(|s| expand_refs(s, schemas, &mut Vec::new(), &tool.name))
		.transpose()?;

	// Merged sets: ancestors first, descendants override key by key.
	let mut effective_defaults = Map::new();
	for ancestor in lineage.iter().rev() {
		let context = format!("tool '{}'", ancestor.name);
		for (key, value) in &ancestor.defaults {
			effective_defaults.insert(key.clone(), interpolate_value(value, &context));
		}
	}
	let mut hide_fields = BTreeSet::new();
	for ancestor in &lineage {
		hide_fields.extend(ancestor.hide_fields.iter().cloned());
	}

	// Version pin against the direct source's resolved version.
	if let (Some(pin), Some(source_name)) =
		(tool.source_version_pin.as_deref(), tool.source.as_deref())
	{
		let source_version = lineage[1..]
			.iter()
			.find_map(|t| t.version.as_deref())
			.unwrap_or("");
		if pin != source_version {
			match validation_mode {
				ValidationMode::Strict => {
					tracing::warn!(
						target: "registry",
						tool = %tool.name,
						source = source_name,
						pinned = pin,
						found = source_version,
						"source version pin mismatch, dropping tool (strict)"
					);
					return Ok(None);
				},
				ValidationMode::Warn => {
					tracing::warn!(
						target: "registry",
						tool = %tool.name,
						source = source_name,
						pinned = pin,
						found = source_version,
						"source version pin mismatch"
					);
				},
				ValidationMode::Skip => {},
			}
		}
	}

	// Required-field coverage against the chain root's declared schema.
	let chain_root_schema = base
		.input_schema
		.as_ref()
		.map(|s| expand_refs(s, schemas, &mut Vec::new(), &base.name))
		.transpose()?;
	if let Some(root_schema) = &chain_root_schema {
		for field in required_fields(root_schema) {
			if effective_defaults.contains_key(field) {
				continue;
			}
			if hide_fields.contains(field) {
				return Err(RegistryError::HiddenRequiredField {
					tool: tool.name.clone(),
					field: field.to_string(),
				});
			}
			// Without a default the field must stay required in the
			// advertised schema. The advertised `required` array is the
			// declared one minus hidden and defaulted names, and this field
			// is neither, so it survives iff the declared schema still
			// requires it; an overriding descendant schema may have dropped
			// or demoted it.
			let exposed = declared_input_schema
				.as_ref()
				.map(|s| required_fields(s).any(|f| f == field))
				.unwrap_or(false);
			if !exposed {
				return Err(RegistryError::MissingRequiredField {
					tool: tool.name.clone(),
					field: field.to_string(),
				});
			}
		}
	}

	// Compilation: advertised input schema and projection plan.
	let advertised_input_schema = declared_input_schema
		.as_ref()
		.map(|s| advertise_schema(s, &hide_fields, &effective_defaults));

	let (projection, advertised_output_schema) = match &output_schema {
		Some(schema) => {
			let plan = ProjectionPlan::compile(schema).map_err(|source| {
				RegistryError::InvalidProjection {
					tool: tool.name.clone(),
					source,
				}
			})?;
			(Some(plan), Some(strip_source_fields(schema)))
		},
		None => (None, None),
	};

	Ok(Some(ResolvedTool {
		exposed_name: tool.name.clone(),
		backend_name,
		upstream_name,
		description,
		version,
		declared_input_schema,
		advertised_input_schema,
		advertised_output_schema,
		effective_defaults,
		hide_fields,
		projection,
		expected_schema_hash: base.expected_schema_hash.clone(),
		validation_mode,
	}))
}

/// Expand `#/schemas/<name>` references. A `$ref` object is replaced
/// wholesale by the referenced fragment, itself expanded.
fn expand_refs(
	schema: &Value,
	schemas: &Map<String, Value>,
	stack: &mut Vec<String>,
	tool: &str,
) -> Result<Value, RegistryError> {
	match schema {
		Value::Object(obj) => {
			if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
				let Some(name) = reference.strip_prefix("#/schemas/") else {
					return Err(RegistryError::UnknownSchemaRef {
						tool: tool.to_string(),
						reference: reference.to_string(),
					});
				};
				if stack.iter().any(|s| s == name) {
					return Err(RegistryError::SchemaRefCycle(name.to_string()));
				}
				let fragment =
					schemas
						.get(name)
						.ok_or_else(|| RegistryError::UnknownSchemaRef {
							tool: tool.to_string(),
							reference: reference.to_string(),
						})?;
				stack.push(name.to_string());
				let expanded = expand_refs(fragment, schemas, stack, tool)?;
				stack.pop();
				return Ok(expanded);
			}
			let mut out = Map::new();
			for (key, value) in obj {
				out.insert(key.clone(), expand_refs(value, schemas, stack, tool)?);
			}
			Ok(Value::Object(out))
		},
		Value::Array(arr) => Ok(Value::Array(
			arr
				.iter()
				.map(|v| expand_refs(v, schemas, stack, tool))
				.collect::<Result<_, _>>()?,
		)),
		other => Ok(other.clone()),
	}
}

fn required_fields(schema: &Value) -> impl Iterator<Item = &str> {
	schema
		.get("required")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
		.filter_map(Value::as_str)
}

/// Remove hidden and defaulted fields from `properties` and `required`.
fn advertise_schema(
	schema: &Value,
	hidden: &BTreeSet<String>,
	defaults: &Map<String, Value>,
) -> Value {
	let strip = |name: &str| hidden.contains(name) || defaults.contains_key(name);

	let mut schema = schema.clone();
	if let Some(props) = schema
		.get_mut("properties")
		.and_then(Value::as_object_mut)
	{
		props.retain(|name, _| !strip(name));
	}
	if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
		required.retain(|v| v.as_str().map(|name| !strip(name)).unwrap_or(true));
	}
	schema
}
