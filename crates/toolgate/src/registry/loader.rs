// Registry loading
//
// Reads the registry document from disk and normalizes the legacy inline
// variant (base tools carrying their own `server: {command, args, env}`
// object) into the unified servers + tools form before resolution. Identical
// inline definitions collapse to one synthesized server so the session
// manager sees them as a single backend.

use std::collections::HashMap;
use std::path::Path;

use super::error::RegistryError;
use super::resolve::ResolvedRegistry;
use super::types::{RegistryDoc, ServerDef, ServerEndpoint, ServerRef};
use crate::upstream::fingerprint::endpoint_fingerprint;

/// Load, normalize, and resolve a registry file.
pub fn load_registry(path: &Path) -> Result<ResolvedRegistry, RegistryError> {
	tracing::info!(target: "registry", path = %path.display(), "loading registry");
	let content = std::fs::read_to_string(path)?;
	let doc = parse_registry(&content)?;
	ResolvedRegistry::resolve(doc)
}

/// Parse a registry document and normalize legacy inline servers.
pub fn parse_registry(content: &str) -> Result<RegistryDoc, RegistryError> {
	let doc: RegistryDoc = serde_json::from_str(content)?;
	Ok(normalize(doc))
}

/// Rewrite every inline server reference into a named server definition.
fn normalize(mut doc: RegistryDoc) -> RegistryDoc {
	let mut synthesized: HashMap<String, String> = HashMap::new();

	for tool in &mut doc.tools {
		let Some(ServerRef::Inline(spec)) = &tool.server else {
			continue;
		};
		let endpoint = ServerEndpoint::Stdio {
			stdio: spec.clone(),
		};
		let fingerprint = endpoint_fingerprint(&endpoint);
		let name = synthesized
			.entry(fingerprint.clone())
			.or_insert_with(|| {
				let name = format!("inline-{}", &fingerprint[..8]);
				doc.servers.push(ServerDef {
					name: name.clone(),
					description: format!("inline server for tool '{}'", tool.name),
					endpoint,
				});
				tracing::debug!(
					target: "registry",
					tool = %tool.name,
					server = %name,
					"converted legacy inline server"
				);
				name
			})
			.clone();
		tool.server = Some(ServerRef::Name(name));
	}

	doc
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;
	use crate::registry::types::ServerRef;

	const LEGACY: &str = r#"{
		"schemaVersion": "1.0",
		"tools": [
			{
				"name": "fetch_forecast",
				"server": {"command": "weather-mcp", "args": ["--local"]}
			},
			{
				"name": "fetch_tides",
				"server": {"command": "weather-mcp", "args": ["--local"]}
			},
			{
				"name": "lookup_entity",
				"server": {"command": "memory-mcp"}
			}
		]
	}"#;

	#[test]
	fn test_legacy_conversion_synthesizes_servers() {
		let doc = parse_registry(LEGACY).unwrap();
		// Two distinct inline definitions -> two servers.
		assert_eq!(doc.servers.len(), 2);
		for tool in &doc.tools {
			assert!(matches!(tool.server, Some(ServerRef::Name(_))));
		}
	}

	#[test]
	fn test_identical_inline_definitions_share_a_server() {
		let doc = parse_registry(LEGACY).unwrap();
		let name_of = |tool: &str| {
			let t = doc.tools.iter().find(|t| t.name == tool).unwrap();
			match &t.server {
				Some(ServerRef::Name(n)) => n.clone(),
				_ => panic!("expected named server"),
			}
		};
		assert_eq!(name_of("fetch_forecast"), name_of("fetch_tides"));
		assert_ne!(name_of("fetch_forecast"), name_of("lookup_entity"));
	}

	#[test]
	fn test_legacy_registry_resolves() {
		let doc = parse_registry(LEGACY).unwrap();
		let resolved = ResolvedRegistry::resolve(doc).unwrap();
		assert_eq!(resolved.len(), 3);
		let tool = resolved.get("fetch_forecast").unwrap();
		assert!(tool.backend_name.starts_with("inline-"));
	}

	#[test]
	fn test_unified_registry_untouched() {
		let unified = r#"{
			"schemaVersion": "1.0",
			"servers": [
				{"name": "weather", "description": "", "stdio": {"command": "weather-mcp"}}
			],
			"tools": [
				{"name": "fetch_forecast", "server": "weather"}
			]
		}"#;
		let doc = parse_registry(unified).unwrap();
		assert_eq!(doc.servers.len(), 1);
		assert_eq!(doc.servers[0].name, "weather");
	}

	#[test]
	fn test_load_registry_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file
			.write_all(
				br#"{
					"schemaVersion": "1.0",
					"servers": [
						{"name": "weather", "stdio": {"command": "weather-mcp"}}
					],
					"tools": [
						{"name": "fetch_forecast", "server": "weather"}
					]
				}"#,
			)
			.unwrap();

		let resolved = load_registry(file.path()).unwrap();
		assert_eq!(resolved.len(), 1);
	}

	#[test]
	fn test_load_registry_missing_file() {
		let err = load_registry(Path::new("/nonexistent/registry.json")).unwrap_err();
		assert!(matches!(err, RegistryError::IoError(_)));
	}

	#[test]
	fn test_malformed_json() {
		assert!(matches!(
			parse_registry("{not json"),
			Err(RegistryError::ParseError(_))
		));
	}
}
