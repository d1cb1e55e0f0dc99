// Deferred schema-drift validation
//
// `expectedSchemaHash` cannot be checked until the backend is reachable,
// so validation runs on every Ready transition rather than at load time.
// A strict mismatch disables the affected virtual tools; calls to a
// disabled tool get a deterministic error from the gateway.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rmcp::model::Tool;
use serde_json::Value;

use super::fingerprint::{endpoint_fingerprint, tool_schema_hash};
use crate::registry::resolve::ResolvedRegistry;
use crate::registry::types::ValidationMode;

/// Shared set of exposed names disabled by strict drift validation.
pub type DisabledTools = Arc<RwLock<HashSet<String>>>;

pub struct DriftValidator {
	registry: Arc<ResolvedRegistry>,
	disabled: DisabledTools,
	fingerprint_by_server: HashMap<String, String>,
}

impl DriftValidator {
	pub fn new(registry: Arc<ResolvedRegistry>, disabled: DisabledTools) -> Self {
		let fingerprint_by_server = registry
			.servers()
			.map(|s| (s.name.clone(), endpoint_fingerprint(&s.endpoint)))
			.collect();
		Self {
			registry,
			disabled,
			fingerprint_by_server,
		}
	}

	/// Validate every pinned tool whose backend lives on this session.
	pub fn on_ready(&self, session_fingerprint: &str, upstream_tools: &[Tool]) {
		for tool in self.registry.tools() {
			let Some(expected) = tool.expected_schema_hash.as_deref() else {
				continue;
			};
			let on_this_session = self
				.fingerprint_by_server
				.get(&tool.backend_name)
				.is_some_and(|fp| fp == session_fingerprint);
			if !on_this_session {
				continue;
			}

			let upstream = upstream_tools
				.iter()
				.find(|t| t.name.as_ref() == tool.upstream_name);

			let verdict = match upstream {
				None => Err("upstream tool not found".to_string()),
				Some(up) => {
					let schema = Value::Object(up.input_schema.as_ref().clone());
					let actual = tool_schema_hash(&up.name, up.description.as_deref(), &schema);
					if actual == expected {
						Ok(())
					} else {
						Err(format!("schema hash drift: expected {expected}, got {actual}"))
					}
				},
			};

			match verdict {
				Ok(()) => {
					// Re-enable after a backend comes back with the pinned
					// contract.
					if self.disabled.write().remove(&tool.exposed_name) {
						tracing::info!(
							target: "upstream",
							tool = %tool.exposed_name,
							"schema hash matches again, tool re-enabled"
						);
					}
				},
				Err(reason) => match tool.validation_mode {
					ValidationMode::Strict => {
						tracing::warn!(
							target: "upstream",
							tool = %tool.exposed_name,
							backend = %tool.backend_name,
							reason = %reason,
							"drift validation failed, tool disabled"
						);
						self.disabled.write().insert(tool.exposed_name.clone());
					},
					ValidationMode::Warn => {
						tracing::warn!(
							target: "upstream",
							tool = %tool.exposed_name,
							backend = %tool.backend_name,
							reason = %reason,
							"drift validation failed"
						);
					},
					ValidationMode::Skip => {},
				},
			}
		}
	}
}
