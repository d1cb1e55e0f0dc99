// Call-path transformation engine
//
// Two halves per call: the request side injects effective defaults and
// rewrites the exposed name to the upstream name; the response side
// projects structured output and, when the backend only returned prose,
// promotes any JSON embedded in the first text block. Original content
// blocks always survive untouched, they are what humans and non-structured
// clients read.

use rmcp::model::{CallToolResult, RawContent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::jsontext::extract_json;
use crate::registry::resolve::ResolvedTool;

/// What happens when a client supplies a value for a field that is both
/// hidden and defaulted. `Override` is the safe choice for secret
/// injection, the primary use of hidden defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
	/// The registry default silently wins
	#[default]
	Override,
	/// The client value is honored
	ClientWins,
	/// The call is rejected
	Reject,
}

#[derive(Error, Debug)]
pub enum RequestError {
	#[error("argument '{0}' is locked by the gateway and cannot be supplied")]
	LockedField(String),
}

/// Build the upstream argument object: `effectiveDefaults ⊕ clientArgs`.
/// Client values win on collision except on hidden-locked fields, where
/// `policy` decides.
pub fn transform_request(
	tool: &ResolvedTool,
	args: Option<Map<String, Value>>,
	policy: MergePolicy,
) -> Result<Map<String, Value>, RequestError> {
	let mut out = tool.effective_defaults.clone();

	for (key, value) in args.unwrap_or_default() {
		let hidden_locked =
			tool.hide_fields.contains(&key) && tool.effective_defaults.contains_key(&key);
		if hidden_locked {
			match policy {
				MergePolicy::Override => {
					tracing::debug!(
						target: "gateway",
						tool = %tool.exposed_name,
						field = %key,
						"client value for locked field overridden by default"
					);
					continue;
				},
				MergePolicy::Reject => return Err(RequestError::LockedField(key)),
				MergePolicy::ClientWins => {},
			}
		}
		out.insert(key, value);
	}

	Ok(out)
}

/// Apply output projection and JSON-in-text promotion to an upstream
/// result, preserving the original content blocks.
pub fn transform_response(
	tool: &ResolvedTool,
	mut result: CallToolResult,
	detect_json_in_text: bool,
) -> CallToolResult {
	if let Some(structured) = result.structured_content.take() {
		result.structured_content = Some(match &tool.projection {
			Some(plan) => project_structured(tool, plan, &structured),
			None => structured,
		});
		return result;
	}

	if detect_json_in_text {
		let first_text = result.content.first().and_then(|c| match &c.raw {
			RawContent::Text(t) => Some(t.text.as_str()),
			_ => None,
		});
		if let Some(detected) = first_text.and_then(extract_json) {
			result.structured_content = Some(match &tool.projection {
				Some(plan) => project_structured(tool, plan, &detected),
				None => detected,
			});
			return result;
		}
	}

	// Nothing structured to work with: pass the raw result through.
	result
}

fn project_structured(
	tool: &ResolvedTool,
	plan: &crate::projection::ProjectionPlan,
	value: &Value,
) -> Value {
	let projected = plan.project(value);
	let empty = match &projected {
		None => true,
		Some(Value::Object(obj)) => obj.is_empty() && plan.bound_sources() > 0,
		Some(Value::Array(arr)) => arr.is_empty() && plan.bound_sources() > 0,
		Some(_) => false,
	};
	if empty {
		tracing::warn!(
			target: "gateway",
			tool = %tool.exposed_name,
			"output projection yielded no matches, returning empty structured content"
		);
		return Value::Object(Map::new());
	}
	projected.unwrap_or_else(|| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
	use rmcp::model::Content;
	use serde_json::json;

	use super::*;
	use crate::registry::resolve::ResolvedRegistry;
	use crate::registry::types::{RegistryDoc, ServerDef, ToolDef};

	fn resolved(tools: Vec<ToolDef>) -> ResolvedRegistry {
		ResolvedRegistry::resolve(RegistryDoc {
			schema_version: "1.0".to_string(),
			servers: vec![ServerDef::stdio("weather", "weather-mcp")],
			schemas: serde_json::Map::new(),
			tools,
		})
		.unwrap()
	}

	fn weather_tools() -> Vec<ToolDef> {
		vec![
			ToolDef::base("fetch_forecast", "weather").with_input_schema(json!({
				"type": "object",
				"properties": {
					"city": {"type": "string"},
					"station_id": {"type": "string"},
					"api_key": {"type": "string"}
				},
				"required": ["city", "station_id", "api_key"]
			})),
			ToolDef::derive("get_weather", "fetch_forecast")
				.with_default("station_id", json!("KPAL"))
				.with_default("api_key", json!("K"))
				.with_hidden_fields(["station_id", "api_key"]),
		]
	}

	fn args(value: Value) -> Option<Map<String, Value>> {
		Some(value.as_object().unwrap().clone())
	}

	#[test]
	fn test_defaults_injected() {
		let registry = resolved(weather_tools());
		let tool = registry.get("get_weather").unwrap();

		let out =
			transform_request(tool, args(json!({"city": "Paris"})), MergePolicy::Override)
				.unwrap();
		assert_eq!(
			Value::Object(out),
			json!({"station_id": "KPAL", "api_key": "K", "city": "Paris"})
		);
		assert_eq!(tool.upstream_name, "fetch_forecast");
	}

	#[test]
	fn test_client_wins_on_unlocked_collision() {
		let registry = resolved(vec![
			ToolDef::base("t", "weather").with_default("units", json!("metric")),
		]);
		let tool = registry.get("t").unwrap();

		let out =
			transform_request(tool, args(json!({"units": "imperial"})), MergePolicy::Override)
				.unwrap();
		assert_eq!(out.get("units"), Some(&json!("imperial")));
	}

	#[test]
	fn test_locked_field_override_policy() {
		let registry = resolved(weather_tools());
		let tool = registry.get("get_weather").unwrap();

		let out = transform_request(
			tool,
			args(json!({"city": "Paris", "api_key": "stolen"})),
			MergePolicy::Override,
		)
		.unwrap();
		assert_eq!(out.get("api_key"), Some(&json!("K")));
	}

	#[test]
	fn test_locked_field_reject_policy() {
		let registry = resolved(weather_tools());
		let tool = registry.get("get_weather").unwrap();

		let err = transform_request(
			tool,
			args(json!({"api_key": "stolen"})),
			MergePolicy::Reject,
		)
		.unwrap_err();
		assert!(matches!(err, RequestError::LockedField(ref f) if f == "api_key"));
	}

	#[test]
	fn test_locked_field_client_wins_policy() {
		let registry = resolved(weather_tools());
		let tool = registry.get("get_weather").unwrap();

		let out = transform_request(
			tool,
			args(json!({"api_key": "mine"})),
			MergePolicy::ClientWins,
		)
		.unwrap();
		assert_eq!(out.get("api_key"), Some(&json!("mine")));
	}

	#[test]
	fn test_no_args_yields_defaults() {
		let registry = resolved(weather_tools());
		let tool = registry.get("get_weather").unwrap();

		let out = transform_request(tool, None, MergePolicy::Override).unwrap();
		assert_eq!(
			Value::Object(out),
			json!({"station_id": "KPAL", "api_key": "K"})
		);
	}

	fn projecting_tool() -> ResolvedRegistry {
		resolved(vec![ToolDef::base("t", "weather").with_output_schema(json!({
			"type": "object",
			"properties": {
				"names": {
					"type": "array",
					"source_field": "$.entities[*].name",
					"items": {"type": "string"}
				}
			}
		}))])
	}

	#[test]
	fn test_structured_content_projected() {
		let registry = projecting_tool();
		let tool = registry.get("t").unwrap();

		let result = CallToolResult {
			content: vec![Content::text("two entities")],
			structured_content: Some(json!({
				"entities": [
					{"name": "A", "observations": []},
					{"name": "B", "observations": []}
				]
			})),
			is_error: None,
			meta: None,
		};

		let out = transform_response(tool, result, true);
		assert_eq!(out.structured_content, Some(json!({"names": ["A", "B"]})));
		// Content blocks survive.
		assert_eq!(out.content.len(), 1);
	}

	#[test]
	fn test_json_in_text_promoted() {
		let registry = resolved(vec![ToolDef::base("t", "weather").with_output_schema(
			json!({
				"type": "object",
				"properties": {
					"temperature": {"type": "number", "source_field": "$.temp"}
				}
			}),
		)]);
		let tool = registry.get("t").unwrap();

		let result = CallToolResult {
			content: vec![Content::text(r#"Result: {"temp": 72.5}"#)],
			structured_content: None,
			is_error: None,
			meta: None,
		};

		let out = transform_response(tool, result, true);
		assert_eq!(out.structured_content, Some(json!({"temperature": 72.5})));
		let RawContent::Text(text) = &out.content[0].raw else {
			panic!("text block dropped");
		};
		assert_eq!(text.text, r#"Result: {"temp": 72.5}"#);
	}

	#[test]
	fn test_json_in_text_without_projection() {
		let registry = resolved(vec![ToolDef::base("t", "weather")]);
		let tool = registry.get("t").unwrap();

		let result = CallToolResult {
			content: vec![Content::text(r#"{"raw": true}"#)],
			structured_content: None,
			is_error: None,
			meta: None,
		};

		let out = transform_response(tool, result, true);
		assert_eq!(out.structured_content, Some(json!({"raw": true})));
	}

	#[test]
	fn test_detection_disabled_passes_through() {
		let registry = resolved(vec![ToolDef::base("t", "weather")]);
		let tool = registry.get("t").unwrap();

		let result = CallToolResult {
			content: vec![Content::text(r#"{"raw": true}"#)],
			structured_content: None,
			is_error: None,
			meta: None,
		};

		let out = transform_response(tool, result, false);
		assert_eq!(out.structured_content, None);
	}

	#[test]
	fn test_plain_prose_passes_through() {
		let registry = projecting_tool();
		let tool = registry.get("t").unwrap();

		let result = CallToolResult {
			content: vec![Content::text("no json here")],
			structured_content: None,
			is_error: None,
			meta: None,
		};

		let out = transform_response(tool, result, true);
		assert_eq!(out.structured_content, None);
		assert_eq!(out.content.len(), 1);
	}

	#[test]
	fn test_empty_projection_returns_empty_object() {
		let registry = projecting_tool();
		let tool = registry.get("t").unwrap();

		let result = CallToolResult {
			content: vec![],
			structured_content: Some(json!({"unrelated": 1})),
			is_error: None,
			meta: None,
		};

		let out = transform_response(tool, result, true);
		assert_eq!(out.structured_content, Some(json!({})));
	}

	#[test]
	fn test_structured_without_projection_untouched() {
		let registry = resolved(vec![ToolDef::base("t", "weather")]);
		let tool = registry.get("t").unwrap();

		let structured = json!({"anything": [1, 2, 3]});
		let result = CallToolResult {
			content: vec![],
			structured_content: Some(structured.clone()),
			is_error: None,
			meta: None,
		};

		let out = transform_response(tool, result, true);
		assert_eq!(out.structured_content, Some(structured));
	}
}
