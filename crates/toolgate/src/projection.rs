// Output projection
//
// An output schema is plain JSON-Schema plus one extra keyword,
// `source_field`, holding a path expression. The schema compiles once into
// an immutable plan; at call time the plan reshapes a backend value into
// the declared form. Values that do not match the declared primitive type
// pass through untouched, and missing sources omit the property rather
// than emitting null.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::jsonpath::{PathExpr, PathParseError};

/// Errors raised while compiling an output schema.
#[derive(Error, Debug)]
pub enum ProjectionError {
	#[error("invalid source_field '{path}': {source}")]
	InvalidPath {
		path: String,
		#[source]
		source: PathParseError,
	},

	#[error("source_field must be a string, got: {0}")]
	NonStringPath(Value),
}

/// A compiled projection plan for one virtual tool.
#[derive(Debug)]
pub struct ProjectionPlan {
	root: PlanNode,
	bound_sources: usize,
}

#[derive(Debug)]
struct PlanNode {
	source: Option<PathExpr>,
	shape: Shape,
}

#[derive(Debug)]
enum Shape {
	/// Declared properties in document order.
	Object(Vec<(String, PlanNode)>),
	Array(Box<PlanNode>),
	Leaf,
}

impl ProjectionPlan {
	/// Compile an annotated output schema. Every `source_field` in the
	/// schema must parse; this is the load-time half of the contract.
	pub fn compile(schema: &Value) -> Result<Self, ProjectionError> {
		let mut bound_sources = 0;
		let root = compile_node(schema, &mut bound_sources)?;
		Ok(Self {
			root,
			bound_sources,
		})
	}

	/// Number of parsed `source_field` expressions in the plan.
	pub fn bound_sources(&self) -> usize {
		self.bound_sources
	}

	/// Project a backend value through the plan. `None` means the plan
	/// produced nothing at all (the root source did not match).
	pub fn project(&self, scope: &Value) -> Option<Value> {
		project_node(&self.root, scope)
	}
}

/// Strip every `source_field` key so the advertised schema is plain
/// JSON-Schema.
pub fn strip_source_fields(schema: &Value) -> Value {
	match schema {
		Value::Object(obj) => {
			let stripped: Map<String, Value> = obj
				.iter()
				.filter(|(k, _)| k.as_str() != "source_field")
				.map(|(k, v)| (k.clone(), strip_source_fields(v)))
				.collect();
			Value::Object(stripped)
		},
		Value::Array(arr) => Value::Array(arr.iter().map(strip_source_fields).collect()),
		other => other.clone(),
	}
}

fn compile_node(schema: &Value, bound: &mut usize) -> Result<PlanNode, ProjectionError> {
	let obj = schema.as_object();

	let source = match obj.and_then(|o| o.get("source_field")) {
		Some(Value::String(path)) => {
			let expr = PathExpr::parse(path).map_err(|e| ProjectionError::InvalidPath {
				path: path.clone(),
				source: e,
			})?;
			*bound += 1;
			Some(expr)
		},
		Some(other) => return Err(ProjectionError::NonStringPath(other.clone())),
		None => None,
	};

	let declared_type = obj
		.and_then(|o| o.get("type"))
		.and_then(Value::as_str);

	let shape = match declared_type {
		Some("object") => {
			let mut props = Vec::new();
			if let Some(properties) = obj
				.and_then(|o| o.get("properties"))
				.and_then(Value::as_object)
			{
				for (name, prop_schema) in properties {
					props.push((name.clone(), compile_node(prop_schema, bound)?));
				}
			}
			Shape::Object(props)
		},
		Some("array") => {
			let items = match obj.and_then(|o| o.get("items")) {
				Some(items_schema) => compile_node(items_schema, bound)?,
				None => PlanNode {
					source: None,
					shape: Shape::Leaf,
				},
			};
			Shape::Array(Box::new(items))
		},
		// Untyped schemas with properties/items still project structurally.
		_ if obj.is_some_and(|o| o.contains_key("properties")) => {
			let mut props = Vec::new();
			if let Some(properties) = obj
				.and_then(|o| o.get("properties"))
				.and_then(Value::as_object)
			{
				for (name, prop_schema) in properties {
					props.push((name.clone(), compile_node(prop_schema, bound)?));
				}
			}
			Shape::Object(props)
		},
		_ => Shape::Leaf,
	};

	Ok(PlanNode { source, shape })
}

/// Resolve a node's source against the scope, then shape the result.
fn project_node(node: &PlanNode, scope: &Value) -> Option<Value> {
	match &node.source {
		Some(path) if path.is_multi() => {
			let matches: Vec<Value> = path.eval(scope).into_iter().cloned().collect();
			if matches.is_empty() {
				return None;
			}
			match &node.shape {
				Shape::Array(items) => Some(Value::Array(project_elements(items, &matches))),
				// A multi-valued source on a non-array shape projects each
				// match and collects.
				_ => {
					let projected: Vec<Value> = matches
						.iter()
						.filter_map(|v| shape_value(&node.shape, v))
						.collect();
					Some(Value::Array(projected))
				},
			}
		},
		Some(path) => {
			let value = path.eval_one(scope)?.clone();
			shape_value(&node.shape, &value)
		},
		None => shape_value(&node.shape, scope),
	}
}

/// Shape an already-resolved value.
fn shape_value(shape: &Shape, value: &Value) -> Option<Value> {
	match shape {
		Shape::Leaf => Some(value.clone()),
		Shape::Object(props) => {
			let mut out = Map::new();
			for (name, child) in props {
				let projected = match &child.source {
					// A property with its own source evaluates against the
					// current scope, not the property value.
					Some(_) => project_node(child, value),
					None => value
						.as_object()
						.and_then(|o| o.get(name))
						.and_then(|v| shape_value(&child.shape, v)),
				};
				if let Some(v) = projected {
					out.insert(name.clone(), v);
				}
				// Missing results are omitted, never emitted as null.
			}
			Some(Value::Object(out))
		},
		Shape::Array(items) => match value {
			Value::Array(elements) => Some(Value::Array(project_elements(items, elements))),
			// A single non-array value cannot populate an array schema.
			_ => None,
		},
	}
}

fn project_elements(items: &PlanNode, elements: &[Value]) -> Vec<Value> {
	elements
		.iter()
		.filter_map(|elem| project_node(items, elem))
		.collect()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn plan(schema: Value) -> ProjectionPlan {
		ProjectionPlan::compile(&schema).unwrap()
	}

	#[test]
	fn test_flat_object_projection() {
		let p = plan(json!({
			"type": "object",
			"properties": {
				"temp": {"type": "number", "source_field": "$.temperature"},
				"city": {"type": "string", "source_field": "$.location.city"}
			}
		}));
		let out = p
			.project(&json!({
				"temperature": 72.5,
				"location": {"city": "Seattle", "state": "WA"}
			}))
			.unwrap();
		assert_eq!(out, json!({"temp": 72.5, "city": "Seattle"}));
	}

	#[test]
	fn test_passthrough_property_uses_same_name() {
		let p = plan(json!({
			"type": "object",
			"properties": {
				"city": {"type": "string"}
			}
		}));
		let out = p.project(&json!({"city": "Paris", "noise": 1})).unwrap();
		assert_eq!(out, json!({"city": "Paris"}));
	}

	#[test]
	fn test_wildcard_into_array_property() {
		let p = plan(json!({
			"type": "object",
			"properties": {
				"names": {
					"type": "array",
					"source_field": "$.entities[*].name",
					"items": {"type": "string"}
				}
			}
		}));
		let out = p
			.project(&json!({
				"entities": [
					{"name": "A", "observations": [1]},
					{"name": "B", "observations": [2]}
				]
			}))
			.unwrap();
		assert_eq!(out, json!({"names": ["A", "B"]}));
	}

	#[test]
	fn test_single_array_value_is_iterated() {
		let p = plan(json!({
			"type": "object",
			"properties": {
				"ids": {
					"type": "array",
					"source_field": "$.result.ids",
					"items": {"type": "number"}
				}
			}
		}));
		let out = p.project(&json!({"result": {"ids": [4, 5, 6]}})).unwrap();
		assert_eq!(out, json!({"ids": [4, 5, 6]}));
	}

	#[test]
	fn test_array_items_project_objects() {
		let p = plan(json!({
			"type": "array",
			"source_field": "$.rows[*]",
			"items": {
				"type": "object",
				"properties": {
					"id": {"type": "number", "source_field": "$.key"},
					"label": {"type": "string"}
				}
			}
		}));
		let out = p
			.project(&json!({"rows": [
				{"key": 1, "label": "one", "junk": true},
				{"key": 2, "label": "two"}
			]}))
			.unwrap();
		assert_eq!(
			out,
			json!([
				{"id": 1, "label": "one"},
				{"id": 2, "label": "two"}
			])
		);
	}

	#[test]
	fn test_missing_source_omits_property() {
		let p = plan(json!({
			"type": "object",
			"properties": {
				"present": {"type": "number", "source_field": "$.a"},
				"absent": {"type": "number", "source_field": "$.nope"}
			}
		}));
		let out = p.project(&json!({"a": 1})).unwrap();
		assert_eq!(out, json!({"present": 1}));
		assert!(!out.as_object().unwrap().contains_key("absent"));
	}

	#[test]
	fn test_no_type_coercion() {
		// Declared number, actual string: passes through unchanged.
		let p = plan(json!({
			"type": "object",
			"properties": {
				"temp": {"type": "number", "source_field": "$.t"}
			}
		}));
		let out = p.project(&json!({"t": "warm"})).unwrap();
		assert_eq!(out, json!({"temp": "warm"}));
	}

	#[test]
	fn test_nested_object_scopes() {
		let p = plan(json!({
			"type": "object",
			"properties": {
				"current": {
					"type": "object",
					"source_field": "$.data.current",
					"properties": {
						"temp": {"type": "number", "source_field": "$.temp_f"},
						"text": {"type": "string", "source_field": "$.condition.text"}
					}
				}
			}
		}));
		let out = p
			.project(&json!({
				"data": {"current": {"temp_f": 52.3, "condition": {"text": "Cloudy"}}}
			}))
			.unwrap();
		assert_eq!(out, json!({"current": {"temp": 52.3, "text": "Cloudy"}}));
	}

	#[test]
	fn test_projection_is_idempotent_in_shape() {
		let schema = json!({
			"type": "object",
			"properties": {
				"names": {
					"type": "array",
					"source_field": "$.entities[*].name",
					"items": {"type": "string"}
				}
			}
		});
		let p = plan(schema);
		let input = json!({"entities": [{"name": "A"}, {"name": "B"}]});
		let once = p.project(&input).unwrap();
		let twice = p.project(&input).unwrap();
		assert_eq!(once, twice);
	}

	#[test]
	fn test_empty_projection_result() {
		let p = plan(json!({
			"type": "object",
			"properties": {
				"x": {"type": "number", "source_field": "$.missing"}
			}
		}));
		let out = p.project(&json!({"other": 1})).unwrap();
		assert_eq!(out, json!({}));
		assert_eq!(p.bound_sources(), 1);
	}

	#[test]
	fn test_compile_rejects_bad_path() {
		let err = ProjectionPlan::compile(&json!({
			"type": "object",
			"properties": {
				"x": {"type": "number", "source_field": "$..deep"}
			}
		}));
		assert!(matches!(err, Err(ProjectionError::InvalidPath { .. })));
	}

	#[test]
	fn test_compile_rejects_non_string_path() {
		let err = ProjectionPlan::compile(&json!({
			"type": "object",
			"properties": {
				"x": {"type": "number", "source_field": 42}
			}
		}));
		assert!(matches!(err, Err(ProjectionError::NonStringPath(_))));
	}

	#[test]
	fn test_strip_source_fields() {
		let schema = json!({
			"type": "object",
			"properties": {
				"names": {
					"type": "array",
					"source_field": "$.entities[*].name",
					"items": {"type": "string", "source_field": "$.x"}
				}
			}
		});
		let stripped = strip_source_fields(&schema);
		assert_eq!(
			stripped,
			json!({
				"type": "object",
				"properties": {
					"names": {
						"type": "array",
						"items": {"type": "string"}
					}
				}
			})
		);
	}
}
