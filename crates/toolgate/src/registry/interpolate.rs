// Environment interpolation
//
// `${VAR}` placeholders in server env/args and tool defaults are replaced
// from the ambient environment at load time. An unset variable interpolates
// to the empty string with a warning; the registry still loads.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static VAR_PATTERN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

/// Replace `${VAR}` placeholders in a string, looking names up with
/// `lookup`. `context` names the registry location for the warning.
pub fn interpolate_with(
	s: &str,
	context: &str,
	lookup: impl Fn(&str) -> Option<String>,
) -> String {
	VAR_PATTERN
		.replace_all(s, |caps: &regex::Captures<'_>| {
			let var = &caps[1];
			match lookup(var) {
				Some(value) => value,
				None => {
					tracing::warn!(
						target: "registry",
						variable = var,
						context,
						"environment variable not set, interpolating empty string"
					);
					String::new()
				},
			}
		})
		.into_owned()
}

/// Replace `${VAR}` placeholders from the process environment.
pub fn interpolate_str(s: &str, context: &str) -> String {
	interpolate_with(s, context, |name| std::env::var(name).ok())
}

/// Interpolate string values recursively through a JSON value.
pub fn interpolate_value(value: &Value, context: &str) -> Value {
	match value {
		Value::String(s) => Value::String(interpolate_str(s, context)),
		Value::Object(obj) => Value::Object(
			obj
				.iter()
				.map(|(k, v)| (k.clone(), interpolate_value(v, context)))
				.collect(),
		),
		Value::Array(arr) => {
			Value::Array(arr.iter().map(|v| interpolate_value(v, context)).collect())
		},
		other => other.clone(),
	}
}
