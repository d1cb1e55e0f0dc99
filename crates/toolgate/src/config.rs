// Gateway configuration
//
// Runtime knobs for the gateway process. Usually populated from the CLI;
// the serde derives exist so a config file can carry the same shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transform::MergePolicy;

/// How the gateway listens for MCP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ListenMode {
	#[serde(rename = "stdio")]
	#[default]
	Stdio,
	#[serde(rename = "sse")]
	Sse,
	#[serde(rename = "streamableHttp")]
	StreamableHttp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
	pub mode: ListenMode,

	/// Bind address for the HTTP and SSE modes
	pub bind: String,

	/// Upstream call deadline, e.g. "30s" or "500ms"
	pub call_timeout: String,

	/// What to do when a client supplies a hidden-and-defaulted field
	pub merge_policy: MergePolicy,

	/// Promote JSON found in text-only responses to structured content
	pub detect_json_in_text: bool,
}

impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			mode: ListenMode::Stdio,
			bind: "127.0.0.1:8000".to_string(),
			call_timeout: "30s".to_string(),
			merge_policy: MergePolicy::Override,
			detect_json_in_text: true,
		}
	}
}

impl GatewayConfig {
	/// Parsed call deadline; falls back to 30 s on a malformed value.
	pub fn call_deadline(&self) -> Duration {
		match parse_duration(&self.call_timeout) {
			Ok(d) => d,
			Err(_) => {
				tracing::warn!(
					target: "gateway",
					value = %self.call_timeout,
					"invalid callTimeout, using 30s"
				);
				Duration::from_secs(30)
			},
		}
	}
}

/// Parse a duration string like "5m", "30s", "100ms".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
	let s = s.trim();
	if s.is_empty() {
		return Err("empty duration string".to_string());
	}

	let (num_str, unit) = if s.ends_with("ms") {
		(&s[..s.len() - 2], "ms")
	} else if s.ends_with('s') {
		(&s[..s.len() - 1], "s")
	} else if s.ends_with('m') {
		(&s[..s.len() - 1], "m")
	} else if s.ends_with('h') {
		(&s[..s.len() - 1], "h")
	} else {
		// Assume seconds if no unit
		(s, "s")
	};

	let num: u64 = num_str
		.parse()
		.map_err(|_| format!("invalid duration number: {num_str}"))?;

	Ok(match unit {
		"ms" => Duration::from_millis(num),
		"s" => Duration::from_secs(num),
		"m" => Duration::from_secs(num * 60),
		_ => Duration::from_secs(num * 60 * 60),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_duration() {
		assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
		assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
		assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
		assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
		assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
	}

	#[test]
	fn test_parse_duration_errors() {
		assert!(parse_duration("").is_err());
		assert!(parse_duration("abc").is_err());
		assert!(parse_duration("-5s").is_err());
	}

	#[test]
	fn test_defaults() {
		let config = GatewayConfig::default();
		assert_eq!(config.mode, ListenMode::Stdio);
		assert_eq!(config.call_deadline(), Duration::from_secs(30));
		assert_eq!(config.merge_policy, MergePolicy::Override);
		assert!(config.detect_json_in_text);
	}

	#[test]
	fn test_config_roundtrip() {
		let json = r#"{
			"mode": "streamableHttp",
			"bind": "0.0.0.0:9000",
			"callTimeout": "5s",
			"mergePolicy": "reject",
			"detectJsonInText": false
		}"#;
		let config: GatewayConfig = serde_json::from_str(json).unwrap();
		assert_eq!(config.mode, ListenMode::StreamableHttp);
		assert_eq!(config.call_deadline(), Duration::from_secs(5));
		assert_eq!(config.merge_policy, MergePolicy::Reject);
		assert!(!config.detect_json_in_text);
	}

	#[test]
	fn test_partial_config_uses_defaults() {
		let config: GatewayConfig = serde_json::from_str(r#"{"mode": "sse"}"#).unwrap();
		assert_eq!(config.mode, ListenMode::Sse);
		assert_eq!(config.bind, "127.0.0.1:8000");
	}
}
