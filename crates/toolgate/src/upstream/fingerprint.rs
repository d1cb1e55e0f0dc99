// Canonical fingerprints
//
// Two backends with the same definition must share one session, and a
// schema-drift hash must be reproducible by whoever wrote the registry, so
// both hashes run over a canonical form: object keys sorted at every level,
// then SHA-256 over the compact JSON encoding.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::registry::types::{AuthMode, RemoteTransport, ServerEndpoint};

/// Recursively sort object keys so serialization is order-independent.
pub fn canonicalize(value: &Value) -> Value {
	match value {
		Value::Object(obj) => {
			let mut keys: Vec<&String> = obj.keys().collect();
			keys.sort();
			let mut sorted = Map::new();
			for key in keys {
				sorted.insert(key.clone(), canonicalize(&obj[key]));
			}
			Value::Object(sorted)
		},
		Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
		other => other.clone(),
	}
}

fn sha256_hex(bytes: &[u8]) -> String {
	let digest = Sha256::digest(bytes);
	let mut out = String::with_capacity(64);
	for byte in digest {
		out.push_str(&format!("{byte:02x}"));
	}
	out
}

fn hash_value(value: &Value) -> String {
	let canonical = canonicalize(value);
	let encoded = serde_json::to_vec(&canonical).expect("canonical JSON serializes");
	sha256_hex(&encoded)
}

/// Stable fingerprint of a backend endpoint definition.
pub fn endpoint_fingerprint(endpoint: &ServerEndpoint) -> String {
	let value = match endpoint {
		ServerEndpoint::Stdio { stdio } => serde_json::json!({
			"kind": "stdio",
			"command": stdio.command,
			"args": stdio.args,
			"env": stdio.env,
		}),
		ServerEndpoint::Remote {
			url,
			transport,
			auth,
		} => serde_json::json!({
			"kind": "remote",
			"url": url,
			"transport": match transport {
				RemoteTransport::Sse => "sse",
				RemoteTransport::StreamableHttp => "streamableHttp",
			},
			"auth": match auth {
				AuthMode::None => "none",
				AuthMode::Oauth => "oauth",
			},
		}),
	};
	hash_value(&value)
}

/// Deterministic hash of an upstream tool's contract, compared against
/// `expectedSchemaHash` once the backend reports its tool list.
pub fn tool_schema_hash(name: &str, description: Option<&str>, input_schema: &Value) -> String {
	let value = serde_json::json!({
		"name": name,
		"description": description.unwrap_or(""),
		"inputSchema": input_schema,
	});
	hash_value(&value)
}
