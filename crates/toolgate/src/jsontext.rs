// JSON-in-text detection
//
// Upstream servers frequently return machine-readable payloads wrapped in
// prose ("Result: {...}"). This module recognizes a JSON object or array
// embedded in a text blob so the gateway can promote it to structured
// content. It is not a recovery parser: anything that does not parse as
// valid JSON yields `None`.

use serde_json::Value;

/// Try to extract a JSON object or array from a text blob.
///
/// Strategy, first success wins:
/// 1. trim and parse the whole text; accept only a top-level object/array
/// 2. balanced-bracket extraction starting at the first `{` or `[`,
///    ignoring brackets inside string literals and escape sequences
pub fn extract_json(text: &str) -> Option<Value> {
	let trimmed = text.trim();
	if trimmed.is_empty() {
		return None;
	}

	if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
		if value.is_object() || value.is_array() {
			return Some(value);
		}
	}

	let start = trimmed.find(['{', '['])?;
	let candidate = &trimmed[start..];
	let open = candidate.chars().next()?;
	let close = match open {
		'{' => '}',
		_ => ']',
	};
	let end = balanced_end(candidate, open, close)?;
	serde_json::from_str::<Value>(&candidate[..end]).ok()
}

/// Byte offset one past the bracket that balances the leading `open`, or
/// `None` if the text ends first. String literals and their escapes do not
/// count toward nesting.
fn balanced_end(text: &str, open: char, close: char) -> Option<usize> {
	let mut depth = 0i64;
	let mut in_string = false;
	let mut escape_next = false;

	for (i, c) in text.char_indices() {
		if escape_next {
			escape_next = false;
			continue;
		}
		if c == '\\' && in_string {
			escape_next = true;
			continue;
		}
		if c == '"' {
			in_string = !in_string;
			continue;
		}
		if in_string {
			continue;
		}
		if c == open {
			depth += 1;
		} else if c == close {
			depth -= 1;
			if depth == 0 {
				return Some(i + c.len_utf8());
			}
		}
	}
	None
}
