// Path expressions for output projection
//
// A deliberately small slice of JSONPath: root, property access (dot or
// bracket spelling), numeric index, and array wildcard. Anything outside
// that grammar is rejected when the registry is compiled, not at call time.

use serde_json::Value;
use thiserror::Error;

/// Errors produced while parsing a path expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathParseError {
	#[error("path '{0}' must start with '$'")]
	MissingRoot(String),

	#[error("unexpected character '{ch}' at offset {offset} in path '{path}'")]
	Unexpected { path: String, ch: char, offset: usize },

	#[error("unterminated bracket segment in path '{0}'")]
	UnterminatedBracket(String),

	#[error("empty property name at offset {offset} in path '{path}'")]
	EmptyName { path: String, offset: usize },

	#[error("invalid array index '{index}' in path '{path}'")]
	InvalidIndex { path: String, index: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
	/// `.name` or `['name']`
	Key(String),
	/// `[n]`, non-negative
	Index(usize),
	/// `[*]`
	Wildcard,
}

/// A compiled path expression.
///
/// Evaluation never fails: missing keys and out-of-range indices simply
/// produce no matches. An expression is multi-valued iff it contains `[*]`.
#[derive(Debug, Clone)]
pub struct PathExpr {
	raw: String,
	segments: Vec<Segment>,
	multi: bool,
}

impl PathExpr {
	/// Parse a path expression, rejecting anything outside the supported
	/// subset (recursive descent, filters, slices, unions, ...).
	pub fn parse(raw: &str) -> Result<Self, PathParseError> {
		let mut chars: Vec<(usize, char)> = raw.char_indices().collect();
		// Trailing whitespace is tolerated, nothing else.
		while chars.last().is_some_and(|(_, c)| c.is_whitespace()) {
			chars.pop();
		}
		let mut pos = 0usize;
		if chars.first().map(|(_, c)| *c) != Some('$') {
			return Err(PathParseError::MissingRoot(raw.to_string()));
		}
		pos += 1;

		let mut segments = Vec::new();
		while pos < chars.len() {
			let (offset, c) = chars[pos];
			match c {
				'.' => {
					pos += 1;
					let start = pos;
					while pos < chars.len() && !matches!(chars[pos].1, '.' | '[' | ']') {
						pos += 1;
					}
					let name: String = chars[start..pos].iter().map(|(_, c)| *c).collect();
					if name.is_empty() {
						// Catches both `$.` and `$..descent`.
						return Err(PathParseError::EmptyName {
							path: raw.to_string(),
							offset,
						});
					}
					if name == "*" {
						return Err(PathParseError::Unexpected {
							path: raw.to_string(),
							ch: '*',
							offset: offset + 1,
						});
					}
					segments.push(Segment::Key(name));
				},
				'[' => {
					pos += 1;
					let Some(&(inner_offset, inner)) = chars.get(pos) else {
						return Err(PathParseError::UnterminatedBracket(raw.to_string()));
					};
					match inner {
						'*' => {
							pos += 1;
							if chars.get(pos).map(|(_, c)| *c) != Some(']') {
								return Err(PathParseError::UnterminatedBracket(raw.to_string()));
							}
							pos += 1;
							segments.push(Segment::Wildcard);
						},
						'\'' => {
							pos += 1;
							let mut name = String::new();
							let mut closed = false;
							while pos < chars.len() {
								let (_, c) = chars[pos];
								if c == '\\' {
									// Escapes inside quoted names: \' and \\
									if let Some(&(_, next)) = chars.get(pos + 1) {
										name.push(next);
										pos += 2;
										continue;
									}
									return Err(PathParseError::UnterminatedBracket(raw.to_string()));
								}
								if c == '\'' {
									closed = true;
									pos += 1;
									break;
								}
								name.push(c);
								pos += 1;
							}
							if !closed || chars.get(pos).map(|(_, c)| *c) != Some(']') {
								return Err(PathParseError::UnterminatedBracket(raw.to_string()));
							}
							pos += 1;
							if name.is_empty() {
								return Err(PathParseError::EmptyName {
									path: raw.to_string(),
									offset: inner_offset,
								});
							}
							segments.push(Segment::Key(name));
						},
						d if d.is_ascii_digit() => {
							let start = pos;
							while pos < chars.len() && chars[pos].1.is_ascii_digit() {
								pos += 1;
							}
							let digits: String = chars[start..pos].iter().map(|(_, c)| *c).collect();
							if chars.get(pos).map(|(_, c)| *c) != Some(']') {
								return Err(PathParseError::UnterminatedBracket(raw.to_string()));
							}
							pos += 1;
							let index: usize =
								digits
									.parse()
									.map_err(|_| PathParseError::InvalidIndex {
										path: raw.to_string(),
										index: digits.clone(),
									})?;
							segments.push(Segment::Index(index));
						},
						other => {
							// Negative indices, slices, filters, quoted-double
							// names: all outside the subset.
							return Err(PathParseError::Unexpected {
								path: raw.to_string(),
								ch: other,
								offset: inner_offset,
							});
						},
					}
				},
				other => {
					return Err(PathParseError::Unexpected {
						path: raw.to_string(),
						ch: other,
						offset,
					});
				},
			}
		}

		let multi = segments.contains(&Segment::Wildcard);
		Ok(Self {
			raw: raw.to_string(),
			segments,
			multi,
		})
	}

	/// The original expression, for diagnostics.
	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// Whether this expression can yield more than one value.
	pub fn is_multi(&self) -> bool {
		self.multi
	}

	/// Evaluate against a decoded JSON value. Returns every match in
	/// document order; an empty vec means "no match", never an error.
	pub fn eval<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
		let mut nodes: Vec<&'a Value> = vec![root];
		for segment in &self.segments {
			let mut next = Vec::new();
			for node in nodes {
				match segment {
					Segment::Key(name) => {
						if let Some(v) = node.as_object().and_then(|o| o.get(name)) {
							next.push(v);
						}
					},
					Segment::Index(i) => {
						if let Some(v) = node.as_array().and_then(|a| a.get(*i)) {
							next.push(v);
						}
					},
					Segment::Wildcard => {
						if let Some(arr) = node.as_array() {
							next.extend(arr.iter());
						}
					},
				}
			}
			if next.is_empty() {
				return Vec::new();
			}
			nodes = next;
		}
		nodes
	}

	/// Evaluate expecting a single value. Multi-valued expressions return
	/// their first match here; callers that care use [`PathExpr::eval`].
	pub fn eval_one<'a>(&self, root: &'a Value) -> Option<&'a Value> {
		self.eval(root).into_iter().next()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_root_only() {
		let p = PathExpr::parse("$").unwrap();
		assert!(!p.is_multi());
		let v = json!({"a": 1});
		assert_eq!(p.eval(&v), vec![&v]);
	}

	#[test]
	fn test_parse_dot_chain() {
		let p = PathExpr::parse("$.a.b.c").unwrap();
		let v = json!({"a": {"b": {"c": 42}}});
		assert_eq!(p.eval_one(&v), Some(&json!(42)));
	}

	#[test]
	fn test_bracket_name_with_special_chars() {
		let p = PathExpr::parse("$['weird key.with dots'].x").unwrap();
		let v = json!({"weird key.with dots": {"x": "y"}});
		assert_eq!(p.eval_one(&v), Some(&json!("y")));
	}

	#[test]
	fn test_bracket_name_with_escaped_quote() {
		let p = PathExpr::parse(r"$['it\'s']").unwrap();
		let v = json!({"it's": 7});
		assert_eq!(p.eval_one(&v), Some(&json!(7)));
	}

	#[test]
	fn test_array_index() {
		let p = PathExpr::parse("$.items[1]").unwrap();
		let v = json!({"items": ["a", "b", "c"]});
		assert_eq!(p.eval_one(&v), Some(&json!("b")));
	}

	#[test]
	fn test_wildcard_is_multi() {
		let p = PathExpr::parse("$.entities[*].name").unwrap();
		assert!(p.is_multi());
		let v = json!({"entities": [{"name": "A"}, {"name": "B"}]});
		let matches = p.eval(&v);
		assert_eq!(matches, vec![&json!("A"), &json!("B")]);
	}

	#[test]
	fn test_chained_wildcards() {
		let p = PathExpr::parse("$.groups[*].members[*]").unwrap();
		let v = json!({"groups": [
			{"members": [1, 2]},
			{"members": [3]}
		]});
		assert_eq!(p.eval(&v), vec![&json!(1), &json!(2), &json!(3)]);
	}

	#[test]
	fn test_missing_key_is_empty() {
		let p = PathExpr::parse("$.a.b").unwrap();
		let v = json!({"a": {"x": 1}});
		assert!(p.eval(&v).is_empty());
		assert_eq!(p.eval_one(&v), None);
	}

	#[test]
	fn test_out_of_range_index_is_empty() {
		let p = PathExpr::parse("$.items[9]").unwrap();
		let v = json!({"items": [1]});
		assert!(p.eval(&v).is_empty());
	}

	#[test]
	fn test_wildcard_on_non_array_is_empty() {
		let p = PathExpr::parse("$.a[*]").unwrap();
		let v = json!({"a": {"not": "an array"}});
		assert!(p.eval(&v).is_empty());
	}

	#[test]
	fn test_key_on_scalar_is_empty() {
		let p = PathExpr::parse("$.a.b").unwrap();
		let v = json!({"a": 3});
		assert!(p.eval(&v).is_empty());
	}

	#[test]
	fn test_rejects_missing_root() {
		assert!(matches!(
			PathExpr::parse("a.b"),
			Err(PathParseError::MissingRoot(_))
		));
	}

	#[test]
	fn test_rejects_recursive_descent() {
		assert!(matches!(
			PathExpr::parse("$..name"),
			Err(PathParseError::EmptyName { .. })
		));
	}

	#[test]
	fn test_rejects_filter_expression() {
		assert!(matches!(
			PathExpr::parse("$.items[?(@.x > 1)]"),
			Err(PathParseError::Unexpected { ch: '?', .. })
		));
	}

	#[test]
	fn test_rejects_slice() {
		assert!(PathExpr::parse("$.items[1:3]").is_err());
	}

	#[test]
	fn test_rejects_negative_index() {
		assert!(matches!(
			PathExpr::parse("$.items[-1]"),
			Err(PathParseError::Unexpected { ch: '-', .. })
		));
	}

	#[test]
	fn test_rejects_property_wildcard() {
		assert!(PathExpr::parse("$.*").is_err());
	}

	#[test]
	fn test_rejects_unterminated_bracket() {
		assert!(matches!(
			PathExpr::parse("$.items[1"),
			Err(PathParseError::UnterminatedBracket(_))
		));
		assert!(matches!(
			PathExpr::parse("$['oops"),
			Err(PathParseError::UnterminatedBracket(_))
		));
	}

	#[test]
	fn test_unicode_names() {
		let p = PathExpr::parse("$.données.ville").unwrap();
		let v = json!({"données": {"ville": "Paris"}});
		assert_eq!(p.eval_one(&v), Some(&json!("Paris")));
	}
}
