//! Path schema parsing.
//!
//! A path is `/`-separated; each segment is either a literal `name` or a
//! `name:pattern` pair whose pattern is compiled anchored (`^...$`). When
//! searching, only the names matter; when creating nodes, the full schema
//! does.

use arbor_http::{Error, Result};
use regex::Regex;

/// One parsed `name[:pattern]` segment schema.
#[derive(Debug, Clone)]
pub struct Segment {
	pub name: String,
	pub pattern: Option<Regex>,
}

impl Segment {
	/// Parse a segment schema, compiling the anchored pattern if present.
	///
	/// # Examples
	///
	/// ```
	/// use arbor_routing::Segment;
	///
	/// let seg = Segment::parse("id:[0-9]+").unwrap();
	/// assert_eq!(seg.name, "id");
	/// assert!(seg.pattern.unwrap().is_match("42"));
	/// ```
	pub fn parse(schema: &str) -> Result<Self> {
		match schema.split_once(':') {
			Some((name, pattern)) => {
				let compiled =
					Regex::new(&format!("^{}$", pattern)).map_err(|err| Error::InvalidPattern {
						pattern: pattern.to_string(),
						message: err.to_string(),
					})?;
				Ok(Segment {
					name: name.to_string(),
					pattern: Some(compiled),
				})
			}
			None => Ok(Segment {
				name: schema.to_string(),
				pattern: None,
			}),
		}
	}
}

/// Segment schemas of a path, empty segments dropped.
pub fn schemas_of(path: &str) -> Vec<&str> {
	path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Segment names of a path, pattern suffixes discarded.
pub fn names_of(path: &str) -> Vec<String> {
	schemas_of(path)
		.into_iter()
		.map(|s| s.split_once(':').map(|(n, _)| n).unwrap_or(s).to_string())
		.collect()
}

/// Parent path of `path`; `/a/b` becomes `/a`, `/a` becomes `/`.
pub fn dirname(path: &str) -> String {
	let trimmed = path.trim_end_matches('/');
	match trimmed.rfind('/') {
		Some(0) | None => "/".to_string(),
		Some(idx) => trimmed[..idx].to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn literal_segment_has_no_pattern() {
		let seg = Segment::parse("user").unwrap();
		assert_eq!(seg.name, "user");
		assert!(seg.pattern.is_none());
	}

	#[test]
	fn pattern_segment_is_anchored() {
		let seg = Segment::parse("id:[0-9]+").unwrap();
		let re = seg.pattern.unwrap();
		assert!(re.is_match("123"));
		assert!(!re.is_match("123x"));
		assert!(!re.is_match("x123"));
	}

	#[test]
	fn broken_pattern_is_a_structural_error() {
		assert!(matches!(
			Segment::parse("id:["),
			Err(Error::InvalidPattern { .. })
		));
	}

	#[test]
	fn names_strip_patterns() {
		assert_eq!(
			names_of("/rpc/module:(.+)/service:(.+)"),
			vec!["rpc", "module", "service"]
		);
	}

	#[rstest]
	#[case("/a/b", "/a")]
	#[case("/a", "/")]
	#[case("/", "/")]
	#[case("/a/b/c", "/a/b")]
	fn dirname_cases(#[case] path: &str, #[case] expected: &str) {
		assert_eq!(dirname(path), expected);
	}
}
