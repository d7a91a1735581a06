//! Path pattern matching.
//!
//! # Responsibilities
//! - Compile patterns like `/users/:id/files/*` into segments
//! - Match request paths, capturing parameter values in order
//!
//! # Design Decisions
//! - Static segments are compared case-sensitively
//! - A trailing `*` captures the rest of the path (possibly empty) under the name `*`
//! - No regex to guarantee O(n) matching

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param,
    Wildcard,
}

/// Compiled path pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    names: Arc<[String]>,
}

impl Pattern {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut names = Vec::new();
        let parts: Vec<&str> = source.trim_start_matches('/').split('/').collect();
        let last = parts.len().saturating_sub(1);

        for (i, part) in parts.into_iter().enumerate() {
            if let Some(name) = part.strip_prefix(':') {
                segments.push(Segment::Param);
                names.push(name.to_string());
            } else if part == "*" && i == last {
                segments.push(Segment::Wildcard);
                names.push("*".to_string());
            } else {
                segments.push(Segment::Static(part.to_string()));
            }
        }

        Self {
            source: source.to_string(),
            segments,
            names: names.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parameter names in capture order.
    pub fn names(&self) -> &Arc<[String]> {
        &self.names
    }

    /// Match `path`, appending captured values to `values`.
    ///
    /// On a miss `values` is left with whatever was appended; callers clear it.
    pub fn matches(&self, path: &str, values: &mut Vec<String>) -> bool {
        let mut rest = path.trim_start_matches('/');

        for (i, segment) in self.segments.iter().enumerate() {
            if *segment == Segment::Wildcard {
                values.push(rest.to_string());
                return true;
            }

            let (part, tail) = match rest.split_once('/') {
                Some((part, tail)) => (part, Some(tail)),
                None => (rest, None),
            };

            match segment {
                Segment::Static(expected) if expected != part => return false,
                Segment::Param if part.is_empty() => return false,
                Segment::Param => values.push(part.to_string()),
                _ => {}
            }

            match tail {
                Some(tail) => rest = tail,
                None => {
                    // Path exhausted: only a trailing wildcard may remain.
                    return match &self.segments[i + 1..] {
                        [] => true,
                        [Segment::Wildcard] => {
                            values.push(String::new());
                            true
                        }
                        _ => false,
                    };
                }
            }
        }

        false
    }
}
