//! Stable addresses for positions inside an output document.
//!
//! Paths render as `$`, `$.user.age`, `$.items[2]` for concrete list elements,
//! and `$.items[*]` for the element template of a list schema node.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// One step of a [`JsonPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
    /// Any element of a list (schema templates only).
    Each,
}

/// Dotted/indexed address rooted at `$`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsonPath(Vec<Segment>);

impl JsonPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, key: &str) -> Self {
        self.with(Segment::Key(key.to_string()))
    }

    pub fn index(&self, index: usize) -> Self {
        self.with(Segment::Index(index))
    }

    pub fn each(&self) -> Self {
        self.with(Segment::Each)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the rendered form back into a path (`$.a[0].b`, `$.items[*]`).
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.trim().strip_prefix('$')?;
        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut key = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        key.push(next);
                        chars.next();
                    }
                    if key.is_empty() {
                        return None;
                    }
                    segments.push(Segment::Key(key));
                }
                '[' => {
                    let mut inner = String::new();
                    for next in chars.by_ref() {
                        if next == ']' {
                            break;
                        }
                        inner.push(next);
                    }
                    if inner == "*" {
                        segments.push(Segment::Each);
                    } else {
                        segments.push(Segment::Index(inner.parse().ok()?));
                    }
                }
                _ => return None,
            }
        }
        Some(Self(segments))
    }

    fn with(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.0 {
            match segment {
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Each => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Look up the value at `path` inside `value`.
pub fn lookup<'a>(value: &'a Value, path: &JsonPath) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.segments() {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}
