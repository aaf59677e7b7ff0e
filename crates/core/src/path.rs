//! Dot-path lookup over JSON trees.
//!
//! Grammar: `segment ( "." segment )*` where a segment is a key optionally
//! followed by bracketed indices, e.g. `metrics.sessions`, `items[0].name`,
//! `history.2`. A numeric key also indexes into arrays.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("empty segment in path '{0}'")]
    EmptySegment(String),
    #[error("unclosed '[' in path '{0}'")]
    UnclosedBracket(String),
    #[error("invalid index '{index}' in path '{path}'")]
    InvalidIndex { path: String, index: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed dot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl JsonPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            let part = part.trim();
            if part.is_empty() {
                return Err(PathError::EmptySegment(trimmed.to_string()));
            }

            let (key, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            } else if rest.is_empty() {
                return Err(PathError::EmptySegment(trimmed.to_string()));
            }

            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| PathError::UnclosedBracket(trimmed.to_string()))?;
                let index = &rest[1..close];
                let parsed = index.trim().parse::<usize>().map_err(|_| PathError::InvalidIndex {
                    path: trimmed.to_string(),
                    index: index.to_string(),
                })?;
                segments.push(PathSegment::Index(parsed));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(PathError::UnclosedBracket(trimmed.to_string()));
                }
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk `root`; `None` when any segment is missing or traverses a scalar.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
                (PathSegment::Key(k), Value::Array(items)) => items.get(k.parse::<usize>().ok()?)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for JsonPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        JsonPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}
