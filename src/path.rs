//! Structural key paths into nested containers
//!
//! A `DictPath` is a delimiter-scoped sequence of key segments. It is the
//! currency of reference resolution: `${foo:bar}` becomes the path
//! `foo:bar`, which can be applied to a parameter tree or to a rendered
//! exports row. A segment indexing into a sequence is coerced to an integer.
//!
//! The delimiter can be escaped with a backslash inside a segment, so
//! `a\:b:c` splits into `a:b` and `c`.

use std::fmt;

use serde_json::Value as Json;

/// A path into a nested dictionary, split on a configurable delimiter.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DictPath {
    delimiter: char,
    parts: Vec<String>,
}

impl DictPath {
    /// An empty path.
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            parts: Vec::new(),
        }
    }

    /// Split a delimited string, honoring backslash-escapes of the
    /// delimiter. The escape character is consumed.
    pub fn from_string(delimiter: char, contents: &str) -> Self {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = contents.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' && chars.peek() == Some(&delimiter) {
                current.push(delimiter);
                chars.next();
            } else if c == delimiter {
                parts.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        parts.push(current);
        Self { delimiter, parts }
    }

    pub fn from_parts(delimiter: char, parts: Vec<String>) -> Self {
        Self { delimiter, parts }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// The final segment, if any.
    pub fn key(&self) -> Option<&str> {
        self.parts.last().map(|s| s.as_str())
    }

    /// All segments but the last.
    pub fn key_parts(&self) -> &[String] {
        if self.parts.is_empty() {
            &[]
        } else {
            &self.parts[..self.parts.len() - 1]
        }
    }

    /// A new path with `key` appended.
    pub fn new_subpath(&self, key: impl Into<String>) -> Self {
        let mut parts = self.parts.clone();
        parts.push(key.into());
        Self {
            delimiter: self.delimiter,
            parts,
        }
    }

    pub fn add_subpath(&mut self, key: impl Into<String>) {
        self.parts.push(key.into());
    }

    pub fn add_ancestor(&mut self, key: impl Into<String>) {
        self.parts.insert(0, key.into());
    }

    /// Remove the first segment (the `exports:` / `self:` root of query
    /// paths) and return the shortened path.
    pub fn drop_first(mut self) -> Self {
        if !self.parts.is_empty() {
            self.parts.remove(0);
        }
        self
    }

    /// Strict prefix test: `a:b` is an ancestor of `a:b:c` but not of
    /// itself.
    pub fn is_ancestor_of(&self, other: &DictPath) -> bool {
        if other.parts.len() <= self.parts.len() {
            return false;
        }
        self.parts
            .iter()
            .zip(other.parts.iter())
            .all(|(a, b)| a == b)
    }

    /// Look up this path in a rendered JSON tree. Sequence levels interpret
    /// the segment as an integer index.
    pub fn get<'a>(&self, base: &'a Json) -> Option<&'a Json> {
        let mut current = base;
        for part in &self.parts {
            current = match current {
                Json::Object(map) => map.get(part)?,
                Json::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether this path leads to a value in a rendered JSON tree.
    pub fn exists_in(&self, base: &Json) -> bool {
        self.get(base).is_some()
    }
}

impl fmt::Display for DictPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                f.write_str(&self.delimiter.to_string())?;
            }
            first = false;
            // re-escape embedded delimiters so the string form round-trips
            for c in part.chars() {
                if c == self.delimiter {
                    f.write_str("\\")?;
                }
                f.write_str(&c.to_string())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DictPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DictPath({:?}, {})", self.delimiter, self)
    }
}
