//! Parameter values
//!
//! A `Value` wraps one parsed [`Item`] together with the uri of the
//! document it came from and the control flags carried over from `~` and
//! `=` key prefixes. A [`ValueList`](list::ValueList) chains the values
//! merged into one key in chronological order.

pub mod expr;
pub mod item;
pub mod list;
pub mod parse;
pub mod query;

use std::fmt;

use serde_json::Value as Json;

use crate::core::error::Result;
use crate::core::settings::Settings;
use crate::node::tree::{Dict, Node};
use crate::path::DictPath;
use crate::value::item::Item;
use crate::value::query::Inventory;

/// One merged-in value: an item plus provenance and control flags.
#[derive(Debug, Clone)]
pub struct Value {
    item: Item,
    pub uri: String,
    /// Force replacement of whatever was merged before (`~` prefix).
    pub overwrite: bool,
    /// Forbid later replacement (`=` prefix).
    pub constant: bool,
    refs: Vec<String>,
    all_refs: bool,
}

impl Value {
    /// Wrap a raw scalar. Strings are run through the reference grammar
    /// unless `parse_string` is off, in which case they stay literal.
    pub fn new(
        contents: &Json,
        settings: &Settings,
        uri: impl Into<String>,
        parse_string: bool,
    ) -> Result<Self> {
        let uri = uri.into();
        let item = match contents {
            Json::String(s) if parse_string => {
                parse::parse_str(s, settings).map_err(|e| e.with_uri(&uri))?
            }
            other => Item::Scalar(other.clone()),
        };
        Ok(Self::from_item(item, settings, uri))
    }

    /// Wrap an already-built item, computing its initial reference set.
    pub fn from_item(item: Item, settings: &Settings, uri: impl Into<String>) -> Self {
        let (refs, all_refs) = item.assemble_refs(None, settings);
        Self {
            item,
            uri: uri.into(),
            overwrite: false,
            constant: false,
            refs,
            all_refs,
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn item_kind(&self) -> &'static str {
        self.item.kind()
    }

    pub fn is_container(&self) -> bool {
        self.item.is_container()
    }

    /// Complex values cannot be folded before interpolation.
    pub fn is_complex(&self) -> bool {
        self.has_references() || self.has_inv_query()
    }

    pub fn has_references(&self) -> bool {
        !self.refs.is_empty()
    }

    pub fn has_inv_query(&self) -> bool {
        self.item.has_inv_query()
    }

    pub fn needs_all_envs(&self) -> bool {
        self.item.needs_all_envs()
    }

    pub fn ignore_failed_render(&self) -> bool {
        self.item.ignore_failed_render()
    }

    pub fn refs(&self) -> &[String] {
        &self.refs
    }

    pub fn all_refs(&self) -> bool {
        self.all_refs
    }

    pub fn inv_refs(&self) -> Vec<DictPath> {
        self.item.inv_refs()
    }

    /// Recompute the reference set against a (partially settled) context.
    pub fn assemble_refs(&mut self, context: Option<&Dict>, settings: &Settings) {
        let (refs, all_refs) = self.item.assemble_refs(context, settings);
        self.refs = refs;
        self.all_refs = all_refs;
    }

    pub fn render(
        &self,
        context: Option<&Dict>,
        inventory: Option<&Inventory>,
        settings: &Settings,
    ) -> Result<Node> {
        self.item
            .render(context, inventory, settings)
            .map_err(|e| e.with_uri(&self.uri))
    }

    /// Merge this value over an earlier one; flags and provenance of the
    /// later value win.
    pub fn merge_over(mut self, other: Value, settings: &Settings) -> Result<Value> {
        self.item = self
            .item
            .merge_over(other.item, settings)
            .map_err(|e| e.with_uri(&other.uri))?;
        Ok(self)
    }

    /// Turn the contained item into a tree node without rendering
    /// references; used when a simple container is materialized in place.
    pub fn into_node(self, settings: &Settings) -> Node {
        let Value {
            item,
            uri,
            overwrite,
            constant,
            refs,
            all_refs,
        } = self;
        match item {
            Item::Dict(d) => Node::Dict(d),
            Item::List(l) => Node::List(l),
            Item::Scalar(j) => Node::Done(j),
            other => Node::Leaf(list::ValueList::from_value(
                Value {
                    item: other,
                    uri,
                    overwrite,
                    constant,
                    refs,
                    all_refs,
                },
                settings,
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_parsed_string_value() {
        let s = settings();
        let v = Value::new(&json!("hello ${foo}"), &s, "u1", true).unwrap();
        assert!(v.has_references());
        assert_eq!(v.refs(), &["foo".to_string()]);
        assert!(v.is_complex());
        assert_eq!(v.item_kind(), "composite");
    }

    #[test]
    fn test_literal_string_value() {
        let s = settings();
        let v = Value::new(&json!("hello ${foo}"), &s, "u1", false).unwrap();
        assert!(!v.has_references());
        assert!(!v.is_complex());
        assert_eq!(v.item_kind(), "scalar");
    }

    #[test]
    fn test_scalar_value_renders_itself() {
        let s = settings();
        let v = Value::new(&json!(42), &s, "u1", true).unwrap();
        let node = v.render(None, None, &s).unwrap();
        assert!(matches!(node, Node::Done(j) if j == json!(42)));
    }

    #[test]
    fn test_parse_error_carries_uri() {
        let s = settings();
        let err = Value::new(&json!("${unclosed"), &s, "yaml_fs:///c/x.yml", true).unwrap_err();
        match err {
            crate::core::error::Error::Parse { uri, .. } => {
                assert_eq!(uri, "yaml_fs:///c/x.yml");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_display_echoes_source_form() {
        let s = settings();
        let v = Value::new(&json!("hello ${foo}"), &s, "u1", true).unwrap();
        assert_eq!(v.to_string(), "hello ${foo}");
    }
}
