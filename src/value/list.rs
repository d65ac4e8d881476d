//! Merge chains
//!
//! A `ValueList` records every value merged into one key, in chronological
//! order, so that type decisions can be deferred past merge time: a later
//! permissive setting may legalize what a stricter eager merge would have
//! refused. Chains whose members are all simple and of one type fold early;
//! everything else renders member by member during interpolation.

use std::fmt;

use serde_json::Value as Json;
use tracing::warn;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::parameters::merge_node;
use crate::node::tree::{json_to_tree, Dict, List, Node};
use crate::path::DictPath;
use crate::value::query::Inventory;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct ValueList {
    values: Vec<Value>,
    refs: Vec<String>,
    all_refs: bool,
    has_inv_query: bool,
    ignore_failed_render: bool,
    is_complex: bool,
}

impl ValueList {
    pub fn from_value(value: Value, settings: &Settings) -> Self {
        let mut list = Self {
            values: vec![value],
            refs: Vec::new(),
            all_refs: true,
            has_inv_query: false,
            ignore_failed_render: false,
            is_complex: false,
        };
        list.update(settings);
        list
    }

    pub fn push(&mut self, value: Value, settings: &Settings) {
        self.values.push(value);
        self.update(settings);
    }

    pub fn extend(&mut self, other: ValueList, settings: &Settings) {
        self.values.extend(other.values);
        self.update(settings);
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Combined provenance of the chain.
    pub fn uri(&self) -> String {
        self.values
            .iter()
            .map(|v| v.uri.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn update(&mut self, settings: &Settings) {
        self.gather_refs(None, settings);
        self.check_for_inv_query();
        let first_kind = self.values[0].item_kind();
        self.is_complex = self.values.iter().any(|v| {
            v.is_complex() || v.constant || v.overwrite || v.item_kind() != first_kind
        });
    }

    fn check_for_inv_query(&mut self) {
        self.has_inv_query = false;
        self.ignore_failed_render = true;
        for value in &self.values {
            if value.has_inv_query() {
                self.has_inv_query = true;
                if !value.ignore_failed_render() {
                    self.ignore_failed_render = false;
                }
            }
        }
        if !self.has_inv_query {
            self.ignore_failed_render = false;
        }
    }

    fn gather_refs(&mut self, context: Option<&Dict>, settings: &Settings) {
        self.refs = Vec::new();
        self.all_refs = true;
        for value in &mut self.values {
            value.assemble_refs(context, settings);
            self.refs.extend(value.refs().iter().cloned());
            if !value.all_refs() {
                self.all_refs = false;
            }
        }
    }

    /// Recompute references against a partially settled context.
    pub fn assemble_refs(&mut self, context: Option<&Dict>, settings: &Settings) {
        self.gather_refs(context, settings);
    }

    /// `~` prefix: the first value of the chain replaces whatever it later
    /// merges over.
    pub fn apply_overwrite(&mut self, settings: &Settings) {
        if let Some(first) = self.values.first_mut() {
            first.overwrite = true;
        }
        self.update(settings);
    }

    /// `=` prefix: the last value of the chain locks the key.
    pub fn apply_constant(&mut self, settings: &Settings) {
        if let Some(last) = self.values.last_mut() {
            last.constant = true;
        }
        self.update(settings);
    }

    pub fn refs(&self) -> &[String] {
        &self.refs
    }

    pub fn all_refs(&self) -> bool {
        self.all_refs
    }

    pub fn has_references(&self) -> bool {
        !self.refs.is_empty()
    }

    pub fn has_inv_query(&self) -> bool {
        self.has_inv_query
    }

    pub fn ignore_failed_render(&self) -> bool {
        self.ignore_failed_render
    }

    pub fn needs_all_envs(&self) -> bool {
        self.values.iter().any(|v| v.needs_all_envs())
    }

    pub fn inv_refs(&self) -> Vec<DictPath> {
        self.values.iter().flat_map(|v| v.inv_refs()).collect()
    }

    /// A chain is complex when any member carries references or queries,
    /// forces an overwrite, is constant, or disagrees on type with the
    /// rest. Complex chains wait for the interpolator.
    pub fn is_complex(&self) -> bool {
        self.is_complex
    }

    /// Fold a simple chain into a single value by pairwise `merge_over`.
    pub fn fold(mut self, settings: &Settings) -> Result<Value> {
        let mut output: Option<Value> = None;
        for value in self.values.drain(..) {
            output = Some(match output {
                None => value,
                Some(under) => value.merge_over(under, settings)?,
            });
        }
        Ok(output.expect("value lists are never empty"))
    }

    /// Render the chain: each member renders in order, later results merge
    /// over earlier ones under the type rules, honoring `overwrite`,
    /// `constant`, and the permissive settings.
    pub fn render(
        &self,
        context: Option<&Dict>,
        inventory: Option<&Inventory>,
        settings: &Settings,
    ) -> Result<Node> {
        let last = self.values.len() - 1;
        let mut output: Option<Node> = None;
        let mut last_error: Option<Error> = None;
        let mut constant = false;

        for (n, value) in self.values.iter().enumerate() {
            let new = match value.render(context, inventory, settings) {
                Ok(node) => normalize(node, &value.uri),
                Err(e) if e.is_resolve_error()
                    && settings.ignore_overwritten_missing_references
                    && !matches!(&output, Some(Node::Dict(_)) | Some(Node::List(_)))
                    && n != last =>
                {
                    warn!("reference '{}' undefined", value);
                    last_error = Some(e);
                    None
                }
                Err(e) => return Err(e),
            };

            if constant {
                if settings.strict_constant_parameters {
                    return Err(Error::ChangedConstant {
                        context: String::new(),
                        uri: format!("{}; {}", self.values[n - 1].uri, self.values[n].uri),
                        nodename: String::new(),
                    });
                }
                continue;
            }

            output = match output {
                None => new,
                Some(_) if value.overwrite => new,
                Some(previous) => Some(self.merge_rendered(previous, new, n, settings)?),
            };

            if value.constant {
                constant = true;
            }
        }

        if matches!(&output, Some(Node::Dict(_)) | Some(Node::List(_))) {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(output.unwrap_or(Node::Done(Json::Null)))
    }

    fn merge_rendered(
        &self,
        output: Node,
        new: Option<Node>,
        n: usize,
        settings: &Settings,
    ) -> Result<Node> {
        let type_error = || Error::TypeMerge {
            over: self.values[n].item_kind(),
            under: self.values[n - 1].item_kind(),
            context: String::new(),
            uri: self.uri(),
            nodename: String::new(),
        };
        let new_is_none = new.is_none();
        match output {
            Node::Dict(under) => match new {
                Some(Node::Dict(over)) => {
                    merge_node(Some(Node::Dict(under)), Node::Dict(over), settings)
                }
                Some(Node::List(_)) => Err(type_error()),
                other => {
                    if settings.allow_scalar_over_dict
                        || (settings.allow_none_override && new_is_none)
                    {
                        Ok(other.unwrap_or(Node::Done(Json::Null)))
                    } else {
                        Err(type_error())
                    }
                }
            },
            Node::List(mut under) => match new {
                Some(Node::List(over)) => {
                    under.items.extend(over.items);
                    under.uri = over.uri;
                    Ok(Node::List(under))
                }
                Some(Node::Dict(_)) => Err(type_error()),
                other => {
                    if settings.allow_scalar_over_list
                        || (settings.allow_none_override && new_is_none)
                    {
                        Ok(other.unwrap_or(Node::Done(Json::Null)))
                    } else {
                        Err(type_error())
                    }
                }
            },
            scalar => match new {
                Some(Node::Dict(over)) => {
                    if settings.allow_dict_over_scalar {
                        Ok(Node::Dict(over))
                    } else {
                        Err(type_error())
                    }
                }
                Some(Node::List(over)) => {
                    if settings.allow_list_over_scalar {
                        let mut list = List::new(over.uri.clone());
                        list.items.push(scalar);
                        list.items.extend(over.items);
                        Ok(Node::List(list))
                    } else {
                        Err(type_error())
                    }
                }
                other => Ok(other.unwrap_or(Node::Done(Json::Null))),
            },
        }
    }
}

/// Rendered nulls behave like an absent value in the merge rules, and
/// rendered JSON containers rejoin the tree so they can merge structurally.
fn normalize(node: Node, uri: &str) -> Option<Node> {
    match node {
        Node::Done(Json::Null) => None,
        Node::Done(j @ (Json::Object(_) | Json::Array(_))) => Some(json_to_tree(j, uri)),
        other => Some(other),
    }
}

impl fmt::Display for ValueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for value in &self.values {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}
