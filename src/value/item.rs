//! Tagged value atoms
//!
//! Every parameter leaf parses into an `Item`: a plain scalar, a composite
//! string interleaving text with references, a `${…}` reference, a `$[…]`
//! inventory query, or a container captured whole (a list or dictionary
//! that entered a merge chain). Items know how to merge over one another
//! and how to render themselves against a parameter tree and an inventory.

use std::fmt;

use serde_json::Value as Json;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::parameters::merge_node;
use crate::node::tree::{self, Dict, List, Node};
use crate::path::DictPath;
use crate::value::query::{InvQuery, Inventory};

#[derive(Debug, Clone)]
pub enum Item {
    /// A literal scalar, carried as JSON.
    Scalar(Json),
    /// Text and references concatenated into one string at render time.
    Composite(Vec<Item>),
    /// A reference; its parts flatten to a lookup path once inner
    /// references are known.
    Reference(Vec<Item>),
    /// An inventory query.
    InvQuery(Box<InvQuery>),
    /// A list captured into a merge chain.
    List(List),
    /// A dictionary captured into a merge chain.
    Dict(Dict),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Scalar(_) => "scalar",
            Item::Composite(_) => "composite",
            Item::Reference(_) => "reference",
            Item::InvQuery(_) => "inventory query",
            Item::List(_) => "list",
            Item::Dict(_) => "dictionary",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Item::List(_) | Item::Dict(_))
    }

    pub fn same_kind(&self, other: &Item) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn has_inv_query(&self) -> bool {
        match self {
            Item::InvQuery(_) => true,
            Item::Composite(items) => items.iter().any(Item::has_inv_query),
            _ => false,
        }
    }

    pub fn needs_all_envs(&self) -> bool {
        match self {
            Item::InvQuery(q) => q.needs_all_envs(),
            Item::Composite(items) => items.iter().any(Item::needs_all_envs),
            _ => false,
        }
    }

    /// Whether a failed render of this item may be swallowed during the
    /// inventory pass. True only for queries that all opted in.
    pub fn ignore_failed_render(&self) -> bool {
        match self {
            Item::InvQuery(q) => q.ignore_failed_render(),
            Item::Composite(items) => {
                let queries: Vec<_> = items.iter().filter(|i| i.has_inv_query()).collect();
                !queries.is_empty() && queries.iter().all(|i| i.ignore_failed_render())
            }
            _ => false,
        }
    }

    /// Export paths of any embedded queries.
    pub fn inv_refs(&self) -> Vec<DictPath> {
        match self {
            Item::InvQuery(q) => q.inv_refs().to_vec(),
            Item::Composite(items) => items.iter().flat_map(Item::inv_refs).collect(),
            _ => Vec::new(),
        }
    }

    /// Discover the reference paths this item needs from `context`. The
    /// second half of the return says whether every reference could be
    /// assembled; a nested reference whose subject is itself unresolved
    /// leaves it false, and the interpolator retries once the context has
    /// settled further.
    pub fn assemble_refs(
        &self,
        context: Option<&Dict>,
        settings: &Settings,
    ) -> (Vec<String>, bool) {
        match self {
            Item::Scalar(_) | Item::List(_) | Item::Dict(_) => (Vec::new(), true),
            Item::InvQuery(q) => (q.refs().to_vec(), true),
            Item::Composite(items) => fold_refs(items, context, settings),
            Item::Reference(items) => {
                let (mut refs, mut all_refs) = fold_refs(items, context, settings);
                match flatten(items, context, None, settings) {
                    Ok(path) => refs.push(path),
                    Err(_) => all_refs = false,
                }
                (refs, all_refs)
            }
        }
    }

    /// Render against a parameter tree and inventory. References return the
    /// found subtree as-is, deep-cloned so later merges at the destination
    /// cannot reach back into the source.
    pub fn render(
        &self,
        context: Option<&Dict>,
        inventory: Option<&Inventory>,
        settings: &Settings,
    ) -> Result<Node> {
        match self {
            Item::Scalar(j) => Ok(Node::Done(j.clone())),
            Item::List(l) => Ok(Node::List(l.clone())),
            Item::Dict(d) => Ok(Node::Dict(d.clone())),
            Item::Composite(items) => {
                if items.len() == 1 {
                    // preserve the type of a lone embedded item
                    return items[0].render(context, inventory, settings);
                }
                let mut out = String::new();
                for item in items {
                    let node = item.render(context, inventory, settings)?;
                    out.push_str(&tree::node_to_string(&node));
                }
                Ok(Node::Done(Json::String(out)))
            }
            Item::Reference(items) => {
                let reference = flatten(items, context, inventory, settings)?;
                let path = DictPath::from_string(settings.delimiter, &reference);
                context
                    .and_then(|ctx| tree::get(ctx, &path))
                    .cloned()
                    .ok_or_else(|| Error::Resolve {
                        reference,
                        context: String::new(),
                        uri: String::new(),
                        nodename: String::new(),
                    })
            }
            Item::InvQuery(q) => {
                let inventory = inventory.ok_or_else(|| Error::Expression {
                    message: format!("inventory not available for $[{}]", q.raw()),
                    context: String::new(),
                    uri: String::new(),
                    nodename: String::new(),
                })?;
                q.render(context, inventory).map(Node::Done)
            }
        }
    }

    /// Merge this item over an earlier one, following the type table:
    /// scalars and composites replace, lists extend, dictionaries merge
    /// recursively. Mixed types are rejected here; the permissive settings
    /// only apply to rendered values, which take the ValueList path.
    pub fn merge_over(self, other: Item, settings: &Settings) -> Result<Item> {
        match (self, other) {
            (me @ (Item::Scalar(_) | Item::Composite(_)), Item::Scalar(_) | Item::Composite(_)) => {
                Ok(me)
            }
            (Item::List(me), Item::List(mut under)) => {
                under.items.extend(me.items);
                Ok(Item::List(under))
            }
            (Item::Dict(me), Item::Dict(under)) => {
                match merge_node(Some(Node::Dict(under)), Node::Dict(me), settings)? {
                    Node::Dict(merged) => Ok(Item::Dict(merged)),
                    other => Ok(Item::from_node(other)),
                }
            }
            (me, under) => Err(Error::TypeMerge {
                over: me.kind(),
                under: under.kind(),
                context: String::new(),
                uri: String::new(),
                nodename: String::new(),
            }),
        }
    }

    /// Re-wrap a tree node as an item, for containers entering a merge
    /// chain.
    pub fn from_node(node: Node) -> Item {
        match node {
            Node::Dict(d) => Item::Dict(d),
            Node::List(l) => Item::List(l),
            Node::Done(j) => Item::Scalar(j),
            Node::Leaf(vl) => Item::Scalar(Json::String(vl.to_string())),
        }
    }
}

fn fold_refs(items: &[Item], context: Option<&Dict>, settings: &Settings) -> (Vec<String>, bool) {
    let mut refs = Vec::new();
    let mut all_refs = true;
    for item in items {
        let (child_refs, child_all) = item.assemble_refs(context, settings);
        refs.extend(child_refs);
        all_refs &= child_all;
    }
    (refs, all_refs)
}

/// Concatenate a reference's parts into the path string it looks up.
/// Inner references render first, so `${one:${sub}}` needs `sub` settled
/// before the outer path exists.
fn flatten(
    items: &[Item],
    context: Option<&Dict>,
    inventory: Option<&Inventory>,
    settings: &Settings,
) -> Result<String> {
    let mut out = String::new();
    for item in items {
        match item {
            Item::Scalar(j) => out.push_str(&tree::json_to_string(j)),
            other => {
                let node = other.render(context, inventory, settings)?;
                out.push_str(&tree::node_to_string(&node));
            }
        }
    }
    Ok(out)
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Scalar(j) => f.write_str(&tree::json_to_string(j)),
            Item::Composite(items) => {
                for item in items {
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Item::Reference(items) => {
                f.write_str("${")?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
            Item::InvQuery(q) => write!(f, "$[{}]", q.raw()),
            Item::List(l) => f.write_str(
                &serde_json::to_string(&tree::list_to_json(l)).unwrap_or_default(),
            ),
            Item::Dict(d) => f.write_str(
                &serde_json::to_string(&tree::dict_to_json(d)).unwrap_or_default(),
            ),
        }
    }
}
