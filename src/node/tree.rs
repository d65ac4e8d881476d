//! The merged parameter tree
//!
//! Interior nodes are ordered dictionaries or lists; leaves are either a
//! chain of merged values still awaiting rendering (`Leaf`) or a fully
//! rendered JSON value (`Done`). Containers remember the uri of the document
//! that last wrote to them, which feeds error breadcrumbs.
//!
//! Subtrees are deep-cloned when a reference resolves to a container, so
//! later merges into the destination never leak back into the source.

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::path::DictPath;
use crate::value::list::ValueList;

/// One node of the merged tree.
#[derive(Debug, Clone)]
pub enum Node {
    Dict(Dict),
    List(List),
    /// Unrendered leaf: the chronological chain of merged values.
    Leaf(ValueList),
    /// Fully rendered value.
    Done(Json),
}

/// An ordered string-keyed mapping of child nodes.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    pub uri: String,
    pub entries: IndexMap<String, Node>,
}

/// An ordered sequence of child nodes.
#[derive(Debug, Clone, Default)]
pub struct List {
    pub uri: String,
    pub items: Vec<Node>,
}

impl Dict {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            entries: IndexMap::new(),
        }
    }
}

impl List {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            items: Vec::new(),
        }
    }
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Dict(_) => "dictionary",
            Node::List(_) => "list",
            Node::Leaf(_) => "value",
            Node::Done(_) => "scalar",
        }
    }
}

/// Look up `path` in a tree rooted at `base`. A segment applied to a list
/// is coerced to an integer index.
pub fn get<'a>(base: &'a Dict, path: &DictPath) -> Option<&'a Node> {
    let (first, rest) = path.parts().split_first()?;
    let mut current = base.entries.get(first)?;
    for part in rest {
        current = match current {
            Node::Dict(d) => d.entries.get(part)?,
            Node::List(l) => l.items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace the node at `path`, which must already exist. Returns false when
/// the path does not lead anywhere, leaving the tree untouched.
pub fn set(base: &mut Dict, path: &DictPath, node: Node) -> bool {
    match slot(base, path) {
        Some(slot) => {
            *slot = node;
            true
        }
        None => false,
    }
}

/// Delete the entry at `path` if present, preserving the order of the
/// surrounding container.
pub fn delete(base: &mut Dict, path: &DictPath) {
    let Some((key, parents)) = path.parts().split_last() else {
        return;
    };
    let parent = DictPath::from_parts(':', parents.to_vec());
    let container = if parent.is_empty() {
        Some(base)
    } else {
        match slot(base, &parent) {
            Some(Node::Dict(d)) => Some(d),
            Some(Node::List(l)) => {
                if let Ok(idx) = key.parse::<usize>() {
                    if idx < l.items.len() {
                        l.items.remove(idx);
                    }
                }
                return;
            }
            _ => None,
        }
    };
    if let Some(dict) = container {
        dict.entries.shift_remove(key);
    }
}

fn slot<'a>(base: &'a mut Dict, path: &DictPath) -> Option<&'a mut Node> {
    let (first, rest) = path.parts().split_first()?;
    let mut current = base.entries.get_mut(first)?;
    for part in rest {
        current = match current {
            Node::Dict(d) => d.entries.get_mut(part)?,
            Node::List(l) => l.items.get_mut(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Convert a tree to plain JSON. Leaves that never got rendered are dropped
/// from dictionaries (they only survive the single-query fast path, where
/// unqueried exports are deliberately left alone) and nulled in lists.
pub fn to_json(node: &Node) -> Json {
    match node {
        Node::Done(j) => j.clone(),
        Node::Dict(d) => dict_to_json(d),
        Node::List(l) => list_to_json(l),
        Node::Leaf(vl) => Json::String(vl.to_string()),
    }
}

pub fn list_to_json(list: &List) -> Json {
    Json::Array(
        list.items
            .iter()
            .map(|item| match item {
                Node::Leaf(_) => Json::Null,
                other => to_json(other),
            })
            .collect(),
    )
}

pub fn dict_to_json(dict: &Dict) -> Json {
    let mut map = serde_json::Map::new();
    for (key, child) in &dict.entries {
        if matches!(child, Node::Leaf(_)) {
            continue;
        }
        map.insert(key.clone(), to_json(child));
    }
    Json::Object(map)
}

/// Render a scalar the way it reads when embedded in a compound string.
pub fn json_to_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => "null".to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// String form of a rendered node, for splicing into compound strings.
pub fn node_to_string(node: &Node) -> String {
    match node {
        Node::Done(j) => json_to_string(j),
        Node::Leaf(vl) => vl.to_string(),
        other => serde_json::to_string(&to_json(other)).unwrap_or_default(),
    }
}

/// Re-wrap a rendered JSON container into tree form so it can take part in
/// further merges. Scalars stay `Done`.
pub fn json_to_tree(value: Json, uri: &str) -> Node {
    match value {
        Json::Object(map) => {
            let mut dict = Dict::new(uri);
            for (key, child) in map {
                dict.entries.insert(key, json_to_tree(child, uri));
            }
            Node::Dict(dict)
        }
        Json::Array(items) => {
            let mut list = List::new(uri);
            for item in items {
                list.items.push(json_to_tree(item, uri));
            }
            Node::List(list)
        }
        other => Node::Done(other),
    }
}
