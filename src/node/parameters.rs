//! Parameter trees: deep merge and interpolation
//!
//! Merging walks the incoming tree: dictionaries union key by key with
//! control prefixes stripped into flags, everything else chains up in a
//! [`ValueList`] for the interpolator to settle. Merging is not idempotent;
//! lists extend and chains record order of appearance.
//!
//! Interpolation is a fixed point over a work-set of unresolved paths, not
//! a topological order: rendering a reference may splice in a container
//! whose leaves carry fresh references, which re-enter the set. Cycles are
//! caught by the in-progress marker on the path that closed the loop.

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::tree::{self, Dict, List, Node};
use crate::path::DictPath;
use crate::value::list::ValueList;
use crate::value::query::Inventory;
use crate::value::{item::Item, Value};

/// Resolution state of one registered path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderState {
    Pending,
    InProgress,
}

/// An inventory query discovered during flattening, with everything the
/// compiler needs to decide how much of the inventory to render.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub path: DictPath,
    pub uri: String,
    pub display: String,
    pub inv_refs: Vec<DictPath>,
    pub ignore_failed_render: bool,
}

/// A tree of parameters merged from many documents.
#[derive(Debug, Clone)]
pub struct Parameters {
    root: Dict,
    uri: String,
    parse_strings: bool,
    flattened: bool,
    unrendered: IndexMap<DictPath, RenderState>,
    inv_queries: Vec<PendingQuery>,
    needs_all_envs: bool,
    resolve_errors: Vec<Error>,
}

impl Parameters {
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            root: Dict::new(uri.clone()),
            uri,
            parse_strings: true,
            flattened: false,
            unrendered: IndexMap::new(),
            inv_queries: Vec::new(),
            needs_all_envs: false,
            resolve_errors: Vec::new(),
        }
    }

    /// Build from a raw mapping, parsing embedded reference strings.
    pub fn from_mapping(
        mapping: &Json,
        settings: &Settings,
        uri: impl Into<String>,
    ) -> Result<Self> {
        let mut params = Self::new(uri);
        params.merge_mapping(mapping, settings)?;
        Ok(params)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = uri.into();
    }

    pub fn root(&self) -> &Dict {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.root.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.entries.is_empty()
    }

    pub fn as_dict(&self) -> Json {
        tree::dict_to_json(&self.root)
    }

    /// Merge a raw mapping into this tree under this tree's uri.
    pub fn merge_mapping(&mut self, mapping: &Json, settings: &Settings) -> Result<()> {
        let root_path = DictPath::new(settings.delimiter);
        let wrapped = wrap_json(mapping, settings, &self.uri, self.parse_strings, &root_path)?;
        self.merge_wrapped(wrapped, settings)
    }

    /// Merge another parameter tree into this one. The other tree is left
    /// untouched; its nodes are cloned into the merge chains here.
    pub fn merge(&mut self, other: &Parameters, settings: &Settings) -> Result<()> {
        self.merge_wrapped(Node::Dict(other.root.clone()), settings)
    }

    fn merge_wrapped(&mut self, wrapped: Node, settings: &Settings) -> Result<()> {
        self.flattened = false;
        self.unrendered.clear();
        self.inv_queries.clear();
        self.needs_all_envs = false;
        self.resolve_errors.clear();
        let root = std::mem::take(&mut self.root);
        match merge_node(Some(Node::Dict(root)), wrapped, settings)? {
            Node::Dict(merged) => {
                self.root = merged;
                Ok(())
            }
            other => {
                // a non-dict at the very top cannot happen through the
                // public API; restore something sane and refuse
                self.root = Dict::new(self.uri.clone());
                Err(Error::TypeMerge {
                    over: other.kind(),
                    under: "dictionary",
                    context: String::new(),
                    uri: self.uri.clone(),
                    nodename: String::new(),
                })
            }
        }
    }

    // -- interpolation ----------------------------------------------------

    /// Flatten the merged tree: fold simple chains, materialize literal
    /// containers, and register every path that still needs rendering.
    pub fn initialise_interpolation(&mut self, settings: &Settings) -> Result<()> {
        if self.flattened {
            return Ok(());
        }
        self.unrendered.clear();
        self.inv_queries.clear();
        self.needs_all_envs = false;
        self.resolve_errors.clear();
        let root = std::mem::take(&mut self.root);
        let root_path = DictPath::new(settings.delimiter);
        let mut flattener = Flattener {
            unrendered: &mut self.unrendered,
            queries: &mut self.inv_queries,
            needs_all_envs: &mut self.needs_all_envs,
        };
        self.root = flattener.dict(root, &root_path, settings)?;
        self.flattened = true;
        Ok(())
    }

    /// Resolve every registered path to a fixed point. The inventory is
    /// needed only when queries were discovered during flattening.
    pub fn interpolate(
        &mut self,
        inventory: Option<&Inventory>,
        settings: &Settings,
    ) -> Result<()> {
        self.initialise_interpolation(settings)?;
        while let Some(path) = self.first_unrendered() {
            self.interpolate_inner(&path, inventory, settings)?;
        }
        if !self.resolve_errors.is_empty() {
            return Err(Error::ResolveList(std::mem::take(&mut self.resolve_errors)));
        }
        Ok(())
    }

    pub fn has_inv_query(&self) -> bool {
        !self.inv_queries.is_empty()
    }

    pub fn queries(&self) -> &[PendingQuery] {
        &self.inv_queries
    }

    pub fn needs_all_envs(&self) -> bool {
        self.needs_all_envs
    }

    pub(crate) fn first_unrendered(&self) -> Option<DictPath> {
        self.unrendered.first().map(|(path, _)| path.clone())
    }

    pub(crate) fn contains_unrendered(&self, path: &DictPath) -> bool {
        self.unrendered.contains_key(path)
    }

    pub(crate) fn unrendered_paths(&self) -> Vec<DictPath> {
        self.unrendered.keys().cloned().collect()
    }

    pub(crate) fn remove_unrendered(&mut self, path: &DictPath) {
        self.unrendered.shift_remove(path);
    }

    pub(crate) fn get_leaf(&self, path: &DictPath) -> Option<ValueList> {
        match tree::get(&self.root, path) {
            Some(Node::Leaf(vl)) => Some(vl.clone()),
            _ => None,
        }
    }

    /// Delete a path outright, as the single-query fast path does for rows
    /// that fail to render under `+IgnoreErrors`.
    pub(crate) fn delete_path(&mut self, path: &DictPath) {
        tree::delete(&mut self.root, path);
        self.unrendered.shift_remove(path);
    }

    /// Write a rendered value back, re-flattening containers so any leaves
    /// they carry (e.g. copied in through a reference) re-enter the
    /// work-set at their new location.
    pub(crate) fn write_rendered(
        &mut self,
        path: &DictPath,
        node: Node,
        settings: &Settings,
    ) -> Result<()> {
        let node = match node {
            Node::Dict(d) => {
                let mut flattener = Flattener {
                    unrendered: &mut self.unrendered,
                    queries: &mut self.inv_queries,
                    needs_all_envs: &mut self.needs_all_envs,
                };
                Node::Dict(flattener.dict(d, path, settings)?)
            }
            Node::List(l) => {
                let mut flattener = Flattener {
                    unrendered: &mut self.unrendered,
                    queries: &mut self.inv_queries,
                    needs_all_envs: &mut self.needs_all_envs,
                };
                Node::List(flattener.list(l, path, settings)?)
            }
            other => other,
        };
        tree::set(&mut self.root, path, node);
        Ok(())
    }

    fn interpolate_inner(
        &mut self,
        path: &DictPath,
        inventory: Option<&Inventory>,
        settings: &Settings,
    ) -> Result<()> {
        let Some(mut value) = self.get_leaf(path) else {
            // a referenced container was copied here and rendered through
            // its new location already
            self.unrendered.shift_remove(path);
            return Ok(());
        };
        self.unrendered
            .insert(path.clone(), RenderState::InProgress);
        self.interpolate_references(path, &mut value, inventory, settings)?;
        let rendered = match value.render(Some(&self.root), inventory, settings) {
            Ok(node) => node,
            Err(e) if e.is_resolve_error() && settings.group_errors => {
                self.resolve_errors.push(e.with_context(&path.to_string()));
                Node::Done(Json::Null)
            }
            Err(e) => return Err(e.with_context(&path.to_string())),
        };
        self.write_rendered(path, rendered, settings)?;
        self.unrendered.shift_remove(path);
        Ok(())
    }

    /// Make sure everything `value` refers to is settled: resolve pending
    /// referenced paths (and pending ancestors of referenced paths) first,
    /// then re-assemble until the reference set stops growing.
    pub(crate) fn interpolate_references(
        &mut self,
        path: &DictPath,
        value: &mut ValueList,
        inventory: Option<&Inventory>,
        settings: &Settings,
    ) -> Result<()> {
        loop {
            for reference in value.refs().to_vec() {
                let ref_path = DictPath::from_string(settings.delimiter, &reference);
                match self.unrendered.get(&ref_path) {
                    Some(RenderState::InProgress) => {
                        return Err(Error::InfiniteRecursion {
                            reference,
                            context: path.to_string(),
                            uri: value.uri(),
                            nodename: String::new(),
                        });
                    }
                    Some(RenderState::Pending) => {
                        self.interpolate_inner(&ref_path, inventory, settings)?;
                    }
                    None => {
                        // the path may live under a still-pending ancestor,
                        // e.g. when a:b is itself a reference to a dict
                        let mut ancestor = DictPath::new(settings.delimiter);
                        for part in ref_path.key_parts() {
                            ancestor.add_subpath(part.clone());
                            match self.unrendered.get(&ancestor) {
                                Some(RenderState::Pending) => {
                                    self.interpolate_inner(&ancestor, inventory, settings)?;
                                }
                                Some(RenderState::InProgress) => {
                                    return Err(Error::InfiniteRecursion {
                                        reference: ancestor.to_string(),
                                        context: path.to_string(),
                                        uri: value.uri(),
                                        nodename: String::new(),
                                    });
                                }
                                None => {}
                            }
                        }
                    }
                }
            }
            if value.all_refs() {
                return Ok(());
            }
            let before = value.refs().len();
            value.assemble_refs(Some(&self.root), settings);
            if value.refs().len() == before {
                return Err(Error::BadReferences {
                    refs: value.refs().to_vec(),
                    context: path.to_string(),
                    uri: value.uri(),
                    nodename: String::new(),
                });
            }
        }
    }
}

// -- merge machinery ------------------------------------------------------

enum Flag {
    Overwrite,
    Constant,
}

/// Merge `new` over `cur` following the type rules: dictionaries merge key
/// by key, everything else accumulates into a value chain for the
/// interpolator to settle.
pub(crate) fn merge_node(cur: Option<Node>, new: Node, settings: &Settings) -> Result<Node> {
    match new {
        Node::Dict(new_dict) => match cur {
            None => {
                let mut base = Dict::new(new_dict.uri.clone());
                merge_dict(&mut base, new_dict, settings)?;
                Ok(Node::Dict(base))
            }
            Some(Node::Dict(mut cur_dict)) => {
                merge_dict(&mut cur_dict, new_dict, settings)?;
                Ok(Node::Dict(cur_dict))
            }
            Some(other) => update_value(other, Node::Dict(new_dict), settings),
        },
        other_new => match cur {
            None => Ok(other_new),
            Some(cur_node) => update_value(cur_node, other_new, settings),
        },
    }
}

fn merge_dict(cur: &mut Dict, new: Dict, settings: &Settings) -> Result<()> {
    use indexmap::map::Entry;

    let new_uri = new.uri;
    for (key, incoming) in new.entries {
        let (key, flag) = strip_prefix(key, settings);
        let incoming = match flag {
            None => incoming,
            Some(flag) => Node::Leaf(flagged(incoming, flag, &new_uri, settings)?),
        };
        match cur.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                let previous = std::mem::replace(slot.get_mut(), Node::Done(Json::Null));
                *slot.get_mut() = merge_node(Some(previous), incoming, settings)?;
            }
            Entry::Vacant(slot) => {
                slot.insert(merge_node(None, incoming, settings)?);
            }
        }
    }
    cur.uri = new_uri;
    Ok(())
}

fn strip_prefix(key: String, settings: &Settings) -> (String, Option<Flag>) {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == settings.dict_key_override_prefix => {
            (chars.collect(), Some(Flag::Overwrite))
        }
        Some(c) if c == settings.dict_key_constant_prefix => {
            (chars.collect(), Some(Flag::Constant))
        }
        _ => (key, None),
    }
}

/// Wrap a prefixed entry into a flagged value chain.
fn flagged(node: Node, flag: Flag, uri: &str, settings: &Settings) -> Result<ValueList> {
    let mut chain = match node {
        Node::Leaf(chain) => chain,
        Node::Dict(d) => {
            let item_uri = d.uri.clone();
            ValueList::from_value(Value::from_item(Item::Dict(d), settings, item_uri), settings)
        }
        Node::List(l) => {
            let item_uri = l.uri.clone();
            ValueList::from_value(Value::from_item(Item::List(l), settings, item_uri), settings)
        }
        Node::Done(j) => ValueList::from_value(Value::new(&j, settings, uri, false)?, settings),
    };
    match flag {
        Flag::Overwrite => chain.apply_overwrite(settings),
        Flag::Constant => chain.apply_constant(settings),
    }
    Ok(chain)
}

/// Chain `new` onto whatever was at this key before.
fn update_value(cur: Node, new: Node, settings: &Settings) -> Result<Node> {
    let mut chain = match cur {
        Node::Leaf(chain) => chain,
        Node::Dict(d) => {
            let item_uri = d.uri.clone();
            ValueList::from_value(Value::from_item(Item::Dict(d), settings, item_uri), settings)
        }
        Node::List(l) => {
            let item_uri = l.uri.clone();
            ValueList::from_value(Value::from_item(Item::List(l), settings, item_uri), settings)
        }
        Node::Done(j) => ValueList::from_value(Value::new(&j, settings, "", false)?, settings),
    };
    match new {
        Node::Leaf(other) => chain.extend(other, settings),
        Node::Dict(d) => {
            let item_uri = d.uri.clone();
            chain.push(Value::from_item(Item::Dict(d), settings, item_uri), settings);
        }
        Node::List(l) => {
            let item_uri = l.uri.clone();
            chain.push(Value::from_item(Item::List(l), settings, item_uri), settings);
        }
        Node::Done(j) => chain.push(Value::new(&j, settings, "", false)?, settings),
    }
    Ok(Node::Leaf(chain))
}

/// Wrap raw JSON into tree form, parsing reference strings in scalars.
/// Keys keep any control prefixes; merging strips them.
fn wrap_json(
    value: &Json,
    settings: &Settings,
    uri: &str,
    parse_strings: bool,
    path: &DictPath,
) -> Result<Node> {
    match value {
        Json::Object(map) => {
            let mut dict = Dict::new(uri);
            for (key, child) in map {
                let sub = path.new_subpath(key.clone());
                dict.entries.insert(
                    key.clone(),
                    wrap_json(child, settings, uri, parse_strings, &sub)?,
                );
            }
            Ok(Node::Dict(dict))
        }
        Json::Array(items) => {
            let mut list = List::new(uri);
            for (n, child) in items.iter().enumerate() {
                let sub = path.new_subpath(n.to_string());
                list.items
                    .push(wrap_json(child, settings, uri, parse_strings, &sub)?);
            }
            Ok(Node::List(list))
        }
        scalar => {
            let value = Value::new(scalar, settings, uri, parse_strings)
                .map_err(|e| e.with_context(&path.to_string()))?;
            Ok(Node::Leaf(ValueList::from_value(value, settings)))
        }
    }
}

// -- flattening -----------------------------------------------------------

struct Flattener<'a> {
    unrendered: &'a mut IndexMap<DictPath, RenderState>,
    queries: &'a mut Vec<PendingQuery>,
    needs_all_envs: &'a mut bool,
}

impl Flattener<'_> {
    fn dict(&mut self, dict: Dict, path: &DictPath, settings: &Settings) -> Result<Dict> {
        let mut out = Dict::new(dict.uri);
        for (key, node) in dict.entries {
            let sub = path.new_subpath(key.clone());
            out.entries.insert(key, self.node(node, &sub, settings)?);
        }
        Ok(out)
    }

    fn list(&mut self, list: List, path: &DictPath, settings: &Settings) -> Result<List> {
        let mut out = List::new(list.uri);
        for (n, node) in list.items.into_iter().enumerate() {
            let sub = path.new_subpath(n.to_string());
            out.items.push(self.node(node, &sub, settings)?);
        }
        Ok(out)
    }

    fn node(&mut self, node: Node, path: &DictPath, settings: &Settings) -> Result<Node> {
        match node {
            Node::Dict(d) => Ok(Node::Dict(self.dict(d, path, settings)?)),
            Node::List(l) => Ok(Node::List(self.list(l, path, settings)?)),
            done @ Node::Done(_) => Ok(done),
            Node::Leaf(chain) => {
                if chain.is_complex() {
                    self.register(path, &chain);
                    return Ok(Node::Leaf(chain));
                }
                let uri = chain.uri();
                let folded = chain
                    .fold(settings)
                    .map_err(|e| e.with_context(&path.to_string()).with_uri(&uri))?;
                if folded.is_container() {
                    return self.node(folded.into_node(settings), path, settings);
                }
                if folded.is_complex() {
                    let chain = ValueList::from_value(folded, settings);
                    self.register(path, &chain);
                    return Ok(Node::Leaf(chain));
                }
                folded.render(None, None, settings)
            }
        }
    }

    fn register(&mut self, path: &DictPath, chain: &ValueList) {
        self.unrendered.insert(path.clone(), RenderState::Pending);
        if chain.has_inv_query() {
            self.queries.push(PendingQuery {
                path: path.clone(),
                uri: chain.uri(),
                display: chain.to_string(),
                inv_refs: chain.inv_refs(),
                ignore_failed_render: chain.ignore_failed_render(),
            });
            if chain.needs_all_envs() {
                *self.needs_all_envs = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::default()
    }

    fn params(mapping: Json, uri: &str) -> Parameters {
        Parameters::from_mapping(&mapping, &settings(), uri).unwrap()
    }

    fn merged(docs: &[(Json, &str)]) -> Parameters {
        let s = settings();
        let mut iter = docs.iter();
        let (first, uri) = iter.next().unwrap();
        let mut base = params(first.clone(), uri);
        for (doc, uri) in iter {
            let other = params(doc.clone(), uri);
            base.merge(&other, &s).unwrap();
        }
        base
    }

    fn interpolated(docs: &[(Json, &str)]) -> Json {
        let mut base = merged(docs);
        base.interpolate(None, &settings()).unwrap();
        base.as_dict()
    }

    #[test]
    fn test_merge_empty_is_identity() {
        let s = settings();
        let mut p = params(json!({"a": 1, "b": {"c": [1, 2]}}), "u1");
        let before = {
            let mut q = p.clone();
            q.interpolate(None, &s).unwrap();
            q.as_dict()
        };
        p.merge_mapping(&json!({}), &s).unwrap();
        p.interpolate(None, &s).unwrap();
        assert_eq!(p.as_dict(), before);
    }

    #[test]
    fn test_dict_merge_is_associative() {
        let s = settings();
        let a = json!({"x": {"p": 1}, "l": 1});
        let b = json!({"x": {"q": 2}, "l": 2});
        let c = json!({"x": {"p": 3}, "m": 4});

        let mut left = params(a.clone(), "ua");
        left.merge(&params(b.clone(), "ub"), &s).unwrap();
        left.merge(&params(c.clone(), "uc"), &s).unwrap();
        left.interpolate(None, &s).unwrap();

        let mut bc = params(b, "ub");
        bc.merge(&params(c, "uc"), &s).unwrap();
        let mut right = params(a, "ua");
        right.merge(&bc, &s).unwrap();
        right.interpolate(None, &s).unwrap();

        assert_eq!(left.as_dict(), right.as_dict());
    }

    #[test]
    fn test_simple_substitution() {
        let out = interpolated(&[(json!({"foo": "bar", "greet": "hello ${foo}"}), "u1")]);
        assert_eq!(out, json!({"foo": "bar", "greet": "hello bar"}));
    }

    #[test]
    fn test_list_extension_across_merges() {
        let out = interpolated(&[
            (json!({"list": [1, 2, 3]}), "u1"),
            (json!({"list": [4, 5, 6]}), "u2"),
        ]);
        assert_eq!(out, json!({"list": [1, 2, 3, 4, 5, 6]}));
    }

    #[test]
    fn test_override_prefix_replaces_dict() {
        let out = interpolated(&[
            (json!({"a": {"one": 1, "two": 2}}), "u1"),
            (json!({"~a": {"three": 3}}), "u2"),
        ]);
        assert_eq!(out, json!({"a": {"three": 3}}));
    }

    #[test]
    fn test_constant_guard_raises_with_both_uris() {
        let docs = [
            (json!({"one": {"a": 1}}), "u1"),
            (json!({"one": {"=a": 2}}), "u2"),
            (json!({"one": {"a": 3}}), "u3"),
        ];
        let mut base = merged(&docs);
        let err = base.interpolate(None, &settings()).unwrap_err();
        match err {
            Error::ChangedConstant { uri, .. } => {
                assert!(uri.contains("u2"), "{}", uri);
                assert!(uri.contains("u3"), "{}", uri);
            }
            other => panic!("expected changed constant, got {:?}", other),
        }
    }

    #[test]
    fn test_constant_guard_relaxed_keeps_constant_value() {
        let mut s = settings();
        s.strict_constant_parameters = false;
        let mut base = merged(&[
            (json!({"one": {"a": 1}}), "u1"),
            (json!({"one": {"=a": 2}}), "u2"),
            (json!({"one": {"a": 3}}), "u3"),
        ]);
        base.interpolate(None, &s).unwrap();
        assert_eq!(base.as_dict(), json!({"one": {"a": 2}}));
    }

    #[test]
    fn test_nested_indirect_reference() {
        let out = interpolated(&[(
            json!({"one": {"a": 1, "b": "${one:${one:c}}", "c": "a"}}),
            "u1",
        )]);
        assert_eq!(out, json!({"one": {"a": 1, "b": 1, "c": "a"}}));
    }

    #[test]
    fn test_escaped_reference_stays_literal() {
        let out = interpolated(&[(json!({"bar": "x", "a": "\\${bar}"}), "u1")]);
        assert_eq!(out, json!({"bar": "x", "a": "${bar}"}));
    }

    #[test]
    fn test_double_escape_emits_backslash_and_resolves() {
        let out = interpolated(&[(json!({"bar": "x", "a": "\\\\${bar}"}), "u1")]);
        assert_eq!(out, json!({"bar": "x", "a": "\\x"}));
    }

    #[test]
    fn test_cycle_detection() {
        let mut base = merged(&[(json!({"foo": "${bar}", "bar": "${foo}"}), "u1")]);
        let err = base.interpolate(None, &settings()).unwrap_err();
        match err {
            Error::InfiniteRecursion { reference, .. } => {
                assert!(reference == "foo" || reference == "bar");
            }
            other => panic!("expected infinite recursion, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_to_dict_expands_and_merges() {
        let out = interpolated(&[
            (json!({"src": {"x": 1}, "dst": "${src}"}), "u1"),
            (json!({"dst": {"y": 2}}), "u2"),
        ]);
        assert_eq!(
            out,
            json!({"src": {"x": 1}, "dst": {"x": 1, "y": 2}})
        );
    }

    #[test]
    fn test_reference_copy_is_deep() {
        // merging into the destination must not leak into the source
        let out = interpolated(&[
            (json!({"src": {"x": {"deep": 1}}, "dst": "${src}"}), "u1"),
            (json!({"dst": {"x": {"more": 2}}}), "u2"),
        ]);
        assert_eq!(out["src"], json!({"x": {"deep": 1}}));
        assert_eq!(out["dst"], json!({"x": {"deep": 1, "more": 2}}));
    }

    #[test]
    fn test_referenced_container_with_inner_references() {
        let out = interpolated(&[(
            json!({"base": {"greet": "hi ${name}"}, "name": "n1", "alias": "${base}"}),
            "u1",
        )]);
        assert_eq!(out["alias"], json!({"greet": "hi n1"}));
    }

    #[test]
    fn test_missing_reference_is_resolve_error() {
        let mut base = merged(&[(json!({"a": "${nope}"}), "u1")]);
        let err = base.interpolate(None, &settings()).unwrap_err();
        assert!(matches!(err, Error::ResolveList(_)));
    }

    #[test]
    fn test_group_errors_collects_all_missing() {
        let mut base = merged(&[(json!({"a": "${nope}", "b": "${gone}"}), "u1")]);
        let err = base.interpolate(None, &settings()).unwrap_err();
        match err {
            Error::ResolveList(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected grouped errors, got {:?}", other),
        }
    }

    #[test]
    fn test_single_error_mode_fails_fast() {
        let mut s = settings();
        s.group_errors = false;
        let mut base = merged(&[(json!({"a": "${nope}", "b": "${gone}"}), "u1")]);
        let err = base.interpolate(None, &s).unwrap_err();
        assert!(matches!(err, Error::Resolve { .. }));
    }

    #[test]
    fn test_overwritten_missing_reference_survives() {
        let out = interpolated(&[
            (json!({"a": "${missing}"}), "u1"),
            (json!({"a": "fallback"}), "u2"),
        ]);
        assert_eq!(out, json!({"a": "fallback"}));
    }

    #[test]
    fn test_inv_queries_registered_during_flatten() {
        let s = settings();
        let mut base = merged(&[(json!({"exp": "$[ exports:a ]"}), "u1")]);
        base.initialise_interpolation(&s).unwrap();
        assert!(base.has_inv_query());
        assert_eq!(base.queries().len(), 1);
        let q = &base.queries()[0];
        assert_eq!(q.path.to_string(), "exp");
        let refs: Vec<String> = q.inv_refs.iter().map(|p| p.to_string()).collect();
        assert_eq!(refs, vec!["a"]);
    }

    #[test]
    fn test_interpolate_with_inventory() {
        let s = settings();
        let mut inv = Inventory::new();
        inv.insert("node1".to_string(), json!({"a": 1, "b": 2}));
        inv.insert("node2".to_string(), json!({"a": 3, "b": 4}));
        let mut base = merged(&[(json!({"exp": "$[ exports:a ]"}), "u1")]);
        base.interpolate(Some(&inv), &s).unwrap();
        assert_eq!(base.as_dict(), json!({"exp": {"node1": 1, "node2": 3}}));
    }

    #[test]
    fn test_deep_merge_unions_recursively() {
        let out = interpolated(&[
            (json!({"svc": {"port": 80, "tls": {"on": false}}}), "u1"),
            (json!({"svc": {"tls": {"on": true, "cert": "/c"}}}), "u2"),
        ]);
        assert_eq!(
            out,
            json!({"svc": {"port": 80, "tls": {"on": true, "cert": "/c"}}})
        );
    }

    #[test]
    fn test_scalar_over_dict_rejected_then_allowed() {
        let docs = [
            (json!({"a": {"x": 1}}), "u1"),
            (json!({"a": "flat"}), "u2"),
        ];
        let mut strict = merged(&docs);
        assert!(strict.interpolate(None, &settings()).is_err());

        let mut s = settings();
        s.allow_scalar_over_dict = true;
        let mut lenient = merged(&docs);
        lenient.interpolate(None, &s).unwrap();
        assert_eq!(lenient.as_dict(), json!({"a": "flat"}));
    }

    #[test]
    fn test_reference_in_list_item() {
        let out = interpolated(&[(json!({"v": "x", "l": ["${v}", "plain"]}), "u1")]);
        assert_eq!(out, json!({"v": "x", "l": ["x", "plain"]}));
    }
}
