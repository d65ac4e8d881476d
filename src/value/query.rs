//! Inventory queries
//!
//! An `InvQuery` is the parsed body of a `$[…]` occurrence. Rendering one
//! walks every `(node, exports-row)` pair in the inventory: VALUE queries
//! collect the value at a path wherever it exists, TEST queries filter rows
//! by a predicate first, and LIST_TEST queries emit the names of matching
//! nodes. Result order is the iteration order of the inventory mapping.

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::tree::Dict;
use crate::path::DictPath;
use crate::value::expr::{self, ExprKind, LogicTest, ParsedExpr};

/// The rendered exports of every node, keyed by node name.
pub type Inventory = IndexMap<String, Json>;

/// A parsed inventory query.
#[derive(Debug, Clone)]
pub struct InvQuery {
    kind: ExprKind,
    value_path: Option<DictPath>,
    question: LogicTest,
    refs: Vec<String>,
    inv_refs: Vec<DictPath>,
    ignore_errors: bool,
    all_envs: bool,
    raw: String,
}

impl InvQuery {
    pub fn parse(body: &str, settings: &Settings) -> Result<Self> {
        let ParsedExpr {
            kind,
            value_path,
            question,
            ignore_errors,
            all_envs,
        } = expr::parse_expression(body, settings.delimiter)?;

        let mut refs = Vec::new();
        let mut inv_refs = Vec::new();
        for test in question.tests() {
            inv_refs.push(test.export_path().clone());
            if let Some(param) = test.parameter_path() {
                refs.push(param.to_string());
            }
        }
        if let Some(path) = &value_path {
            inv_refs.push(path.clone());
        }

        Ok(Self {
            kind,
            value_path,
            question,
            refs,
            inv_refs,
            ignore_errors: ignore_errors || settings.inventory_ignore_failed_render,
            all_envs,
            raw: body.trim().to_string(),
        })
    }

    /// Paths into the querying node's own parameters (`self:` operands);
    /// the interpolator settles these before the query renders.
    pub fn refs(&self) -> &[String] {
        &self.refs
    }

    /// Export paths this query reads from every inventory row; the
    /// single-query fast path renders exactly these.
    pub fn inv_refs(&self) -> &[DictPath] {
        &self.inv_refs
    }

    pub fn ignore_failed_render(&self) -> bool {
        self.ignore_errors
    }

    pub fn needs_all_envs(&self) -> bool {
        self.all_envs
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Evaluate the query against the inventory. `context` is the querying
    /// node's parameter tree, needed by `self:` operands.
    pub fn render(&self, context: Option<&Dict>, inventory: &Inventory) -> Result<Json> {
        match self.kind {
            ExprKind::Value => {
                let path = self.require_value_path()?;
                let mut results = serde_json::Map::new();
                for (node, row) in inventory {
                    if let Some(found) = path.get(row) {
                        results.insert(node.clone(), found.clone());
                    }
                }
                Ok(Json::Object(results))
            }
            ExprKind::Test => {
                let path = self.require_value_path()?;
                let mut results = serde_json::Map::new();
                for (node, row) in inventory {
                    if self.question.passes(context, row)? {
                        if let Some(found) = path.get(row) {
                            results.insert(node.clone(), found.clone());
                        }
                    }
                }
                Ok(Json::Object(results))
            }
            ExprKind::ListTest => {
                let mut results = Vec::new();
                for (node, row) in inventory {
                    if self.question.passes(context, row)? {
                        results.push(Json::String(node.clone()));
                    }
                }
                Ok(Json::Array(results))
            }
        }
    }

    fn require_value_path(&self) -> Result<&DictPath> {
        self.value_path.as_ref().ok_or_else(|| Error::Expression {
            message: format!("failed to render '{}'", self.raw),
            context: String::new(),
            uri: String::new(),
            nodename: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::default()
    }

    fn inventory() -> Inventory {
        let mut inv = Inventory::new();
        inv.insert("node1".to_string(), json!({"a": 1, "b": 2}));
        inv.insert("node2".to_string(), json!({"a": 3, "b": 4}));
        inv
    }

    #[test]
    fn test_value_query_collects_per_node() {
        let q = InvQuery::parse("exports:a", &settings()).unwrap();
        let out = q.render(None, &inventory()).unwrap();
        assert_eq!(out, json!({"node1": 1, "node2": 3}));
    }

    #[test]
    fn test_value_query_skips_missing_paths() {
        let q = InvQuery::parse("exports:a", &settings()).unwrap();
        let mut inv = inventory();
        inv.insert("node3".to_string(), json!({"b": 9}));
        let out = q.render(None, &inv).unwrap();
        assert_eq!(out, json!({"node1": 1, "node2": 3}));
    }

    #[test]
    fn test_filtered_query() {
        let q = InvQuery::parse("exports:a if exports:b == 4", &settings()).unwrap();
        let out = q.render(None, &inventory()).unwrap();
        assert_eq!(out, json!({"node2": 3}));
    }

    #[test]
    fn test_list_test_query_keeps_inventory_order() {
        let mut inv = Inventory::new();
        inv.insert("n1".to_string(), json!({"b": 2}));
        inv.insert("n2".to_string(), json!({"b": 3}));
        inv.insert("n3".to_string(), json!({"b": 2}));
        let q = InvQuery::parse("if exports:b == 2", &settings()).unwrap();
        let out = q.render(None, &inv).unwrap();
        assert_eq!(out, json!(["n1", "n3"]));
    }

    #[test]
    fn test_refs_and_inv_refs() {
        let q = InvQuery::parse("exports:a if exports:b == self:want", &settings()).unwrap();
        assert_eq!(q.refs(), &["want".to_string()]);
        let inv_refs: Vec<String> = q.inv_refs().iter().map(|p| p.to_string()).collect();
        assert_eq!(inv_refs, vec!["b", "a"]);
    }

    #[test]
    fn test_options_override_settings_default() {
        let q = InvQuery::parse("+IgnoreErrors exports:a", &settings()).unwrap();
        assert!(q.ignore_failed_render());
        let q = InvQuery::parse("exports:a", &settings()).unwrap();
        assert!(!q.ignore_failed_render());
        let mut lenient = settings();
        lenient.inventory_ignore_failed_render = true;
        let q = InvQuery::parse("exports:a", &lenient).unwrap();
        assert!(q.ignore_failed_render());
    }

    #[test]
    fn test_all_envs_flag() {
        let q = InvQuery::parse("+AllEnvs if exports:b == 2", &settings()).unwrap();
        assert!(q.needs_all_envs());
    }
}
