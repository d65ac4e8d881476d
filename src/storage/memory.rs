//! In-memory storage backend
//!
//! Holds documents added programmatically. Useful for embedding the
//! compiler and for tests; node enumeration keeps insertion order.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::entity::Entity;
use crate::storage::yamldata::Document;
use crate::storage::NodeStorage;

pub const STORAGE_NAME: &str = "memory";

#[derive(Default)]
pub struct MemoryStorage {
    nodes: IndexMap<String, Document>,
    classes: HashMap<String, Document>,
    env_classes: HashMap<(String, String), Document>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str, yaml: &str) -> Result<()> {
        let doc = Document::from_str(yaml, format!("memory://nodes/{}", name))?;
        self.nodes.insert(name.to_string(), doc);
        Ok(())
    }

    pub fn add_class(&mut self, name: &str, yaml: &str) -> Result<()> {
        let doc = Document::from_str(yaml, format!("memory://classes/{}", name))?;
        self.classes.insert(name.to_string(), doc);
        Ok(())
    }

    /// Register a class visible only in one environment; environment-bound
    /// definitions shadow the plain one.
    pub fn add_class_in_env(&mut self, name: &str, environment: &str, yaml: &str) -> Result<()> {
        let doc = Document::from_str(
            yaml,
            format!("memory://classes/{}/{}", environment, name),
        )?;
        self.env_classes
            .insert((environment.to_string(), name.to_string()), doc);
        Ok(())
    }
}

impl NodeStorage for MemoryStorage {
    fn name(&self) -> &str {
        STORAGE_NAME
    }

    fn get_node(&self, name: &str, settings: &Settings) -> Result<Entity> {
        let doc = self.nodes.get(name).ok_or_else(|| Error::NodeNotFound {
            storage: STORAGE_NAME.to_string(),
            name: name.to_string(),
            uri: "nodes".to_string(),
        })?;
        doc.entity(name, settings)
    }

    fn get_class(&self, name: &str, environment: &str, settings: &Settings) -> Result<Entity> {
        let doc = self
            .env_classes
            .get(&(environment.to_string(), name.to_string()))
            .or_else(|| self.classes.get(name))
            .ok_or_else(|| Error::ClassNotFound {
                storage: STORAGE_NAME.to_string(),
                name: name.to_string(),
                uri: "classes".to_string(),
                nodename: String::new(),
            })?;
        doc.entity(name, settings)
    }

    fn enumerate_nodes(&self) -> Result<Vec<String>> {
        Ok(self.nodes.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_round_trip() {
        let mut storage = MemoryStorage::new();
        storage
            .add_node("n1", "classes: [base]\nparameters:\n  a: 1\n")
            .unwrap();
        storage.add_class("base", "parameters:\n  b: 2\n").unwrap();
        let node = storage.get_node("n1", &settings()).unwrap();
        assert_eq!(node.classes.as_list(), &["base"]);
        assert!(storage.get_class("base", "base", &settings()).is_ok());
        assert!(storage.get_class("ghost", "base", &settings()).is_err());
    }

    #[test]
    fn test_environment_bound_class_shadows() {
        let mut storage = MemoryStorage::new();
        storage.add_class("svc", "parameters:\n  tier: any\n").unwrap();
        storage
            .add_class_in_env("svc", "prod", "parameters:\n  tier: prod\n")
            .unwrap();
        let prod = storage.get_class("svc", "prod", &settings()).unwrap();
        assert!(prod.uri.contains("prod"));
        let base = storage.get_class("svc", "base", &settings()).unwrap();
        assert!(!base.uri.contains("prod"));
    }

    #[test]
    fn test_enumeration_keeps_insertion_order() {
        let mut storage = MemoryStorage::new();
        storage.add_node("zeta", "parameters: {}\n").unwrap();
        storage.add_node("alpha", "parameters: {}\n").unwrap();
        assert_eq!(storage.enumerate_nodes().unwrap(), vec!["zeta", "alpha"]);
    }
}
