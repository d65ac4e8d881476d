//! Memoizing storage proxy
//!
//! Layers a write-once cache over any backend: nodes by name, classes by
//! `(environment, name)`, and the node list as a whole. Entities are cached
//! after the first successful fetch; failures are not cached.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::error::Result;
use crate::core::settings::Settings;
use crate::node::entity::Entity;
use crate::storage::NodeStorage;

pub struct MemcacheProxy {
    inner: Box<dyn NodeStorage>,
    nodes: Mutex<HashMap<String, Entity>>,
    classes: Mutex<HashMap<(String, String), Entity>>,
    nodelist: Mutex<Option<Vec<String>>>,
}

impl MemcacheProxy {
    pub fn new(inner: Box<dyn NodeStorage>) -> Self {
        Self {
            inner,
            nodes: Mutex::new(HashMap::new()),
            classes: Mutex::new(HashMap::new()),
            nodelist: Mutex::new(None),
        }
    }
}

impl NodeStorage for MemcacheProxy {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_node(&self, name: &str, settings: &Settings) -> Result<Entity> {
        if let Some(cached) = self.nodes.lock().get(name) {
            return Ok(cached.clone());
        }
        let entity = self.inner.get_node(name, settings)?;
        self.nodes
            .lock()
            .insert(name.to_string(), entity.clone());
        Ok(entity)
    }

    fn get_class(&self, name: &str, environment: &str, settings: &Settings) -> Result<Entity> {
        let key = (environment.to_string(), name.to_string());
        if let Some(cached) = self.classes.lock().get(&key) {
            return Ok(cached.clone());
        }
        let entity = self.inner.get_class(name, environment, settings)?;
        self.classes.lock().insert(key, entity.clone());
        Ok(entity)
    }

    fn enumerate_nodes(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.nodelist.lock().as_ref() {
            return Ok(cached.clone());
        }
        let names = self.inner.enumerate_nodes()?;
        *self.nodelist.lock() = Some(names.clone());
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingStorage {
        inner: MemoryStorage,
        node_fetches: Rc<Cell<usize>>,
        class_fetches: Rc<Cell<usize>>,
        enumerations: Rc<Cell<usize>>,
    }

    impl NodeStorage for CountingStorage {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn get_node(&self, name: &str, settings: &Settings) -> Result<Entity> {
            self.node_fetches.set(self.node_fetches.get() + 1);
            self.inner.get_node(name, settings)
        }

        fn get_class(&self, name: &str, environment: &str, settings: &Settings) -> Result<Entity> {
            self.class_fetches.set(self.class_fetches.get() + 1);
            self.inner.get_class(name, environment, settings)
        }

        fn enumerate_nodes(&self) -> Result<Vec<String>> {
            self.enumerations.set(self.enumerations.get() + 1);
            self.inner.enumerate_nodes()
        }
    }

    fn counting() -> (MemcacheProxy, Rc<Cell<usize>>, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let mut inner = MemoryStorage::new();
        inner.add_node("n1", "parameters:\n  a: 1\n").unwrap();
        inner.add_class("c1", "parameters:\n  b: 2\n").unwrap();
        let node_fetches = Rc::new(Cell::new(0));
        let class_fetches = Rc::new(Cell::new(0));
        let enumerations = Rc::new(Cell::new(0));
        let storage = CountingStorage {
            inner,
            node_fetches: node_fetches.clone(),
            class_fetches: class_fetches.clone(),
            enumerations: enumerations.clone(),
        };
        (
            MemcacheProxy::new(Box::new(storage)),
            node_fetches,
            class_fetches,
            enumerations,
        )
    }

    #[test]
    fn test_nodes_fetched_once() {
        let (proxy, node_fetches, _, _) = counting();
        let s = Settings::default();
        proxy.get_node("n1", &s).unwrap();
        proxy.get_node("n1", &s).unwrap();
        assert_eq!(node_fetches.get(), 1);
    }

    #[test]
    fn test_classes_cached_per_environment() {
        let (proxy, _, class_fetches, _) = counting();
        let s = Settings::default();
        proxy.get_class("c1", "base", &s).unwrap();
        proxy.get_class("c1", "base", &s).unwrap();
        assert_eq!(class_fetches.get(), 1);
        proxy.get_class("c1", "prod", &s).unwrap();
        assert_eq!(class_fetches.get(), 2);
    }

    #[test]
    fn test_failures_not_cached() {
        let (proxy, node_fetches, _, _) = counting();
        let s = Settings::default();
        assert!(proxy.get_node("ghost", &s).is_err());
        assert!(proxy.get_node("ghost", &s).is_err());
        assert_eq!(node_fetches.get(), 2);
    }

    #[test]
    fn test_node_list_cached() {
        let (proxy, _, _, enumerations) = counting();
        proxy.enumerate_nodes().unwrap();
        proxy.enumerate_nodes().unwrap();
        assert_eq!(enumerations.get(), 1);
    }
}
