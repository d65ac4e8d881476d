//! Storage backends
//!
//! Backends produce raw entities by name; the engine core never touches
//! the filesystem itself. Every backend is wrapped in the memoizing proxy,
//! so a class is loaded once per `(environment, name)` however many nodes
//! inherit it.

pub mod cache;
pub mod memory;
pub mod yaml_fs;
pub mod yamldata;

use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::entity::Entity;

pub use cache::MemcacheProxy;
pub use memory::MemoryStorage;
pub use yaml_fs::YamlFsStorage;
pub use yamldata::Document;

/// What the compiler requires from a storage backend.
pub trait NodeStorage {
    /// Backend label used in error messages, e.g. `yaml_fs`.
    fn name(&self) -> &str;

    fn get_node(&self, name: &str, settings: &Settings) -> Result<Entity>;

    fn get_class(&self, name: &str, environment: &str, settings: &Settings) -> Result<Entity>;

    fn enumerate_nodes(&self) -> Result<Vec<String>>;
}

/// Instantiate a backend by type name, wrapped in the memo cache.
pub fn get_storage(
    storage_type: &str,
    nodes_uri: &Path,
    classes_uri: &Path,
    compose_node_name: bool,
) -> Result<MemcacheProxy> {
    let backend: Box<dyn NodeStorage> = match storage_type {
        yaml_fs::STORAGE_NAME => Box::new(YamlFsStorage::new(
            nodes_uri,
            classes_uri,
            compose_node_name,
        )?),
        other => {
            return Err(Error::Config {
                message: format!("unknown storage type '{}'", other),
            })
        }
    };
    Ok(MemcacheProxy::new(backend))
}

/// Resolve the nodes/classes uris for a backend type.
pub fn path_mangler(
    storage_type: &str,
    base: Option<&Path>,
    nodes: Option<&Path>,
    classes: Option<&Path>,
) -> Result<(PathBuf, PathBuf)> {
    match storage_type {
        yaml_fs::STORAGE_NAME => yaml_fs::path_mangler(base, nodes, classes),
        other => Err(Error::Config {
            message: format!("unknown storage type '{}'", other),
        }),
    }
}
