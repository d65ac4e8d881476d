//! Filesystem storage backend
//!
//! Nodes and classes live as `.yml`/`.yaml` files under two separate
//! directory trees. Classes map directory paths to dotted names, with
//! `init.yml` acting as the directory index; node names are plain file
//! stems unless `compose_node_name` folds the directory path in. The whole
//! inventory is enumerated up front, which is also where duplicate node
//! definitions are caught.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::entity::Entity;
use crate::storage::yamldata::Document;
use crate::storage::NodeStorage;

pub const STORAGE_NAME: &str = "yaml_fs";

const FILE_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

#[derive(Debug)]
pub struct YamlFsStorage {
    nodes_uri: PathBuf,
    classes_uri: PathBuf,
    nodes: BTreeMap<String, PathBuf>,
    classes: BTreeMap<String, PathBuf>,
}

impl YamlFsStorage {
    pub fn new(
        nodes_uri: impl Into<PathBuf>,
        classes_uri: impl Into<PathBuf>,
        compose_node_name: bool,
    ) -> Result<Self> {
        let nodes_uri = nodes_uri.into();
        let classes_uri = classes_uri.into();
        let node_mangler: Mangler = if compose_node_name {
            mangle_composed_node
        } else {
            mangle_node
        };
        let nodes = enumerate(&nodes_uri, node_mangler)?;
        let classes = enumerate(&classes_uri, mangle_class)?;
        Ok(Self {
            nodes_uri,
            classes_uri,
            nodes,
            classes,
        })
    }

    pub fn nodes_uri(&self) -> &Path {
        &self.nodes_uri
    }

    pub fn classes_uri(&self) -> &Path {
        &self.classes_uri
    }
}

impl NodeStorage for YamlFsStorage {
    fn name(&self) -> &str {
        STORAGE_NAME
    }

    fn get_node(&self, name: &str, settings: &Settings) -> Result<Entity> {
        let relpath = self.nodes.get(name).ok_or_else(|| Error::NodeNotFound {
            storage: STORAGE_NAME.to_string(),
            name: name.to_string(),
            uri: self.nodes_uri.display().to_string(),
        })?;
        Document::from_file(&self.nodes_uri.join(relpath))?.entity(name, settings)
    }

    fn get_class(&self, name: &str, _environment: &str, settings: &Settings) -> Result<Entity> {
        let relpath = self.classes.get(name).ok_or_else(|| Error::ClassNotFound {
            storage: STORAGE_NAME.to_string(),
            name: name.to_string(),
            uri: self.classes_uri.display().to_string(),
            nodename: String::new(),
        })?;
        Document::from_file(&self.classes_uri.join(relpath))?.entity(name, settings)
    }

    fn enumerate_nodes(&self) -> Result<Vec<String>> {
        Ok(self.nodes.keys().cloned().collect())
    }
}

/// Join and absolutize the nodes and classes uris, refusing equal or
/// overlapping trees.
pub fn path_mangler(
    base: Option<&Path>,
    nodes: Option<&Path>,
    classes: Option<&Path>,
) -> Result<(PathBuf, PathBuf)> {
    let cwd = std::env::current_dir()?;
    let base = match base {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => cwd.join(p),
        None => cwd,
    };
    let join = |leaf: Option<&Path>, default: &str| -> PathBuf {
        match leaf {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => base.join(p),
            None => base.join(default),
        }
    };
    let nodes_uri = join(nodes, "nodes");
    let classes_uri = join(classes, "classes");
    if nodes_uri == classes_uri {
        return Err(Error::DuplicateUri {
            uri: nodes_uri.display().to_string(),
        });
    }
    if nodes_uri.starts_with(&classes_uri) || classes_uri.starts_with(&nodes_uri) {
        return Err(Error::UriOverlap {
            nodes_uri: nodes_uri.display().to_string(),
            classes_uri: classes_uri.display().to_string(),
        });
    }
    Ok((nodes_uri, classes_uri))
}

type Mangler = fn(&Path, &str) -> String;

fn enumerate(basedir: &Path, mangler: Mangler) -> Result<BTreeMap<String, PathBuf>> {
    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    if !basedir.exists() {
        return Ok(found);
    }
    for entry in WalkDir::new(basedir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !FILE_EXTENSIONS.contains(&extension) {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem,
            None => continue,
        };
        let relpath = path
            .parent()
            .and_then(|dir| dir.strip_prefix(basedir).ok())
            .unwrap_or_else(|| Path::new(""));
        let name = mangler(relpath, stem);
        let relative_file = path.strip_prefix(basedir).unwrap_or(path).to_path_buf();
        if let Some(previous) = found.get(&name) {
            return Err(Error::DuplicateNodeName {
                storage: STORAGE_NAME.to_string(),
                name,
                uri1: basedir.join(previous).display().to_string(),
                uri2: path.display().to_string(),
            });
        }
        found.insert(name, relative_file);
    }
    Ok(found)
}

/// Nodes are identified by their basename alone.
fn mangle_node(_relpath: &Path, stem: &str) -> String {
    stem.to_string()
}

/// Composed node names fold the directory path in, except for
/// underscore-prefixed top directories.
fn mangle_composed_node(relpath: &Path, stem: &str) -> String {
    let parts: Vec<&str> = relpath
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() || parts[0].starts_with('_') {
        return stem.to_string();
    }
    let mut parts = parts;
    parts.push(stem);
    parts.join(".")
}

/// Classes map directory paths to dotted names; `init` is the directory
/// index, so `foo/init.yml` defines class `foo`, not `foo.init`.
fn mangle_class(relpath: &Path, stem: &str) -> String {
    let mut parts: Vec<&str> = relpath
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        return stem.to_string();
    }
    if stem != "init" {
        parts.push(stem);
    }
    parts.join(".")
}
