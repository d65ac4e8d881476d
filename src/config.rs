//! Configuration file loading
//!
//! `nodeclass-config.yml` is searched in the working directory, the user's
//! home, and the inventory base. Its top-level keys mix command-line
//! defaults (storage type, uris, output) with engine settings; unlisted
//! settings keep their defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;

pub const CONFIG_FILE_NAME: &str = "nodeclass-config.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub storage_type: Option<String>,
    pub inventory_base_uri: Option<PathBuf>,
    pub nodes_uri: Option<PathBuf>,
    pub classes_uri: Option<PathBuf>,
    pub output: Option<String>,
    pub pretty_print: Option<bool>,
    pub no_refs: Option<bool>,
    pub class_mappings: Option<Vec<String>>,
    #[serde(flatten)]
    pub settings: Settings,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Error::Io(e),
        })?;
        serde_yaml::from_str(&raw).map_err(|source| Error::YamlParse {
            uri: path.display().to_string(),
            source,
        })
    }
}

/// First config file found in the search path, if any.
pub fn find_config_file(inventory_base: Option<&Path>) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home));
    }
    if let Some(base) = inventory_base {
        dirs.push(base.to_path_buf());
    }
    dirs.into_iter()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Load the config file for this run, or fall back to defaults.
pub fn load_config(inventory_base: Option<&Path>) -> Result<ConfigFile> {
    match find_config_file(inventory_base) {
        Some(path) => ConfigFile::load(&path),
        None => Ok(ConfigFile::default()),
    }
}
