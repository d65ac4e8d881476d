//! YAML output formatting
//!
//! serde_yaml always emits block style and never emits anchors, so the
//! pretty-print and no-refs toggles that matter for JSON are inherent
//! here.

use serde_json::Value as Json;

use crate::core::error::{Error, Result};

pub fn format(data: &Json) -> Result<String> {
    serde_yaml::to_string(data).map_err(|source| Error::YamlParse {
        uri: "<output>".to_string(),
        source,
    })
}
