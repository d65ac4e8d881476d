//! YAML documents
//!
//! A `Document` is one raw class or node definition: the YAML mapping with
//! top-level `classes`, `applications`, `parameters`, `exports`, and
//! `environment` keys, plus the uri it was loaded from. Turning one into an
//! [`Entity`] resolves relative class names (leading dots walk up the
//! including class's dotted path, one dot per level).

use std::path::Path;

use serde_json::Value as Json;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::classes::NameList;
use crate::node::entity::Entity;
use crate::node::exports::Exports;
use crate::node::parameters::Parameters;

#[derive(Debug, Clone)]
pub struct Document {
    uri: String,
    data: Json,
}

impl Document {
    pub fn from_file(path: &Path) -> Result<Self> {
        let uri = format!("yaml_fs://{}", path.display());
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Error::Io(e),
        })?;
        Self::from_str(&raw, uri)
    }

    pub fn from_str(raw: &str, uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|source| Error::YamlParse {
                uri: uri.clone(),
                source,
            })?;
        let data = yaml_to_json(parsed, &uri)?;
        Ok(Self { uri, data })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn data(&self) -> &Json {
        &self.data
    }

    /// Build the entity this document defines, with `name` as its identity.
    pub fn entity(&self, name: &str, settings: &Settings) -> Result<Entity> {
        let mut entity = Entity::new(name, self.uri.clone());

        let classes = self.string_list("classes")?;
        entity.classes = NameList::from_list(absolute_class_names(name, classes));
        entity.applications = NameList::from_list(self.string_list("applications")?);

        entity.parameters = match self.data.get("parameters") {
            Some(mapping @ Json::Object(_)) => {
                Parameters::from_mapping(mapping, settings, self.uri.clone())?
            }
            Some(Json::Null) | None => Parameters::new(self.uri.clone()),
            Some(other) => return Err(self.malformed("parameters", other)),
        };
        entity.exports = match self.data.get("exports") {
            Some(mapping @ Json::Object(_)) => {
                Exports::from_mapping(mapping, settings, self.uri.clone())?
            }
            Some(Json::Null) | None => Exports::new(self.uri.clone()),
            Some(other) => return Err(self.malformed("exports", other)),
        };

        entity.environment = match self.data.get("environment") {
            Some(Json::String(env)) => Some(env.clone()),
            Some(Json::Null) | None => None,
            Some(other) => return Err(self.malformed("environment", other)),
        };
        Ok(entity)
    }

    fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.data.get(key) {
            Some(Json::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Json::String(s) => Ok(s.clone()),
                    other => Err(self.malformed(key, other)),
                })
                .collect(),
            Some(Json::Null) | None => Ok(Vec::new()),
            Some(other) => Err(self.malformed(key, other)),
        }
    }

    fn malformed(&self, key: &str, found: &Json) -> Error {
        Error::InvalidDocument {
            uri: self.uri.clone(),
            message: format!("unexpected value under '{}': {}", key, found),
        }
    }
}

/// Resolve leading-dot class names relative to the including class.
fn absolute_class_names(name: &str, classes: Vec<String>) -> Vec<String> {
    classes
        .into_iter()
        .map(|class| {
            let dots = class.chars().take_while(|c| *c == '.').count();
            if dots == 0 {
                return class;
            }
            let segments: Vec<&str> = name.split('.').collect();
            let keep = segments.len().saturating_sub(dots);
            let parent = segments[..keep].join(".");
            if parent.is_empty() {
                class[dots..].to_string()
            } else {
                format!("{}{}", parent, &class[dots - 1..])
            }
        })
        .collect()
}

/// Convert loaded YAML into the engine's JSON model. Mapping keys become
/// strings; anything that cannot be a key is rejected.
fn yaml_to_json(value: serde_yaml::Value, uri: &str) -> Result<Json> {
    use serde_yaml::Value as Yaml;
    Ok(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                serde_json::Number::from_f64(n.as_f64().unwrap_or(0.0))
                    .map(Json::Number)
                    .unwrap_or(Json::Null)
            }
        }
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(
            items
                .into_iter()
                .map(|item| yaml_to_json(item, uri))
                .collect::<Result<_>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = serde_json::Map::new();
            for (key, child) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Bool(b) => b.to_string(),
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Null => "null".to_string(),
                    other => {
                        return Err(Error::InvalidDocument {
                            uri: uri.to_string(),
                            message: format!("unsupported mapping key: {:?}", other),
                        })
                    }
                };
                map.insert(key, yaml_to_json(child, uri)?);
            }
            Json::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value, uri)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_document_to_entity() {
        let doc = Document::from_str(
            "classes: [one, two]\napplications: [ssh]\nparameters:\n  a: 1\nexports:\n  b: 2\nenvironment: prod\n",
            "memory://x",
        )
        .unwrap();
        let mut e = doc.entity("node1", &settings()).unwrap();
        assert_eq!(e.classes.as_list(), &["one", "two"]);
        assert_eq!(e.applications.as_list(), &["ssh"]);
        assert_eq!(e.environment.as_deref(), Some("prod"));
        e.interpolate(None, &settings()).unwrap();
        assert_eq!(e.parameters.as_dict(), json!({"a": 1}));
        assert_eq!(e.exports.as_dict(), json!({"b": 2}));
    }

    #[test]
    fn test_empty_document_sections() {
        let doc = Document::from_str("parameters:\n", "memory://y").unwrap();
        let e = doc.entity("n", &settings()).unwrap();
        assert!(e.classes.is_empty());
        assert!(e.parameters.is_empty());
        assert!(e.environment.is_none());
    }

    #[test]
    fn test_relative_class_names() {
        assert_eq!(
            absolute_class_names(
                "app.web.frontend",
                vec![".common".to_string(), "..db".to_string(), "plain".to_string()],
            ),
            vec!["app.web.common", "app.db", "plain"]
        );
        // more dots than levels strips down to the bare name
        assert_eq!(
            absolute_class_names("top", vec!["..deep".to_string()]),
            vec!["deep"]
        );
    }

    #[test]
    fn test_numeric_keys_are_stringified() {
        let doc = Document::from_str("parameters:\n  80: http\n  true: yes_key\n", "memory://z")
            .unwrap();
        let data = doc.data();
        assert_eq!(
            data["parameters"],
            json!({"80": "http", "true": "yes_key"})
        );
    }

    #[test]
    fn test_invalid_yaml_reports_uri() {
        let err = Document::from_str("a: [unclosed", "memory://broken").unwrap_err();
        match err {
            Error::YamlParse { uri, .. } => assert_eq!(uri, "memory://broken"),
            other => panic!("expected yaml error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_section_type_is_rejected() {
        let doc = Document::from_str("classes: notalist\n", "memory://w").unwrap();
        assert!(doc.entity("n", &settings()).is_err());
    }
}
