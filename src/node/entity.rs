//! Entities: the unit of merging
//!
//! A class or node document loads into an `Entity`: its ancestor classes,
//! applications, parameters, exports, provenance, and environment. Merging
//! folds another entity over this one; name and uri always follow the most
//! recently merged entity, and a declared environment overrides an
//! inherited one.

use serde_json::Value as Json;

use crate::core::error::Result;
use crate::core::settings::Settings;
use crate::node::classes::NameList;
use crate::node::exports::Exports;
use crate::node::parameters::{Parameters, PendingQuery};
use crate::value::query::Inventory;

#[derive(Debug, Clone)]
pub struct Entity {
    pub classes: NameList,
    pub applications: NameList,
    pub parameters: Parameters,
    pub exports: Exports,
    pub name: String,
    pub uri: String,
    pub environment: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            classes: NameList::new(),
            applications: NameList::new(),
            parameters: Parameters::new(uri.clone()),
            exports: Exports::new(uri.clone()),
            name: name.into(),
            uri,
            environment: None,
        }
    }

    /// Merge `other` over this entity.
    pub fn merge(&mut self, other: &Entity, settings: &Settings) -> Result<()> {
        self.classes.merge_unique(&other.classes);
        self.applications.merge_unique(&other.applications);
        self.parameters.merge(&other.parameters, settings)?;
        self.exports.merge(&other.exports, settings)?;
        self.name = other.name.clone();
        self.uri = other.uri.clone();
        self.parameters.set_uri(other.uri.clone());
        if other.environment.is_some() {
            self.environment = other.environment.clone();
        }
        Ok(())
    }

    pub fn merge_parameters(&mut self, params: &Parameters, settings: &Settings) -> Result<()> {
        self.parameters.merge(params, settings)
    }

    pub fn environment_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.environment.as_deref().unwrap_or(default)
    }

    /// Flatten both trees, discovering inventory queries without resolving
    /// anything yet.
    pub fn initialise_interpolation(&mut self, settings: &Settings) -> Result<()> {
        self.parameters.initialise_interpolation(settings)?;
        self.exports.initialise_interpolation(settings)
    }

    /// Full resolution: parameters to their fixed point, then exports
    /// against the now-rendered parameters.
    pub fn interpolate(
        &mut self,
        inventory: Option<&Inventory>,
        settings: &Settings,
    ) -> Result<()> {
        self.parameters.interpolate(inventory, settings)?;
        self.interpolate_exports(settings)
    }

    /// Render the exports tree against this entity's parameters.
    pub fn interpolate_exports(&mut self, settings: &Settings) -> Result<()> {
        self.initialise_interpolation(settings)?;
        self.exports
            .interpolate_from_external(&mut self.parameters, settings)
    }

    /// Render only the export paths one query needs.
    pub fn interpolate_single_export(
        &mut self,
        query: &PendingQuery,
        settings: &Settings,
    ) -> Result<()> {
        self.exports
            .interpolate_single_from_external(&mut self.parameters, query, settings)
    }

    pub fn as_dict(&self) -> Json {
        serde_json::json!({
            "classes": self.classes.as_list(),
            "applications": self.applications.as_list(),
            "parameters": self.parameters.as_dict(),
            "exports": self.exports.as_dict(),
            "environment": self.environment,
        })
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

    fn entity(name: &str, uri: &str, classes: &[&str], params: Json) -> Entity {
        let mut e = Entity::new(name, uri);
        e.classes = NameList::from_list(classes.iter().map(|s| s.to_string()));
        e.parameters = Parameters::from_mapping(&params, &settings(), uri).unwrap();
        e
    }

    #[test]
    fn test_merge_takes_last_name_and_uri() {
        let s = settings();
        let mut base = entity("base", "u1", &["common"], json!({"a": 1}));
        let over = entity("node1", "u2", &["common", "app"], json!({"b": 2}));
        base.merge(&over, &s).unwrap();
        assert_eq!(base.name, "node1");
        assert_eq!(base.uri, "u2");
        assert_eq!(base.classes.as_list(), &["common", "app"]);
        let mut merged = base;
        merged.interpolate(None, &s).unwrap();
        assert_eq!(merged.parameters.as_dict(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_environment_overrides_only_when_set() {
        let s = settings();
        let mut base = entity("a", "u1", &[], json!({}));
        base.environment = Some("prod".to_string());
        let plain = entity("b", "u2", &[], json!({}));
        base.merge(&plain, &s).unwrap();
        assert_eq!(base.environment.as_deref(), Some("prod"));

        let mut staging = entity("c", "u3", &[], json!({}));
        staging.environment = Some("staging".to_string());
        base.merge(&staging, &s).unwrap();
        assert_eq!(base.environment.as_deref(), Some("staging"));
        assert_eq!(base.environment_or("base"), "staging");
    }

    #[test]
    fn test_interpolate_renders_exports_last() {
        let s = settings();
        let mut e = Entity::new("n", "u");
        e.parameters =
            Parameters::from_mapping(&json!({"host": "h1", "fqdn": "${host}.example.com"}), &s, "u")
                .unwrap();
        e.exports = Exports::from_mapping(&json!({"addr": "${fqdn}"}), &s, "u").unwrap();
        e.interpolate(None, &s).unwrap();
        assert_eq!(e.exports.as_dict(), json!({"addr": "h1.example.com"}));
    }

    #[test]
    fn test_as_dict_shape() {
        let s = settings();
        let mut e = entity("n1", "u1", &["a"], json!({"x": 1}));
        e.applications.append_if_new("ssh");
        e.environment = Some("base".to_string());
        e.interpolate(None, &s).unwrap();
        let d = e.as_dict();
        assert_eq!(d["classes"], json!(["a"]));
        assert_eq!(d["applications"], json!(["ssh"]));
        assert_eq!(d["parameters"], json!({"x": 1}));
        assert_eq!(d["exports"], json!({}));
        assert_eq!(d["environment"], json!("base"));
    }
}
