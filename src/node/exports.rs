//! Exports: parameters rendered against an external context
//!
//! A node's exports are a parameter tree of their own, but every reference
//! in them resolves against the *parent entity's parameters*, not against
//! the exports themselves. Rendering exports may force interpolation of
//! individual parameter paths on demand, which is how the inventory can be
//! built against still-unresolved parameter trees.

use serde_json::Value as Json;
use tracing::warn;

use crate::core::error::Result;
use crate::core::settings::Settings;
use crate::node::parameters::{Parameters, PendingQuery};
use crate::path::DictPath;

#[derive(Debug, Clone)]
pub struct Exports {
    inner: Parameters,
}

impl Exports {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            inner: Parameters::new(uri),
        }
    }

    pub fn from_mapping(
        mapping: &Json,
        settings: &Settings,
        uri: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Parameters::from_mapping(mapping, settings, uri)?,
        })
    }

    pub fn merge(&mut self, other: &Exports, settings: &Settings) -> Result<()> {
        self.inner.merge(&other.inner, settings)
    }

    pub fn as_dict(&self) -> Json {
        self.inner.as_dict()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn initialise_interpolation(&mut self, settings: &Settings) -> Result<()> {
        self.inner.initialise_interpolation(settings)
    }

    /// Render every export against `external`. References pull paths of
    /// the external tree through interpolation as needed.
    pub fn interpolate_from_external(
        &mut self,
        external: &mut Parameters,
        settings: &Settings,
    ) -> Result<()> {
        self.inner.initialise_interpolation(settings)?;
        while let Some(path) = self.inner.first_unrendered() {
            let Some(mut value) = self.inner.get_leaf(&path) else {
                self.inner.remove_unrendered(&path);
                continue;
            };
            external.interpolate_references(&path, &mut value, None, settings)?;
            let rendered = value
                .render(Some(external.root()), None, settings)
                .map_err(|e| e.with_context(&path.to_string()))?;
            self.inner.write_rendered(&path, rendered, settings)?;
            self.inner.remove_unrendered(&path);
        }
        Ok(())
    }

    /// Render only the export paths one query needs, leaving the rest of
    /// the tree alone. A row that fails to render is dropped when the
    /// query opted into `+IgnoreErrors`.
    pub fn interpolate_single_from_external(
        &mut self,
        external: &mut Parameters,
        query: &PendingQuery,
        settings: &Settings,
    ) -> Result<()> {
        self.inner.initialise_interpolation(settings)?;
        for main in &query.inv_refs {
            self.single_path(main, external, query, settings)?;
        }
        Ok(())
    }

    fn single_path(
        &mut self,
        main: &DictPath,
        external: &mut Parameters,
        query: &PendingQuery,
        settings: &Settings,
    ) -> Result<()> {
        loop {
            let required = self.required_paths(main, settings);
            if required.is_empty() {
                return Ok(());
            }
            for path in required {
                if let Some(mut value) = self.inner.get_leaf(&path) {
                    let rendered = external
                        .interpolate_references(&path, &mut value, None, settings)
                        .and_then(|_| value.render(Some(external.root()), None, settings));
                    match rendered {
                        Ok(node) => {
                            self.inner.write_rendered(&path, node, settings)?;
                        }
                        Err(e) if e.is_resolve_error() && query.ignore_failed_render => {
                            warn!("dropping export {}: {}", path, e);
                            self.inner.delete_path(&path);
                        }
                        Err(e) => return Err(e.with_context(&path.to_string())),
                    }
                }
                self.inner.remove_unrendered(&path);
            }
        }
    }

    /// Pending ancestors of `main` plus every pending path at or below it.
    fn required_paths(&self, main: &DictPath, settings: &Settings) -> Vec<DictPath> {
        let mut required = Vec::new();
        let mut ancestor = DictPath::new(settings.delimiter);
        for part in main.key_parts() {
            ancestor.add_subpath(part.clone());
            if self.inner.contains_unrendered(&ancestor) {
                required.push(ancestor.clone());
            }
        }
        for path in self.inner.unrendered_paths() {
            if main.is_ancestor_of(&path) || *main == path {
                required.push(path);
            }
        }
        required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::default()
    }

    fn external(mapping: Json) -> Parameters {
        Parameters::from_mapping(&mapping, &settings(), "params").unwrap()
    }

    fn exports(mapping: Json) -> Exports {
        Exports::from_mapping(&mapping, &settings(), "exports").unwrap()
    }

    #[test]
    fn test_renders_against_external_context() {
        let s = settings();
        let mut params = external(json!({"motd": "hello", "port": 80}));
        let mut exp = exports(json!({"msg": "${motd}", "p": "${port}"}));
        params.initialise_interpolation(&s).unwrap();
        exp.interpolate_from_external(&mut params, &s).unwrap();
        assert_eq!(exp.as_dict(), json!({"msg": "hello", "p": 80}));
    }

    #[test]
    fn test_external_references_resolve_on_demand() {
        let s = settings();
        // motd itself needs interpolation inside the external tree
        let mut params = external(json!({"name": "n1", "motd": "hi ${name}"}));
        let mut exp = exports(json!({"msg": "${motd}"}));
        params.initialise_interpolation(&s).unwrap();
        exp.interpolate_from_external(&mut params, &s).unwrap();
        assert_eq!(exp.as_dict(), json!({"msg": "hi n1"}));
    }

    #[test]
    fn test_missing_external_reference_fails() {
        let s = settings();
        let mut params = external(json!({}));
        let mut exp = exports(json!({"msg": "${absent}"}));
        params.initialise_interpolation(&s).unwrap();
        let err = exp
            .interpolate_from_external(&mut params, &s)
            .unwrap_err();
        assert!(matches!(err, Error::Resolve { .. }));
    }

    #[test]
    fn test_single_query_renders_only_needed_paths() {
        let s = settings();
        let mut params = external(json!({"x": 1}));
        let mut exp = exports(json!({"a": "${x}", "broken": "${missing}"}));
        params.initialise_interpolation(&s).unwrap();
        exp.initialise_interpolation(&s).unwrap();
        let query = PendingQuery {
            path: DictPath::from_string(':', "exp"),
            uri: "u".to_string(),
            display: "exports:a".to_string(),
            inv_refs: vec![DictPath::from_string(':', "a")],
            ignore_failed_render: false,
        };
        exp.interpolate_single_from_external(&mut params, &query, &s)
            .unwrap();
        // `broken` never rendered, and is absent from the row
        assert_eq!(exp.as_dict(), json!({"a": 1}));
    }

    #[test]
    fn test_single_query_drops_failing_path_when_ignored() {
        let s = settings();
        let mut params = external(json!({}));
        let mut exp = exports(json!({"a": "${missing}"}));
        params.initialise_interpolation(&s).unwrap();
        exp.initialise_interpolation(&s).unwrap();
        let query = PendingQuery {
            path: DictPath::from_string(':', "exp"),
            uri: "u".to_string(),
            display: "exports:a".to_string(),
            inv_refs: vec![DictPath::from_string(':', "a")],
            ignore_failed_render: true,
        };
        exp.interpolate_single_from_external(&mut params, &query, &s)
            .unwrap();
        assert_eq!(exp.as_dict(), json!({}));

        // without the option the failure surfaces
        let mut params = external(json!({}));
        let mut exp = exports(json!({"a": "${missing}"}));
        params.initialise_interpolation(&s).unwrap();
        exp.initialise_interpolation(&s).unwrap();
        let strict = PendingQuery {
            ignore_failed_render: false,
            ..query
        };
        assert!(exp
            .interpolate_single_from_external(&mut params, &strict, &s)
            .is_err());
    }

    #[test]
    fn test_single_query_renders_subtree_below_main_path() {
        let s = settings();
        let mut params = external(json!({"ip": "10.0.0.1", "port": 80}));
        let mut exp = exports(json!({"net": {"ip": "${ip}", "port": "${port}"}}));
        params.initialise_interpolation(&s).unwrap();
        exp.initialise_interpolation(&s).unwrap();
        let query = PendingQuery {
            path: DictPath::from_string(':', "exp"),
            uri: "u".to_string(),
            display: "exports:net".to_string(),
            inv_refs: vec![DictPath::from_string(':', "net")],
            ignore_failed_render: false,
        };
        exp.interpolate_single_from_external(&mut params, &query, &s)
            .unwrap();
        assert_eq!(exp.as_dict(), json!({"net": {"ip": "10.0.0.1", "port": 80}}));
    }
}
