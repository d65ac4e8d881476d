//! The compiler: per-node assembly and inventory rendering
//!
//! For one node, assembly builds a base entity (class mappings, external
//! input data, automatic parameters), then expands the node's ancestor
//! classes depth-first in declaration order, merging each descent before
//! the declaring entity itself so that node-local values beat inherited
//! ones. Interpolation runs last, pulling in a fleet-wide inventory when
//! the node's parameters hold `$[…]` queries.

pub mod classmap;

use std::collections::HashSet;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value as Json;
use tracing::warn;

use crate::compile::classmap::ClassMappings;
use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::node::entity::Entity;
use crate::node::parameters::{Parameters, PendingQuery};
use crate::node::tree;
use crate::storage::NodeStorage;
use crate::value::parse;
use crate::value::query::Inventory;

pub struct Compiler {
    storage: Box<dyn NodeStorage>,
    mappings: ClassMappings,
    settings: Settings,
    input_data: Option<Json>,
    class_notfound_regex: Option<Regex>,
}

impl Compiler {
    pub fn new(
        storage: Box<dyn NodeStorage>,
        class_mappings: Option<&[String]>,
        settings: Settings,
        input_data: Option<Json>,
    ) -> Result<Self> {
        let mappings = ClassMappings::new(class_mappings.unwrap_or(&[]))?;
        let class_notfound_regex = if settings.ignore_class_notfound {
            let joined = settings
                .ignore_class_notfound_regexp
                .iter()
                .map(|r| format!("(?:{})", r))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&joined).map_err(|e| Error::Config {
                message: format!("bad ignore_class_notfound_regexp: {}", e),
            })?)
        } else {
            None
        };
        Ok(Self {
            storage,
            mappings,
            settings,
            input_data,
            class_notfound_regex,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The fully rendered view of one node.
    pub fn nodeinfo(&self, nodename: &str) -> Result<Json> {
        let entity = self.nodeinfo_entity(nodename, None)?;
        Ok(self.nodeinfo_dict(nodename, &entity))
    }

    /// The whole fleet: every node rendered, plus reverse maps of classes
    /// and applications to the nodes declaring them.
    pub fn inventory(&self) -> Result<Json> {
        let rows = self.render_inventory(true, "", None)?;
        let mut nodes = serde_json::Map::new();
        let mut classes: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut applications: IndexMap<String, Vec<String>> = IndexMap::new();
        for nodename in self.storage.enumerate_nodes()? {
            let entity = self.nodeinfo_entity(&nodename, Some(&rows))?;
            for class in entity.classes.iter() {
                classes
                    .entry(class.clone())
                    .or_default()
                    .push(nodename.clone());
            }
            for application in entity.applications.iter() {
                applications
                    .entry(application.clone())
                    .or_default()
                    .push(nodename.clone());
            }
            nodes.insert(nodename.clone(), self.nodeinfo_dict(&nodename, &entity));
        }
        let mut out = serde_json::Map::new();
        out.insert(
            "__reclass__".to_string(),
            serde_json::json!({ "timestamp": Self::timestamp() }),
        );
        out.insert("nodes".to_string(), Json::Object(nodes));
        out.insert("classes".to_string(), serde_json::to_value(classes)?);
        out.insert("applications".to_string(), serde_json::to_value(applications)?);
        Ok(Json::Object(out))
    }

    fn timestamp() -> String {
        chrono::Local::now().format("%c").to_string()
    }

    // -- per-node assembly -------------------------------------------------

    /// Assemble the merged (but not yet interpolated) entity for one node.
    pub fn node_entity(&self, nodename: &str) -> Result<Entity> {
        let mut node_entity = self.storage.get_node(nodename, &self.settings)?;
        if node_entity.environment.is_none() {
            node_entity.environment = Some(self.settings.default_environment.clone());
        }
        let environment = node_entity
            .environment_or(&self.settings.default_environment)
            .to_string();

        let mut base = Entity::new("base", "");
        base.merge(&self.class_mappings_entity(nodename), &self.settings)?;
        base.merge(&self.input_data_entity()?, &self.settings)?;
        base.merge_parameters(
            &self.automatic_parameters(nodename, &environment)?,
            &self.settings,
        )?;

        let mut seen = HashSet::new();
        let empty_context = Entity::new("", "");
        let merge_base = self.recurse_entity(
            base,
            Entity::new("", ""),
            &empty_context,
            &mut seen,
            nodename,
            &environment,
        )?;
        let context = merge_base.clone();
        self.recurse_entity(
            node_entity,
            merge_base,
            &context,
            &mut seen,
            nodename,
            &environment,
        )
    }

    /// Expand `entity`'s classes depth-first into `merge_base`, then merge
    /// `entity` itself on top. `context` is the fallback for class-name
    /// reference resolution; it is fixed before the expansion starts and
    /// threaded unchanged through every descent, so fallback lookups never
    /// see data merged from earlier sibling classes.
    fn recurse_entity(
        &self,
        entity: Entity,
        mut merge_base: Entity,
        context: &Entity,
        seen: &mut HashSet<String>,
        nodename: &str,
        environment: &str,
    ) -> Result<Entity> {
        let declared: Vec<String> = entity.classes.as_list().to_vec();
        for class_name in declared {
            let class_name = if self.settings.count_sentinels(&class_name) > 0 {
                self.resolve_class_name(
                    &class_name,
                    &merge_base,
                    context,
                    nodename,
                    &entity.uri,
                )?
            } else {
                class_name
            };
            if !seen.insert(class_name.clone()) {
                // earliest declaration wins the position
                continue;
            }
            let class_entity =
                match self.storage.get_class(&class_name, environment, &self.settings) {
                    Ok(found) => found,
                    Err(e @ Error::ClassNotFound { .. }) => {
                        if self.ignored_missing_class(&class_name) {
                            if self.settings.ignore_class_notfound_warning {
                                warn!("class not found: '{}', skipped", class_name);
                            }
                            continue;
                        }
                        return Err(e.with_nodename(nodename));
                    }
                    Err(e) => return Err(e),
                };
            let descent = self.recurse_entity(
                class_entity,
                Entity::new("", ""),
                context,
                seen,
                nodename,
                environment,
            )?;
            merge_base.merge(&descent, &self.settings)?;
        }
        merge_base.merge(&entity, &self.settings)?;
        Ok(merge_base)
    }

    fn ignored_missing_class(&self, class_name: &str) -> bool {
        self.class_notfound_regex
            .as_ref()
            .map(|re| re.is_match(class_name))
            .unwrap_or(false)
    }

    /// Resolve `${…}` inside a class name against the partially merged
    /// base, falling back to the outer context.
    fn resolve_class_name(
        &self,
        class_name: &str,
        primary: &Entity,
        fallback: &Entity,
        nodename: &str,
        uri: &str,
    ) -> Result<String> {
        let unresolvable = || Error::ClassNameResolve {
            classname: class_name.to_string(),
            uri: uri.to_string(),
            nodename: nodename.to_string(),
        };
        let item = parse::parse_str(class_name, &self.settings).map_err(|_| unresolvable())?;
        let rendered = item
            .render(Some(primary.parameters.root()), None, &self.settings)
            .or_else(|_| item.render(Some(fallback.parameters.root()), None, &self.settings))
            .map_err(|_| unresolvable())?;
        let name = tree::node_to_string(&rendered);
        self.validate_class_name(&name)?;
        Ok(name)
    }

    fn validate_class_name(&self, name: &str) -> Result<()> {
        match name
            .chars()
            .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            Some(character) => Err(Error::InvalidClassname {
                character,
                classname: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn class_mappings_entity(&self, nodename: &str) -> Entity {
        let mut entity = Entity::new(format!("class mappings for node {}", nodename), "");
        if !self.mappings.is_empty() {
            entity.classes = self.mappings.classes_for(nodename);
        }
        entity
    }

    fn input_data_entity(&self) -> Result<Entity> {
        let mut entity = Entity::new("input data", "");
        if let Some(data) = &self.input_data {
            entity.parameters = Parameters::from_mapping(data, &self.settings, "input_data")?;
        }
        Ok(entity)
    }

    fn automatic_parameters(&self, nodename: &str, environment: &str) -> Result<Parameters> {
        if !self.settings.automatic_parameters {
            return Ok(Parameters::new(""));
        }
        let short = nodename.split('.').next().unwrap_or(nodename);
        let auto = serde_json::json!({
            "_reclass_": {
                "name": { "full": nodename, "short": short },
                "environment": environment,
            }
        });
        Parameters::from_mapping(&auto, &self.settings, "__auto__")
    }

    // -- inventory ---------------------------------------------------------

    /// Render the exports of every node (in the given environment, or all
    /// of them). With `queries` set, only the export paths those queries
    /// touch are rendered per node.
    fn render_inventory(
        &self,
        all_envs: bool,
        environment: &str,
        queries: Option<&[PendingQuery]>,
    ) -> Result<Inventory> {
        let mut rows = Inventory::new();
        for nodename in self.storage.enumerate_nodes()? {
            let node_base = match self.storage.get_node(&nodename, &self.settings) {
                Ok(entity) => entity,
                Err(e)
                    if self.settings.inventory_ignore_failed_node
                        && matches!(
                            &e,
                            Error::YamlParse { .. } | Error::InvalidDocument { .. }
                        ) =>
                {
                    warn!("ignoring failed inventory node {}: {}", nodename, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let env = node_base.environment_or(&self.settings.default_environment);
            if !all_envs && env != environment {
                continue;
            }
            let mut node = match self.node_entity(&nodename) {
                Ok(entity) => entity,
                Err(e @ Error::ClassNotFound { .. }) => {
                    return Err(Error::InvQueryClassNotFound(Box::new(
                        e.with_nodename(&nodename),
                    )))
                }
                Err(e @ Error::ClassNameResolve { .. }) => {
                    return Err(Error::InvQueryClassNameResolve(Box::new(
                        e.with_nodename(&nodename),
                    )))
                }
                Err(e) => return Err(e),
            };
            match queries {
                None => node
                    .interpolate_exports(&self.settings)
                    .map_err(|e| e.with_nodename(&nodename))?,
                Some(pending) => {
                    node.initialise_interpolation(&self.settings)
                        .map_err(|e| e.with_nodename(&nodename))?;
                    for query in pending {
                        node.interpolate_single_export(query, &self.settings)
                            .map_err(|e| Error::InvQuery {
                                query: query.display.clone(),
                                context: query.path.to_string(),
                                uri: query.uri.clone(),
                                nodename: nodename.clone(),
                                source: Box::new(e),
                            })?;
                    }
                }
            }
            rows.insert(nodename.clone(), node.exports.as_dict());
        }
        Ok(rows)
    }

    fn nodeinfo_entity(&self, nodename: &str, inventory: Option<&Inventory>) -> Result<Entity> {
        let mut node = self
            .node_entity(nodename)
            .map_err(|e| e.with_nodename(nodename))?;
        node.initialise_interpolation(&self.settings)
            .map_err(|e| e.with_nodename(nodename))?;
        let computed: Option<Inventory> =
            if node.parameters.has_inv_query() && inventory.is_none() {
                let environment = node
                    .environment_or(&self.settings.default_environment)
                    .to_string();
                let pending: Vec<PendingQuery> = node.parameters.queries().to_vec();
                Some(self.render_inventory(
                    node.parameters.needs_all_envs(),
                    &environment,
                    Some(&pending),
                )?)
            } else {
                None
            };
        let inventory = computed.as_ref().or(inventory);
        node.interpolate(inventory, &self.settings)
            .map_err(|e| e.with_nodename(nodename))?;
        Ok(node)
    }

    fn nodeinfo_dict(&self, nodename: &str, entity: &Entity) -> Json {
        let mut out = serde_json::Map::new();
        out.insert(
            "__reclass__".to_string(),
            serde_json::json!({
                "node": entity.name,
                "name": nodename,
                "uri": entity.uri,
                "environment": entity.environment_or(&self.settings.default_environment),
                "timestamp": Self::timestamp(),
            }),
        );
        if let Json::Object(body) = entity.as_dict() {
            out.extend(body);
        }
        Json::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn compiler_with(
        nodes: &[(&str, &str)],
        classes: &[(&str, &str)],
        settings: Settings,
        mappings: Option<&[String]>,
    ) -> Compiler {
        let mut storage = MemoryStorage::new();
        for (name, yaml) in nodes {
            storage.add_node(name, yaml).unwrap();
        }
        for (name, yaml) in classes {
            storage.add_class(name, yaml).unwrap();
        }
        Compiler::new(Box::new(storage), mappings, settings, None).unwrap()
    }

    fn parameters_of(info: &Json) -> &Json {
        &info["parameters"]
    }

    #[test]
    fn test_simple_inheritance_and_override() {
        let compiler = compiler_with(
            &[(
                "n1",
                "classes: [defaults]\nparameters:\n  port: 8080\n",
            )],
            &[("defaults", "parameters:\n  port: 80\n  host: all\n")],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("n1").unwrap();
        assert_eq!(
            parameters_of(&info)["port"],
            json!(8080),
            "node-local overrides beat inherited ones"
        );
        assert_eq!(parameters_of(&info)["host"], json!("all"));
        assert_eq!(info["classes"], json!(["defaults"]));
    }

    #[test]
    fn test_class_expansion_order_and_dedup() {
        let compiler = compiler_with(
            &[("n1", "classes: [left, right]\nparameters: {}\n")],
            &[
                ("common", "parameters:\n  who: common\n"),
                ("left", "classes: [common]\nparameters:\n  who: left\n"),
                ("right", "classes: [common]\nparameters:\n  who: right\n"),
            ],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("n1").unwrap();
        // depth-first, textual order, duplicates skipped on re-occurrence
        assert_eq!(info["classes"], json!(["common", "left", "right"]));
        assert_eq!(parameters_of(&info)["who"], json!("right"));
    }

    #[test]
    fn test_automatic_parameters() {
        let compiler = compiler_with(
            &[("web1.example.com", "parameters: {}\n")],
            &[],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("web1.example.com").unwrap();
        assert_eq!(
            parameters_of(&info)["_reclass_"],
            json!({
                "name": {"full": "web1.example.com", "short": "web1"},
                "environment": "base",
            })
        );

        let mut settings = Settings::default();
        settings.automatic_parameters = false;
        let compiler = compiler_with(
            &[("web1", "parameters: {}\n")],
            &[],
            settings,
            None,
        );
        let info = compiler.nodeinfo("web1").unwrap();
        assert!(parameters_of(&info).get("_reclass_").is_none());
    }

    #[test]
    fn test_class_mappings_prepend() {
        let mappings = vec!["web* role.web".to_string()];
        let compiler = compiler_with(
            &[("web1", "classes: [site]\nparameters: {}\n")],
            &[
                ("role.web", "parameters:\n  role: web\n  order: mapping\n"),
                ("site", "parameters:\n  order: site\n"),
            ],
            Settings::default(),
            Some(&mappings),
        );
        let info = compiler.nodeinfo("web1").unwrap();
        assert_eq!(parameters_of(&info)["role"], json!("web"));
        // mapping classes merge before declared classes
        assert_eq!(parameters_of(&info)["order"], json!("site"));
        assert_eq!(info["classes"], json!(["role.web", "site"]));
    }

    #[test]
    fn test_class_name_interpolation() {
        let compiler = compiler_with(
            &[(
                "n1",
                "classes: [roles, \"role.${role}\"]\nparameters:\n  role: db\n",
            )],
            &[
                ("roles", "parameters:\n  role: web\n"),
                ("role.web", "parameters:\n  picked: web\n"),
                ("role.db", "parameters:\n  picked: db\n"),
            ],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("n1").unwrap();
        // resolved against the partially merged base: the `roles` class has
        // already merged when the reference renders
        assert_eq!(parameters_of(&info)["picked"], json!("web"));
    }

    #[test]
    fn test_class_name_fallback_uses_pre_expansion_context() {
        let compiler = compiler_with(
            &[("n1", "classes: [classa, classb]\nparameters: {}\n")],
            &[
                ("classa", "parameters:\n  tier: prod\n"),
                ("classb", "classes: [\"env.${tier}\"]\nparameters: {}\n"),
                ("env.prod", "parameters:\n  env: prod\n"),
            ],
            Settings::default(),
            None,
        );
        // classb's nested lookup has an empty primary context; the fallback
        // is fixed before node expansion begins and never contains data
        // merged from the earlier sibling classa
        let err = compiler.nodeinfo("n1").unwrap_err();
        assert!(matches!(err, Error::ClassNameResolve { .. }));
    }

    #[test]
    fn test_unresolvable_class_name() {
        let compiler = compiler_with(
            &[("n1", "classes: [\"role.${ghost}\"]\nparameters: {}\n")],
            &[],
            Settings::default(),
            None,
        );
        let err = compiler.nodeinfo("n1").unwrap_err();
        assert!(matches!(err, Error::ClassNameResolve { .. }));
    }

    #[test]
    fn test_class_not_found_modes() {
        let compiler = compiler_with(
            &[("n1", "classes: [ghost]\nparameters: {}\n")],
            &[],
            Settings::default(),
            None,
        );
        assert!(matches!(
            compiler.nodeinfo("n1").unwrap_err(),
            Error::ClassNotFound { .. }
        ));

        let mut lenient = Settings::default();
        lenient.ignore_class_notfound = true;
        let compiler = compiler_with(
            &[("n1", "classes: [ghost]\nparameters:\n  a: 1\n")],
            &[],
            lenient,
            None,
        );
        let info = compiler.nodeinfo("n1").unwrap();
        assert_eq!(parameters_of(&info)["a"], json!(1));

        // regexp narrows what may be ignored
        let mut narrow = Settings::default();
        narrow.ignore_class_notfound = true;
        narrow.ignore_class_notfound_regexp = vec!["^optional\\.".to_string()];
        let compiler = compiler_with(
            &[("n1", "classes: [ghost]\nparameters: {}\n")],
            &[],
            narrow,
            None,
        );
        assert!(compiler.nodeinfo("n1").is_err());
    }

    #[test]
    fn test_environment_defaults_and_override() {
        let compiler = compiler_with(
            &[
                ("n1", "parameters: {}\n"),
                ("n2", "environment: prod\nparameters: {}\n"),
            ],
            &[],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("n1").unwrap();
        assert_eq!(info["environment"], json!("base"));
        let info = compiler.nodeinfo("n2").unwrap();
        assert_eq!(info["environment"], json!("prod"));
        assert_eq!(info["__reclass__"]["environment"], json!("prod"));
    }

    #[test]
    fn test_inventory_value_query() {
        let compiler = compiler_with(
            &[
                (
                    "node1",
                    "exports:\n  a: 1\n  b: 2\nparameters:\n  exp: \"$[ exports:a ]\"\n",
                ),
                ("node2", "exports:\n  a: 3\n  b: 4\nparameters: {}\n"),
            ],
            &[],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("node1").unwrap();
        assert_eq!(
            parameters_of(&info)["exp"],
            json!({"node1": 1, "node2": 3})
        );
    }

    #[test]
    fn test_inventory_filtered_query() {
        let compiler = compiler_with(
            &[
                (
                    "node1",
                    "exports:\n  a: 1\n  b: 2\nparameters:\n  exp: \"$[ exports:a if exports:b == 4 ]\"\n",
                ),
                ("node2", "exports:\n  a: 3\n  b: 4\nparameters: {}\n"),
            ],
            &[],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("node1").unwrap();
        assert_eq!(parameters_of(&info)["exp"], json!({"node2": 3}));
    }

    #[test]
    fn test_inventory_list_test_query() {
        let compiler = compiler_with(
            &[
                (
                    "n1",
                    "exports:\n  b: 2\nparameters:\n  exp: \"$[ if exports:b == 2 ]\"\n",
                ),
                ("n2", "exports:\n  b: 3\nparameters: {}\n"),
                ("n3", "exports:\n  b: 2\nparameters: {}\n"),
            ],
            &[],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("n1").unwrap();
        assert_eq!(parameters_of(&info)["exp"], json!(["n1", "n3"]));
    }

    #[test]
    fn test_exports_render_against_own_parameters() {
        let compiler = compiler_with(
            &[
                (
                    "n1",
                    "parameters:\n  host: h1\nexports:\n  hostname: \"${host}\"\n",
                ),
                (
                    "n2",
                    "parameters:\n  host: h2\n  all: \"$[ exports:hostname ]\"\nexports:\n  hostname: \"${host}\"\n",
                ),
            ],
            &[],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("n2").unwrap();
        assert_eq!(
            parameters_of(&info)["all"],
            json!({"n1": "h1", "n2": "h2"})
        );
        assert_eq!(info["exports"], json!({"hostname": "h2"}));
    }

    #[test]
    fn test_inventory_document_shape() {
        let compiler = compiler_with(
            &[
                ("n1", "classes: [common]\napplications: [ssh]\nparameters: {}\n"),
                ("n2", "classes: [common]\nparameters: {}\n"),
            ],
            &[("common", "applications: [ntp]\nparameters: {}\n")],
            Settings::default(),
            None,
        );
        let inv = compiler.inventory().unwrap();
        assert!(inv["__reclass__"]["timestamp"].is_string());
        assert_eq!(inv["classes"], json!({"common": ["n1", "n2"]}));
        assert_eq!(inv["applications"]["ntp"], json!(["n1", "n2"]));
        assert_eq!(inv["applications"]["ssh"], json!(["n1"]));
        assert_eq!(inv["nodes"]["n1"]["__reclass__"]["name"], json!("n1"));
        assert_eq!(inv["nodes"]["n2"]["applications"], json!(["ntp"]));
    }

    #[test]
    fn test_nodeinfo_document_shape() {
        let compiler = compiler_with(
            &[("n1", "parameters:\n  a: 1\n")],
            &[],
            Settings::default(),
            None,
        );
        let info = compiler.nodeinfo("n1").unwrap();
        let header = &info["__reclass__"];
        assert_eq!(header["name"], json!("n1"));
        assert_eq!(header["node"], json!("n1"));
        assert!(header["uri"].as_str().unwrap().starts_with("memory://"));
        assert!(header["timestamp"].is_string());
        for key in ["classes", "applications", "parameters", "exports", "environment"] {
            assert!(info.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_missing_node() {
        let compiler = compiler_with(&[], &[], Settings::default(), None);
        assert!(matches!(
            compiler.nodeinfo("ghost").unwrap_err(),
            Error::NodeNotFound { .. }
        ));
    }

    #[test]
    fn test_input_data_merges_below_node() {
        let mut storage = MemoryStorage::new();
        storage
            .add_node("n1", "parameters:\n  b: node\n")
            .unwrap();
        let compiler = Compiler::new(
            Box::new(storage),
            None,
            Settings::default(),
            Some(json!({"a": "external", "b": "external"})),
        )
        .unwrap();
        let info = compiler.nodeinfo("n1").unwrap();
        assert_eq!(parameters_of(&info)["a"], json!("external"));
        assert_eq!(parameters_of(&info)["b"], json!("node"));
    }

    #[test]
    fn test_interpolation_error_names_the_node() {
        let compiler = compiler_with(
            &[("n1", "parameters:\n  a: \"${missing}\"\n")],
            &[],
            Settings::default(),
            None,
        );
        let err = compiler.nodeinfo("n1").unwrap_err();
        assert!(err.to_string().contains("n1"));
    }
}
