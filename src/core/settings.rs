//! Engine settings
//!
//! A plain value object threaded through merge, interpolation, and storage.
//! There is no global state; every knob the engine recognizes lives here and
//! can be set from the config file or the command line.

use serde::{Deserialize, Serialize};

/// All recognized engine settings with their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path separator inside reference strings
    pub delimiter: char,
    /// Opening and closing sentinel of a `${…}` reference
    pub reference_sentinels: (String, String),
    /// Opening and closing sentinel of a `$[…]` inventory query
    pub export_sentinels: (String, String),
    /// Escape character for sentinels and the delimiter
    pub escape_character: char,
    /// Dictionary key prefix forcing replacement of the previous value
    pub dict_key_override_prefix: char,
    /// Dictionary key prefix forbidding later replacement
    pub dict_key_constant_prefix: char,

    pub allow_scalar_over_dict: bool,
    pub allow_scalar_over_list: bool,
    pub allow_list_over_scalar: bool,
    pub allow_dict_over_scalar: bool,
    pub allow_none_override: bool,

    /// Inject the `_reclass_` parameter block into every node
    pub automatic_parameters: bool,
    /// Environment assumed for nodes that do not declare one
    pub default_environment: String,

    /// Skip inventory nodes whose documents fail to load
    pub inventory_ignore_failed_node: bool,
    /// Default for queries without the `+IgnoreErrors` option
    pub inventory_ignore_failed_render: bool,

    /// Reassigning a `=`-marked value is fatal
    pub strict_constant_parameters: bool,

    pub ignore_class_notfound: bool,
    pub ignore_class_notfound_regexp: Vec<String>,
    pub ignore_class_notfound_warning: bool,

    /// Drop failing intermediate members of an overwritten value chain
    pub ignore_overwritten_missing_references: bool,
    /// Collect resolve errors and report them all at once
    pub group_errors: bool,
    /// Compose node names from directory path segments
    pub compose_node_name: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delimiter: ':',
            reference_sentinels: ("${".to_string(), "}".to_string()),
            export_sentinels: ("$[".to_string(), "]".to_string()),
            escape_character: '\\',
            dict_key_override_prefix: '~',
            dict_key_constant_prefix: '=',
            allow_scalar_over_dict: false,
            allow_scalar_over_list: false,
            allow_list_over_scalar: false,
            allow_dict_over_scalar: false,
            allow_none_override: false,
            automatic_parameters: true,
            default_environment: "base".to_string(),
            inventory_ignore_failed_node: false,
            inventory_ignore_failed_render: false,
            strict_constant_parameters: true,
            ignore_class_notfound: false,
            ignore_class_notfound_regexp: vec![".*".to_string()],
            ignore_class_notfound_warning: true,
            ignore_overwritten_missing_references: true,
            group_errors: true,
            compose_node_name: false,
        }
    }
}

impl Settings {
    /// Whether `c` is one of the dictionary key control prefixes.
    pub fn is_key_prefix(&self, c: char) -> bool {
        c == self.dict_key_override_prefix || c == self.dict_key_constant_prefix
    }

    /// Number of sentinel openings occurring in `s`, used to pick the
    /// parsing fast path.
    pub fn count_sentinels(&self, s: &str) -> usize {
        s.matches(self.reference_sentinels.0.as_str()).count()
            + s.matches(self.export_sentinels.0.as_str()).count()
    }
}
