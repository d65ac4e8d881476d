use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};

const HELP_TEMPLATE: &str = "\
{about}

{usage-heading} {usage}

{all-args}

{after-help}";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "nodeclass")]
#[command(author, version)]
#[command(about = "Hierarchical configuration compiler for node fleets")]
#[command(after_help = "Examples:
  nodeclass --inventory                 Render every node's view
  nodeclass --nodeinfo web1             Render one node
  nodeclass -b /srv/inventory -n web1   Use a specific inventory base
  nodeclass -o json -y --inventory      Pretty-printed JSON output

Exactly one mode has to be specified.")]
#[command(help_template = HELP_TEMPLATE)]
#[command(group(ArgGroup::new("mode").required(true).args(["inventory", "nodeinfo"])))]
pub struct Cli {
    /// Output the entire inventory
    #[arg(short = 'i', long)]
    pub inventory: bool,

    /// Output information for a specific node
    #[arg(short = 'n', long, value_name = "NODENAME")]
    pub nodeinfo: Option<String>,

    // -- database options --------------------------------------------------
    /// The type of storage backend to use
    #[arg(short = 's', long, value_name = "TYPE")]
    pub storage_type: Option<String>,

    /// The base URI to prepend to nodes and classes
    #[arg(short = 'b', long, value_name = "URI")]
    pub inventory_base_uri: Option<PathBuf>,

    /// The URI to the nodes storage
    #[arg(short = 'u', long, value_name = "URI")]
    pub nodes_uri: Option<PathBuf>,

    /// The URI to the classes storage
    #[arg(short = 'c', long, value_name = "URI")]
    pub classes_uri: Option<PathBuf>,

    /// Skip classes that cannot be found
    #[arg(short = 'z', long)]
    pub ignore_class_notfound: bool,

    /// Regexp restricting which missing classes may be skipped
    #[arg(short = 'x', long, value_name = "REGEXP")]
    pub ignore_class_notfound_regexp: Option<Vec<String>>,

    /// Compose node names from directory path segments
    #[arg(short = 'a', long)]
    pub compose_node_name: bool,

    // -- output options ----------------------------------------------------
    /// Output format
    #[arg(short = 'o', long, value_enum, value_name = "FORMAT")]
    pub output: Option<OutputFormat>,

    /// Try to make the output prettier
    #[arg(short = 'y', long)]
    pub pretty_print: bool,

    /// Output all key values, never use anchors or references
    #[arg(short = 'r', long)]
    pub no_refs: bool,

    /// Throw errors immediately instead of grouping them together
    #[arg(short = '1', long, overrides_with = "multiple_errors")]
    pub single_error: bool,

    /// Where possible, report any errors encountered as a group
    #[arg(short = '0', long)]
    pub multiple_errors: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
