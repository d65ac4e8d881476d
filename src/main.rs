//! nodeclass CLI entry point

use clap::Parser;
use nodeclass::cli::{Cli, OutputFormat};
use nodeclass::config;
use nodeclass::core::error::{Result, EX_OK, EX_USAGE};
use nodeclass::output;
use nodeclass::storage;
use nodeclass::Compiler;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_env("NODECLASS_LOG"))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EX_USAGE } else { EX_OK };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    match run(cli) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<String> {
    let config = config::load_config(cli.inventory_base_uri.as_deref())?;

    let mut settings = config.settings.clone();
    if cli.ignore_class_notfound {
        settings.ignore_class_notfound = true;
    }
    if let Some(patterns) = &cli.ignore_class_notfound_regexp {
        settings.ignore_class_notfound_regexp = patterns.clone();
    }
    if cli.compose_node_name {
        settings.compose_node_name = true;
    }
    if cli.single_error {
        settings.group_errors = false;
    }
    if cli.multiple_errors {
        settings.group_errors = true;
    }

    let storage_type = cli
        .storage_type
        .or(config.storage_type)
        .unwrap_or_else(|| "yaml_fs".to_string());
    let (nodes_uri, classes_uri) = storage::path_mangler(
        &storage_type,
        cli.inventory_base_uri
            .as_deref()
            .or(config.inventory_base_uri.as_deref()),
        cli.nodes_uri.as_deref().or(config.nodes_uri.as_deref()),
        cli.classes_uri
            .as_deref()
            .or(config.classes_uri.as_deref()),
    )?;
    let proxy = storage::get_storage(
        &storage_type,
        &nodes_uri,
        &classes_uri,
        settings.compose_node_name,
    )?;

    let compiler = Compiler::new(
        Box::new(proxy),
        config.class_mappings.as_deref(),
        settings,
        None,
    )?;

    let data = match &cli.nodeinfo {
        Some(nodename) => compiler.nodeinfo(nodename)?,
        None => compiler.inventory()?,
    };

    let format = cli.output.unwrap_or(match config.output.as_deref() {
        Some("json") => OutputFormat::Json,
        _ => OutputFormat::Yaml,
    });
    let pretty_print = cli.pretty_print || config.pretty_print.unwrap_or(false);
    output::to_string(&data, format, pretty_print)
}
