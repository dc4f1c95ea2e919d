//! `xmlctx` command line: query, edit, merge and transform XML files.

pub mod commands;
pub mod util;

use crate::commands::{edit, merge, number, query, transform};
use crate::util::CliResult;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "xmlctx", version, about = "Query, edit, merge and transform XML documents")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set, e.g. `debug` or `xmlctx_core=trace`.
    #[arg(long = "log-level", global = true, env = "XMLCTX_LOG_LEVEL", default_value = "xmlctx=info")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate an XPath expression and print the result.
    Query(query::QueryArgs),
    /// Report whether an expression selects any node.
    Exists(edit::ExistsArgs),
    /// Set the value of the selected attributes.
    SetAttr(edit::SetAttrArgs),
    /// Replace the content of the selected nodes.
    SetContent(edit::SetContentArgs),
    /// Remove the selected nodes.
    Remove(edit::RemoveArgs),
    /// Copy nodes of one document into another.
    Merge(merge::MergeArgs),
    /// Convert the result of an expression to a number.
    Number(number::NumberArgs),
    /// Apply an XSLT 1.0 stylesheet.
    Transform(transform::TransformArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    // A second init (tests calling run twice) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let output = execute(cli.command)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Runs one command and returns what should be printed.
pub fn execute(command: Commands) -> CliResult<String> {
    tracing::debug!(?command, "executing command");
    match command {
        Commands::Query(args) => query::run(&args),
        Commands::Exists(args) => edit::exists(&args),
        Commands::SetAttr(args) => edit::set_attr(&args),
        Commands::SetContent(args) => edit::set_content(&args),
        Commands::Remove(args) => edit::remove(&args),
        Commands::Merge(args) => merge::run(&args),
        Commands::Number(args) => number::run(&args),
        Commands::Transform(args) => transform::run(&args),
    }
}
