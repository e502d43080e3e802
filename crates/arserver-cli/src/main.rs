//! arserver - lock coordination server for collaborative scene editing

use anyhow::Context;
use arserver_core::config::Config;
use arserver_core::domain::graph::InMemoryGraph;
use arserver_core::domain::locking::ResourceId;
use arserver_core::engine::Engine;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arserver")]
#[command(author, version, about = "Lock coordination server for collaborative scene editing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the lock engine until Ctrl-C
    Serve {
        /// JSON object mapping each resource id to its parent id (or null)
        #[arg(short, long)]
        graph: Option<PathBuf>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print one configuration value
    Get {
        /// Key such as locking.lock_retries
        key: String,
    },
    /// Print the configuration file path
    Path,
}

fn init_tracing(config: &Config, verbose: bool) {
    let default_filter = if verbose { "debug" } else { config.logging.filter.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a .env file may carry ARSERVER_* overrides
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Serve { graph } => cmd_serve(config, graph.as_deref()).await,
        Commands::Config { action } => cmd_config(&config, action, cli.format),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_serve(config: Config, graph_file: Option<&Path>) -> anyhow::Result<()> {
    let graph = match graph_file {
        Some(path) => load_graph(path)?,
        None => InMemoryGraph::with_roots(),
    };
    info!(resources = graph.len(), "Scene graph loaded");

    let engine = Engine::start(config, Arc::new(graph))?;
    info!("arserver running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let report = engine.shutdown().await;
    println!("Shutdown complete: {}", report.summary());
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn cmd_config(config: &Config, action: ConfigAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => match format {
            OutputFormat::Text => print!("{}", config.to_toml()?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        },
        ConfigAction::Get { key } => println!("{}", config.get(&key)?),
        ConfigAction::Path => println!("{}", Config::config_path()?.display()),
    }
    Ok(())
}

/// Build the graph from a `{ "child": "parent" | null }` JSON file
fn load_graph(path: &Path) -> anyhow::Result<InMemoryGraph> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read graph file: {}", path.display()))?;
    parse_graph(&contents).with_context(|| format!("Failed to parse graph file: {}", path.display()))
}

fn parse_graph(json: &str) -> anyhow::Result<InMemoryGraph> {
    let parents: HashMap<String, Option<String>> = serde_json::from_str(json)?;

    let graph = InMemoryGraph::with_roots();
    for (id, parent) in parents {
        graph.insert(id, parent.map(ResourceId::from));
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arserver_core::domain::graph::GraphCache;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_graph() {
        let cli = Cli::try_parse_from(["arserver", "serve", "--graph", "scene.json", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Serve { graph } => assert_eq!(graph, Some(PathBuf::from("scene.json"))),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_get_json() {
        let cli = Cli::try_parse_from(["arserver", "config", "get", "locking.lock_retries", "--format", "json"])
            .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Config { action: ConfigAction::Get { ref key } } if key == "locking.lock_retries"
        ));
    }

    #[tokio::test]
    async fn test_parse_graph() {
        let graph = parse_graph(r#"{ "ap_1": "PROJECT", "action_1": "ap_1", "orphan": null }"#).unwrap();
        assert_eq!(graph.len(), 5);

        let ancestors = graph.ancestors(&"action_1".into()).await;
        assert_eq!(ancestors, vec![ResourceId::from("ap_1"), ResourceId::project()]);

        assert!(parse_graph("[1, 2]").is_err());
    }
}
