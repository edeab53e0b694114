//! search-chat: a chat assistant that can search the web
//!
//! Runs a chat model with one web search tool as a small cyclic loop:
//! the model answers or asks for searches, whose results are fed back.

mod agent;
mod config;
mod error;
mod graph;
mod repl;
mod tools;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{Settings, CONFIG_FILE_NAME};
use crate::graph::AgentGraph;

// ANSI colors
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Parser)]
#[command(name = "search-chat")]
#[command(about = "Chat with a language model that can search the web", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: nearest search-chat.toml, then the user config)
    #[arg(short, long, global = true, env = "SEARCH_CHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start interactive chat REPL (default)
    Chat {
        /// Trace each loop step
        #[arg(long)]
        flow: bool,

        /// Skip exporting the loop diagram at startup
        #[arg(long)]
        no_graph: bool,
    },

    /// One-shot question (non-interactive)
    Ask {
        /// The prompt to send
        #[arg(required = true)]
        prompt: Vec<String>,
    },

    /// Export the loop diagram as Mermaid text and PNG
    Graph {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Only write the Mermaid file
        #[arg(long)]
        no_png: bool,
    },

    /// Write a default settings file
    Init {
        /// Where to write it (default: ./search-chat.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Commands::Graph { output, no_png }) => graph(&output, !no_png).await,
        Some(Commands::Init { path }) => init(path),
        Some(Commands::Ask { prompt }) => {
            let settings = load_settings(cli.config.as_deref())?;
            repl::ask(settings, &prompt.join(" ")).await
        }
        Some(Commands::Chat { flow, no_graph }) => {
            let settings = load_settings(cli.config.as_deref())?;
            repl::run(settings, flow, !no_graph).await
        }
        None => {
            let settings = load_settings(cli.config.as_deref())?;
            repl::run(settings, false, true).await
        }
    }
}

/// Load and validate settings; exits with a remediation message if
/// credentials are missing
fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    let settings = Settings::load(explicit)?;
    if let Err(e) = settings.validate() {
        eprintln!("{}Error:{} {}", YELLOW, RESET, e);
        std::process::exit(1);
    }
    Ok(settings)
}

async fn graph(output: &Path, png: bool) -> Result<()> {
    let graph = AgentGraph::agent();
    print!("{}", graph.describe());

    let files = graph.export(output, png).await;
    for path in files.mermaid.iter().chain(files.png.iter()) {
        println!("{}Wrote{} {}", GREEN, RESET, path.display());
    }
    Ok(())
}

fn init(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    Settings::create_default(&path)?;
    println!("{}Created{} {}", GREEN, RESET, path.display());
    println!("Set DASHSCOPE_API_KEY and TAVILY_API_KEY in your environment or a .env file.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_flags() {
        let cli = Cli::parse_from(["search-chat", "--verbose", "chat", "--flow", "--no-graph"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Some(Commands::Chat {
                flow: true,
                no_graph: true
            })
        ));
    }

    #[test]
    fn test_parse_ask_joins_words() {
        let cli = Cli::parse_from(["search-chat", "ask", "who", "won?"]);
        match cli.command {
            Some(Commands::Ask { prompt }) => assert_eq!(prompt.join(" "), "who won?"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
