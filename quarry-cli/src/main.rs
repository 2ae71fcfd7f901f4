//! Quarry CLI: terminal interface for the Quarry research pipeline.

mod commands;
mod progress;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Quarry: multi-source research from the command line
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds .quarry/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an iterative research session and print the report
    Research {
        /// The research question
        query: String,
        /// Number of search/reflect passes
        #[arg(short, long)]
        depth: Option<u32>,
        /// Sub-queries per pass
        #[arg(short, long)]
        breadth: Option<u32>,
        /// Write the markdown report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Export the citation ledger as JSON to this file
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Search engines to use (repeatable)
        #[arg(short, long = "engine")]
        engines: Vec<String>,
        /// Render pages in a headless browser
        #[arg(long)]
        dynamic: bool,
        /// Bypass the search and page caches
        #[arg(long)]
        no_cache: bool,
        /// Append the chain of thought to the printed report
        #[arg(long)]
        thoughts: bool,
    },
    /// Query search engines and print merged results
    Search {
        query: String,
        /// Search engines to use (repeatable)
        #[arg(short, long = "engine")]
        engines: Vec<String>,
        /// Maximum number of results
        #[arg(short, long)]
        max: Option<usize>,
        /// Merge strategy: alternate, relevance, date
        #[arg(short, long)]
        strategy: Option<String>,
    },
    /// Search, read the top pages and print a cited summary
    Aisearch {
        query: String,
        /// Search engines to use (repeatable)
        #[arg(short, long = "engine")]
        engines: Vec<String>,
        /// Maximum number of results
        #[arg(short, long)]
        max: Option<usize>,
        /// Write the summary to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Ask for an in-depth analysis instead of a short summary
        #[arg(long)]
        detailed: bool,
        /// Summarize search snippets only, without fetching pages
        #[arg(long)]
        no_scrape: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fetch a page and print its extracted text
    Fetch {
        url: String,
        /// Render the page in a headless browser
        #[arg(long)]
        dynamic: bool,
        /// Ignore any cached copy
        #[arg(long)]
        refresh: bool,
    },
    /// List saved research sessions
    Sessions,
    /// Drop expired cache entries and saved sessions
    Clean {
        /// Only purge the caches, keep saved sessions
        #[arg(short, long)]
        cache_only: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write a default config file to the workspace
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr plus JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let log_dir = commands::data_dir().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "quarry.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("quarry_core=debug,quarry=debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.quiet).await
}
