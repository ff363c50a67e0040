mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mneme::config::MnemeConfig;

#[derive(Parser)]
#[command(name = "mneme", version, about = "Semantic memory search MCP server for AI agents")]
struct Cli {
    /// Config file (defaults to ~/.mneme/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (transport from config or MNEME_TRANSPORT)
    Serve,
    /// Search a session's messages
    Search {
        /// Session to search
        session_id: String,
        /// Query text
        text: Option<String>,
        /// Metadata filter as JSON, e.g. '{"where": {"jsonpath": "$.tag"}}'
        #[arg(long)]
        filter: Option<String>,
        /// Diversify results with Maximal Marginal Relevance
        #[arg(long)]
        mmr: bool,
        /// MMR relevance/diversity trade-off in [0, 1]
        #[arg(long)]
        lambda: Option<f32>,
        /// Maximum number of results (0 = configured default)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import messages from a JSON array of {session_id, role, content, metadata?}
    Import { file: PathBuf },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.mneme/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MnemeConfig::load_from(path)?,
        None => MnemeConfig::load()?,
    };

    // stderr keeps stdout clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => server::serve(config).await?,
        Command::Search {
            session_id,
            text,
            filter,
            mmr,
            lambda,
            limit,
            json,
        } => {
            let args = cli::search::SearchArgs {
                session_id,
                text,
                filter,
                mmr,
                lambda,
                limit,
                json,
            };
            cli::search::search(&config, args).await?;
        }
        Command::Import { file } => cli::import::import(&config, &file).await?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
