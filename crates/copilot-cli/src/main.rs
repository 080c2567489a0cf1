use anyhow::Result;
use clap::{Parser, Subcommand};

use copilot_core::{CopilotConfig, CopilotPaths};

mod bridge_client;
mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "copilot")]
#[command(about = "Ask questions about your Drive, with sources.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize read access to your Drive
    Auth {
        /// Print the consent URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Ask the bridge daemon for an access token
    Token {
        /// Print the full token instead of a masked preview
        #[arg(long)]
        raw: bool,
    },

    /// Show backend health and which documents are ingested
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start ingesting documents from Drive
    Ingest,

    /// Ask a question about your ingested documents
    Search {
        /// The question
        #[arg(value_name = "QUERY", required = true)]
        query: Vec<String>,

        /// Restrict the search to one ingested document
        #[arg(long, short)]
        document: Option<String>,

        /// Pick the document from the ingested list
        #[arg(long, conflicts_with = "document")]
        pick: bool,

        /// Print HTML markup instead of terminal text
        #[arg(long)]
        html: bool,
    },

    /// Sign in to the backend
    Login {
        #[arg(long, short)]
        username: Option<String>,
    },

    /// Forget the signed-in user
    Logout,

    /// Show the signed-in user
    Whoami,
}

/// Paths and configuration shared by every command.
pub struct Settings {
    pub paths: CopilotPaths,
    pub config: CopilotConfig,
}

impl Settings {
    fn load() -> Result<Self> {
        let paths = CopilotPaths::from_env();
        let config = CopilotConfig::load_with_env(&paths.config_path)?;
        Ok(Self { paths, config })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Debug logs are hidden unless RUST_LOG asks for them
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    match cli.command {
        Commands::Auth { no_browser } => commands::auth::run(&settings, no_browser).await,
        Commands::Token { raw } => commands::token::run(&settings, raw).await,
        Commands::Status { json } => commands::status::run(&settings, json).await,
        Commands::Ingest => commands::ingest::run(&settings).await,
        Commands::Search {
            query,
            document,
            pick,
            html,
        } => commands::search::run(&settings, &query.join(" "), document, pick, html).await,
        Commands::Login { username } => commands::session::login(&settings, username).await,
        Commands::Logout => commands::session::logout(&settings),
        Commands::Whoami => commands::session::whoami(&settings),
    }
}
