//! Relay CLI — run the staged worker pipeline and inspect its recovery and
//! dispatch logic from the command line.
//!
//! Reuses the relay-core coordinator that embedding services call.

use clap::{Parser, Subcommand};

use relay_cli::commands;
use relay_cli::commands::run::RunOverrides;

/// Relay — staged remote workers with dispatch envelope recovery
#[derive(Parser)]
#[command(name = "relay", version, about = "Relay — staged remote workers with dispatch envelope recovery")]
pub struct Cli {
    /// Path to the relay YAML configuration
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the hosted agents service
    Run {
        /// Bidding zone or region code
        #[arg(long)]
        zone: String,
        /// City the request is about
        #[arg(long)]
        city: String,
        /// Date (YYYY-MM-DD); "today" or empty means the current date
        #[arg(long, default_value = "today")]
        date: String,
        /// Free-text user request
        #[arg(long)]
        request: String,
        /// Log the dispatch envelope instead of sending it
        #[arg(long)]
        dry_run: bool,
        /// Inline attachments up to this many bytes
        #[arg(long)]
        inline_threshold: Option<u64>,
    },

    /// Run the pipeline against scripted in-process workers
    Demo {
        /// Free-text user request
        #[arg(long, default_value = "Compute today's savings and email them to ops@example.com")]
        request: String,
        /// Log the dispatch envelope instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the JSON objects recoverable from worker text
    Extract {
        /// Input file, or "-" for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Build the canonical dispatch envelope from worker text
    Normalize {
        /// Input file, or "-" for stdin
        #[arg(default_value = "-")]
        input: String,
        /// Inline attachments up to this many bytes
        #[arg(long)]
        inline_threshold: Option<u64>,
    },

    /// Show whether a request would trigger email dispatch
    Gate {
        /// Free-text user request
        text: String,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the configuration without running anything
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_core=info,relay_cli=info".into()),
        )
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run {
            zone,
            city,
            date,
            request,
            dry_run,
            inline_threshold,
        } => {
            let overrides = RunOverrides {
                dry_run,
                inline_threshold,
            };
            commands::run::run(config, &overrides, &zone, &city, &date, &request).await
        }
        Commands::Demo { request, dry_run } => commands::demo::run(&request, dry_run).await,
        Commands::Extract { input } => commands::extract::run(&input, config),
        Commands::Normalize {
            input,
            inline_threshold,
        } => commands::normalize::run(&input, config, inline_threshold),
        Commands::Gate { text } => commands::gate::run(&text),
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config::validate(config),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
