use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "trawl",
    version,
    about = "Stealth crawl orchestrator for dropshipping catalog discovery",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator server (admin API + webhook ingress)
    Serve,

    /// Initialize the database schema and exit
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    tracing::info!("trawl crawl orchestrator starting");

    match cli.command {
        Commands::Serve => commands::serve().await,
        Commands::InitDb => commands::init_db().await,
    }
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        std::env::var("TRAWL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };

    let filter = tracing_subscriber::EnvFilter::try_new(default_level)?;

    match format {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    Ok(())
}
