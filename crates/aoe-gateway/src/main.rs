//! aoe-gateway - HTTP gateway in front of several LLM providers

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use aoe_gateway::config::Config;
use aoe_gateway::error::Result;
use aoe_gateway::server::GatewayServer;

/// aoe-gateway - one request/response contract over PaLM, Bard and Spark
#[derive(Parser)]
#[command(name = "aoe-gateway")]
#[command(about = "A streaming gateway in front of several LLM providers")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aoe_gateway=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting aoe-gateway");

    let config = Config::load(config_path.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    if config.palm.api_key().is_none() {
        tracing::warn!(
            "{} is not set, PaLM routes will answer 503",
            config.palm.api_key_env
        );
    }
    if config.bard.url.is_empty() {
        tracing::info!("Bard relay URL not configured, ask_about_image disabled");
    }
    if config.spark.url.is_empty() {
        tracing::info!("Spark URL not configured, spark chat disabled");
    }

    GatewayServer::new(config).serve().await?;

    tracing::info!("aoe-gateway stopped");
    Ok(())
}
