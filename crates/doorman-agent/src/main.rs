//! Doorman client agent binary.
//!
//! # Usage
//!
//! ```bash
//! # Development defaults (empty schema, bind 0.0.0.0:7198)
//! doorman-agent
//!
//! # Production
//! doorman-agent --config agent.toml
//! ```

use clap::Parser;
use doorman_agent::{AgentConfig, ClientAgent};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Doorman client agent
#[derive(Parser, Debug)]
#[command(name = "doorman-agent")]
#[command(about = "Edge gateway between game clients and the object server cluster")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Override the configured bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => {
            tracing::warn!("no configuration file given - using development defaults");
            tracing::warn!("clients can only reach uberdogs declared in configuration");
            AgentConfig::default()
        },
    };

    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    tracing::info!("doorman client agent starting");
    tracing::info!("expected client version: {}", config.version);

    let agent = ClientAgent::bind(config).await?;
    tracing::info!("listening on {}", agent.local_addr()?);

    agent.run().await?;

    Ok(())
}
