use anyhow::{Context, Result};
use clap::Parser;
use tickrelay_config::load_config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Streams live prices and routes leveled alerts")]
struct Cli {
    /// Configuration environment overlay (`config/{name}.toml`).
    #[arg(long)]
    environment: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config =
        load_config(cli.environment.as_deref()).context("failed to load configuration")?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tickrelay_engine::app::run(config).await
}
