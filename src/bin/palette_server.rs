use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use palette_extractor::{config::Settings, server};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Serve dominant color palettes over HTTP.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (TOML, JSON or YAML). Defaults to `palette.*` in the
    /// working directory when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overrides `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides `server.port`
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    server::serve(settings).await?;
    Ok(())
}
