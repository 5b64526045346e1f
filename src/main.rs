use anyhow::{Context, Result};
use clap::Parser;
use cryptocast::logging::setup_logging;
use cryptocast::server::{self, AppState};
use cryptocast::{AppConfig, BinanceClient, Forecaster};
use std::path::PathBuf;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "cryptocast")]
#[command(about = "Serve short-horizon crypto price forecasts over HTTP", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./cryptocast.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overrides server.bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on, overrides server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Model artifact, overrides server.model_path
    #[arg(short, long)]
    model: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    setup_logging(&config.log_filter.0);

    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(model) = cli.model {
        config.server.model_path = model;
    }

    // A missing or broken artifact leaves the service up, answering 500 on inference
    let forecaster = match Forecaster::load(&config.server.model_path) {
        Ok(forecaster) => Some(forecaster),
        Err(e) => {
            tracing::error!(
                "Model unavailable ({}): {}",
                config.server.model_path.display(),
                e
            );
            None
        }
    };

    let client = BinanceClient::from_config(&config.exchange).context("Failed to build HTTP client")?;
    let state = AppState::new(client, forecaster);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("cryptocast listening on http://{}", addr);

    server::serve(listener, state).await.context("Server error")?;
    Ok(())
}
