use anyhow::{Context, Result};
use clap::Parser;
use cryptocast::assembler::fetch_training_panel;
use cryptocast::logging::setup_logging;
use cryptocast::panel::PanelBuilder;
use cryptocast::synthetic::{token_batches, MarketScenario};
use cryptocast::training::train_on_panel;
use cryptocast::{AppConfig, BinanceClient};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train the forecaster on fresh exchange data and save the artifact", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./cryptocast.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Artifact path, overrides training.artifact_path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum epochs, overrides training.max_epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Train on generated candles instead of calling the exchange
    #[arg(long)]
    synthetic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    setup_logging(&config.log_filter.0);

    if let Some(output) = cli.output {
        config.training.artifact_path = output;
    }
    if let Some(epochs) = cli.epochs {
        config.training.max_epochs = epochs;
    }

    let panel = if cli.synthetic {
        tracing::info!("Generating synthetic panel (seed {})", config.training.seed);
        PanelBuilder::new().build(token_batches(config.training.seed, MarketScenario::Sideways))
    } else {
        let client = BinanceClient::from_config(&config.exchange).context("Failed to build HTTP client")?;
        fetch_training_panel(&client).await.context("Failed to fetch training data")?
    };

    let artifact = train_on_panel(&panel, &config).context("Training failed")?;
    artifact
        .save(&config.training.artifact_path)
        .context("Failed to save model artifact")?;

    tracing::info!(
        "Done: {} epochs, best epoch {:?}, best loss {:?}",
        artifact.summary.epochs_run,
        artifact.summary.best_epoch,
        artifact.summary.best_validation_loss
    );
    Ok(())
}
