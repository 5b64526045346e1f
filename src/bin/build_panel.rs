use anyhow::{Context, Result};
use clap::Parser;
use cryptocast::assembler::fetch_training_panel;
use cryptocast::logging::setup_logging;
use cryptocast::{AppConfig, BinanceClient};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "build_panel")]
#[command(about = "Fetch candles for every token and write the assembled panel as CSV", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./cryptocast.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output CSV path
    #[arg(short, long, default_value = "data/panel.csv")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    setup_logging(&config.log_filter.0);

    let client = BinanceClient::from_config(&config.exchange).context("Failed to build HTTP client")?;
    let panel = fetch_training_panel(&client).await.context("Failed to fetch candles")?;

    if let Some(parent) = cli.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&cli.output)
        .with_context(|| format!("Failed to create {}", cli.output.display()))?;
    panel.write_csv(BufWriter::new(file))?;

    if let Some((min, max)) = panel.time_bounds() {
        tracing::info!(
            "Wrote {} rows ({} symbols, time_idx {}..={}) to {}",
            panel.len(),
            panel.symbols().len(),
            min,
            max,
            cli.output.display()
        );
    }
    Ok(())
}
