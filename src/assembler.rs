//! Fetch candles for one or more tokens and assemble them into a panel

use crate::api::BinanceClient;
use crate::models::Token;
use crate::panel::{Panel, PanelBuilder};
use crate::Result;

/// Training panel: every supported token at its own history limit
pub async fn fetch_training_panel(client: &BinanceClient) -> Result<Panel> {
    let mut batches = Vec::with_capacity(Token::ALL.len());
    for token in Token::ALL {
        let batch = client.fetch_batch(token, token.history_limit()).await?;
        tracing::info!("Fetched {} candles for {}", batch.candles.len(), batch.symbol);
        batches.push(batch);
    }

    let panel = PanelBuilder::new().build(batches);
    tracing::info!(
        "Assembled panel: {} rows, symbols {:?}",
        panel.len(),
        panel.symbols()
    );
    Ok(panel)
}

/// Single-token panel of the latest `limit` candles, built exactly as in training
pub async fn fetch_inference_panel(client: &BinanceClient, token: Token, limit: usize) -> Result<Panel> {
    let limit = u32::try_from(limit).unwrap_or(u32::MAX);
    let batch = client.fetch_batch(token, limit).await?;
    Ok(PanelBuilder::new().build(vec![batch]))
}
