//! HTTP inference service

use crate::api::BinanceClient;
use crate::assembler::fetch_inference_panel;
use crate::error::ForecastError;
use crate::forecaster::Forecaster;
use crate::models::Token;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared, read-only request state
pub struct AppState {
    pub client: BinanceClient,
    /// `None` when no usable artifact was found at startup
    pub forecaster: Option<Arc<Forecaster>>,
}

impl AppState {
    pub fn new(client: BinanceClient, forecaster: Option<Forecaster>) -> Arc<Self> {
        Arc::new(Self {
            client,
            forecaster: forecaster.map(Arc::new),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/inference/{token}", get(inference))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until Ctrl+C
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model_loaded": state.forecaster.is_some(),
    }))
}

async fn inference(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<f64>, ForecastError> {
    predict(&state, &token)
        .await
        .map(Json)
        .inspect_err(|e| tracing::warn!(token = %token, "Inference failed: {}", e))
}

async fn predict(state: &AppState, ticker: &str) -> Result<f64, ForecastError> {
    let token = Token::parse(ticker)?;
    let forecaster = state
        .forecaster
        .as_ref()
        .ok_or_else(|| ForecastError::ModelUnavailable("no model loaded".into()))?;

    let panel = fetch_inference_panel(&state.client, token, forecaster.encoder_length()).await?;
    let prediction = forecaster.predict(&panel, token)?;

    tracing::info!(
        token = %prediction.token,
        current_price = prediction.current_price,
        current_time = %prediction.current_time,
        predicted_price = prediction.predicted_price,
        horizon_minutes = prediction.horizon_minutes,
        "Prediction served"
    );

    Ok(prediction.predicted_price)
}
