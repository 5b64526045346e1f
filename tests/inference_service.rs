use cryptocast::dataset::WindowConfig;
use cryptocast::model::{Hyperparameters, QuantileForecaster};
use cryptocast::server::{router, AppState};
use cryptocast::synthetic::{to_kline_json, MarketScenario, SyntheticCandleGenerator};
use cryptocast::{BinanceClient, Forecaster};
use mockito::{Matcher, Mock, ServerGuard};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Start the service on an ephemeral port and return its base URL
async fn spawn_app(state: Arc<AppState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn forecaster(zero_weights: bool) -> Forecaster {
    let window = WindowConfig::default();
    let hp = Hyperparameters {
        input_size: window.feature_names().len(),
        encoder_length: window.encoder_length,
        prediction_length: window.prediction_length,
        hidden_size: 16,
        hidden_continuous_size: 8,
        attention_heads: 4,
        dropout: 0.3,
        quantiles: vec![0.02, 0.1, 0.25, 0.5, 0.75, 0.9, 0.98],
    };
    let mut model = QuantileForecaster::new(hp, &mut StdRng::seed_from_u64(42)).unwrap();
    if zero_weights {
        model = model.into_residual_only().unwrap();
    }
    Forecaster::new(model, window).unwrap()
}

/// 120 one-minute ETHUSDT candles rising linearly from 3000
fn linear_eth_fixture() -> String {
    let candles = SyntheticCandleGenerator::new(0)
        .with_base_price(3000.0)
        .generate(MarketScenario::LinearTrend, 120);
    to_kline_json(&candles).to_string()
}

async fn mock_klines(server: &mut ServerGuard, symbol: &str, body: String) -> Mock {
    server
        .mock("GET", "/klines")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), symbol.into()),
            Matcher::UrlEncoded("interval".into(), "1m".into()),
            Matcher::UrlEncoded("limit".into(), "120".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_linear_fixture_returns_json_number() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = mock_klines(&mut upstream, "ETHUSDT", linear_eth_fixture()).await;

    let state = AppState::new(
        BinanceClient::with_base_url(upstream.url()),
        Some(forecaster(false)),
    );
    let base = spawn_app(state).await;

    let response = reqwest::get(format!("{}/inference/ETH", base)).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let price = body.as_f64().expect("body should be a bare JSON number");
    assert!(price.is_finite());
    assert_eq!((price * 100.0).round() / 100.0, price);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_zero_model_returns_last_close() {
    let mut upstream = mockito::Server::new_async().await;
    mock_klines(&mut upstream, "ETHUSDT", linear_eth_fixture()).await;

    let state = AppState::new(
        BinanceClient::with_base_url(upstream.url()),
        Some(forecaster(true)),
    );
    let base = spawn_app(state).await;

    // Lowercase tickers are accepted
    let body: Value = reqwest::get(format!("{}/inference/eth", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Residual-only model forecasts the last close: 3000 * (1 + 0.0001 * 119)
    assert_eq!(body.as_f64(), Some(3035.7));
}

#[tokio::test]
async fn test_unsupported_token_is_400_without_upstream_call() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/klines")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let state = AppState::new(
        BinanceClient::with_base_url(upstream.url()),
        Some(forecaster(false)),
    );
    let base = spawn_app(state).await;

    for token in ["doge", "XRP", "ethusdt"] {
        let response = reqwest::get(format!("{}/inference/{}", base, token))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Unsupported token");
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upstream_503_passes_through() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("GET", "/klines")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("rate limited")
        .create_async()
        .await;

    let state = AppState::new(
        BinanceClient::with_base_url(upstream.url()),
        Some(forecaster(false)),
    );
    let base = spawn_app(state).await;

    let response = reqwest::get(format!("{}/inference/BTC", base)).await.unwrap();
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Failed to retrieve data from Binance API");
    assert!(body["details"].as_str().unwrap().contains("rate limited"));
}

#[tokio::test]
async fn test_missing_model_is_500() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/klines")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let state = AppState::new(BinanceClient::with_base_url(upstream.url()), None);
    let base = spawn_app(state).await;

    let response = reqwest::get(format!("{}/inference/SOL", base)).await.unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Model is not available");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_short_history_is_bad_gateway() {
    let mut upstream = mockito::Server::new_async().await;
    let candles = SyntheticCandleGenerator::new(0).generate(MarketScenario::LinearTrend, 30);
    mock_klines(&mut upstream, "BNBUSDT", to_kline_json(&candles).to_string()).await;

    let state = AppState::new(
        BinanceClient::with_base_url(upstream.url()),
        Some(forecaster(false)),
    );
    let base = spawn_app(state).await;

    let response = reqwest::get(format!("{}/inference/BNB", base)).await.unwrap();
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let loaded = spawn_app(AppState::new(BinanceClient::new(), Some(forecaster(false)))).await;
    let empty = spawn_app(AppState::new(BinanceClient::new(), None)).await;

    let body: Value = reqwest::get(format!("{}/health", loaded))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], true);

    let body: Value = reqwest::get(format!("{}/health", empty))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["model_loaded"], false);
}
