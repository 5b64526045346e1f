use crate::config::ExchangeConfig;
use crate::error::ForecastError;
use crate::models::{Candle, Token};
use crate::panel::CandleBatch;
use crate::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::time::Duration;

const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";
const DEFAULT_INTERVAL: &str = "1m";

/// Client for the Binance spot `/klines` endpoint
///
/// One request per call: no retries, pagination, or rate limiting.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    interval: String,
}

/// `[open_time, open, high, low, close, volume, close_time, quote_volume,
///   trades, taker_base, taker_quote, ignore]`
#[derive(Debug, Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    IgnoredAny,
);

impl RawKline {
    fn into_candle(self) -> Result<Candle> {
        Ok(Candle {
            open_time: millis(self.0)?,
            close_time: millis(self.6)?,
            open: decimal("open", &self.1)?,
            high: decimal("high", &self.2)?,
            low: decimal("low", &self.3)?,
            close: decimal("close", &self.4)?,
            volume: decimal("volume", &self.5)?,
            quote_volume: decimal("quote_volume", &self.7)?,
            trade_count: self.8,
            taker_buy_base_volume: decimal("taker_buy_base_volume", &self.9)?,
            taker_buy_quote_volume: decimal("taker_buy_quote_volume", &self.10)?,
        })
    }
}

fn decimal(field: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| ForecastError::Decode(format!("{} is not a number: {:?}", field, value)))
}

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ForecastError::Decode(format!("timestamp out of range: {}", ms)))
}

impl BinanceClient {
    pub fn new() -> Self {
        Self::with_base_url(BINANCE_API_BASE)
    }

    /// Point the client at another host, e.g. a mock server in tests
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            interval: DEFAULT_INTERVAL.to_string(),
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            interval: config.interval.clone(),
        })
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    /// Fetch up to `limit` of the most recent klines for `symbol`, oldest first
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!("{}/klines", self.base_url);
        let limit = limit.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("interval", interval), ("limit", limit.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!("Binance returned {} for {}: {}", status, symbol, body);
            return Err(ForecastError::UpstreamUnavailable {
                status: status.as_u16(),
                body,
            });
        }

        let raw: Vec<RawKline> = serde_json::from_str(&body)
            .map_err(|e| ForecastError::Decode(format!("klines for {}: {}", symbol, e)))?;
        let candles = raw
            .into_iter()
            .map(RawKline::into_candle)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Fetched {} {} klines for {}", candles.len(), interval, symbol);
        Ok(candles)
    }

    /// Fetch `limit` candles for `token` at the configured interval
    pub async fn fetch_batch(&self, token: Token, limit: u32) -> Result<CandleBatch> {
        let candles = self.get_klines(token.symbol(), &self.interval, limit).await?;
        Ok(CandleBatch::new(token.symbol(), candles))
    }
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::io::Write;

    const TWO_KLINES: &str = r#"[
        [1704067200000, "3000.10", "3001.00", "2999.50", "3000.80", "12.5", 1704067259999, "37510.0", 42, "6.0", "18004.8", "0"],
        [1704067260000, "3000.80", "3002.00", "3000.00", "3001.90", "8.25", 1704067319999, "24765.6", 31, "4.1", "12307.8", "0"]
    ]"#;

    #[tokio::test]
    async fn test_get_klines_decodes_rows() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "1m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TWO_KLINES)
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(server.url());
        let candles = client.get_klines("ETHUSDT", "1m", 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 3000.80);
        assert_eq!(candles[0].trade_count, 42);
        assert_eq!(candles[1].close_time.timestamp_millis(), 1704067319999);
        assert!((candles[1].range() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_error_status_keeps_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klines")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("rate limited")
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(server.url());
        let err = client.get_klines("BTCUSDT", "1m", 10).await.unwrap_err();
        match err {
            ForecastError::UpstreamUnavailable { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klines")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[[1704067200000, "abc"]]"#)
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(server.url());
        let err = client.get_klines("BTCUSDT", "1m", 1).await.unwrap_err();
        assert!(matches!(err, ForecastError::Decode(_)));
    }

    #[tokio::test]
    async fn test_non_numeric_price_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klines")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[[1704067200000, "x", "1", "1", "1", "1", 1704067259999, "1", 1, "1", "1", "0"]]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(server.url());
        let err = client.get_klines("BTCUSDT", "1m", 1).await.unwrap_err();
        assert!(matches!(err, ForecastError::Decode(msg) if msg.contains("open")));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = BinanceClient::with_base_url("http://127.0.0.1:1");
        let err = client.get_klines("BTCUSDT", "1m", 1).await.unwrap_err();
        assert!(matches!(err, ForecastError::Transport(_)));
    }

    #[tokio::test]
    async fn test_configured_timeout_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klines")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_secs(3));
                w.write_all(TWO_KLINES.as_bytes())
            })
            .create_async()
            .await;

        let config = ExchangeConfig {
            base_url: server.url(),
            interval: "1m".to_string(),
            timeout_secs: Some(1),
        };
        let client = BinanceClient::from_config(&config).unwrap();

        let started = std::time::Instant::now();
        let err = client.get_klines("ETHUSDT", "1m", 2).await.unwrap_err();
        assert!(matches!(err, ForecastError::Transport(_)), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_fetch_batch_tags_symbol() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/klines")
            .match_query(Matcher::UrlEncoded("symbol".into(), "SOLUSDT".into()))
            .with_status(200)
            .with_body(TWO_KLINES)
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(server.url());
        let batch = client.fetch_batch(Token::Sol, 600).await.unwrap();
        assert_eq!(batch.symbol, "SOLUSDT");
        assert_eq!(batch.candles.len(), 2);
    }
}
