//! Deterministic 1-minute candle generation for tests and offline training

use crate::models::{Candle, Token};
use crate::panel::CandleBatch;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

/// 2024-01-01T00:00:00Z
const DEFAULT_START_SECS: i64 = 1_704_067_200;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Straight line, +0.01% of the base price per minute, no randomness
    LinearTrend,
    /// Mean-reverting random walk (±0.1% per minute around the base)
    Sideways,
    /// Large swings (±1% per minute), floored at half the base price
    Volatile,
    /// Random walk with a missing minute after every 50 candles
    WithGaps,
}

/// Seeded generator of exchange-shaped 1-minute candles
pub struct SyntheticCandleGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    start: DateTime<Utc>,
}

impl SyntheticCandleGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 150.0,
            base_volume: 1_000.0,
            start: Utc
                .timestamp_opt(DEFAULT_START_SECS, 0)
                .single()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price = price;
        self
    }

    /// Open time of the first candle
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn generate(&mut self, scenario: MarketScenario, num_candles: usize) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let mut minute = 0i64;

        for i in 0..num_candles {
            if scenario == MarketScenario::WithGaps && i > 0 && i % 50 == 0 {
                minute += 1;
            }
            let open_time = self.start + Duration::minutes(minute);
            let previous = price;

            let candle = match scenario {
                MarketScenario::LinearTrend => {
                    price = self.base_price * (1.0 + 0.0001 * i as f64);
                    linear_candle(open_time, previous.min(price), price, self.base_volume)
                }
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - price) * 0.1;
                    price += reversion + price * self.rng.gen_range(-0.001..0.001);
                    self.random_candle(open_time, previous, price)
                }
                MarketScenario::Volatile => {
                    price += price * self.rng.gen_range(-0.01..0.01);
                    price = price.max(self.base_price * 0.5);
                    self.random_candle(open_time, previous, price)
                }
                MarketScenario::WithGaps => {
                    price += price * self.rng.gen_range(-0.001..0.001);
                    self.random_candle(open_time, previous, price)
                }
            };

            candles.push(candle);
            minute += 1;
        }

        candles
    }

    fn random_candle(&mut self, open_time: DateTime<Utc>, open: f64, close: f64) -> Candle {
        let noise_pct = 0.0005;
        let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);
        let trade_count = self.rng.gen_range(50..500);
        let taker_share = self.rng.gen_range(0.3..0.7);

        Candle {
            open_time,
            close_time: close_time(open_time),
            open,
            high,
            low,
            close,
            volume,
            quote_volume: volume * close,
            trade_count,
            taker_buy_base_volume: volume * taker_share,
            taker_buy_quote_volume: volume * taker_share * close,
        }
    }
}

fn linear_candle(open_time: DateTime<Utc>, open: f64, close: f64, volume: f64) -> Candle {
    Candle {
        open_time,
        close_time: close_time(open_time),
        open,
        high: close * 1.0002,
        low: open * 0.9998,
        close,
        volume,
        quote_volume: volume * close,
        trade_count: 100,
        taker_buy_base_volume: volume / 2.0,
        taker_buy_quote_volume: volume / 2.0 * close,
    }
}

/// Exchange convention: a 1-minute bar closes 1 ms before the next one opens
fn close_time(open_time: DateTime<Utc>) -> DateTime<Utc> {
    open_time + Duration::milliseconds(59_999)
}

/// Rough price level per token, keeps synthetic panels on realistic scales
pub fn reference_price(token: Token) -> f64 {
    match token {
        Token::Bnb => 600.0,
        Token::Btc => 65_000.0,
        Token::Eth => 3_000.0,
        Token::Sol => 150.0,
    }
}

/// One batch per supported token, each with that token's history limit
pub fn token_batches(seed: u64, scenario: MarketScenario) -> Vec<CandleBatch> {
    Token::ALL
        .iter()
        .enumerate()
        .map(|(i, token)| {
            let mut generator =
                SyntheticCandleGenerator::new(seed.wrapping_add(i as u64)).with_base_price(reference_price(*token));
            let candles = generator.generate(scenario, token.history_limit() as usize);
            CandleBatch::new(token.symbol(), candles)
        })
        .collect()
}

/// Encode candles the way the exchange's `/klines` endpoint returns them
pub fn to_kline_json(candles: &[Candle]) -> Value {
    Value::Array(
        candles
            .iter()
            .map(|c| {
                json!([
                    c.open_time.timestamp_millis(),
                    c.open.to_string(),
                    c.high.to_string(),
                    c.low.to_string(),
                    c.close.to_string(),
                    c.volume.to_string(),
                    c.close_time.timestamp_millis(),
                    c.quote_volume.to_string(),
                    c.trade_count,
                    c.taker_buy_base_volume.to_string(),
                    c.taker_buy_quote_volume.to_string(),
                    "0"
                ])
            })
            .collect(),
    )
}
