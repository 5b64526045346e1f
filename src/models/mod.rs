use crate::error::ForecastError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One exchange kline (OHLCV bar) with the exchange's bookkeeping fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
}

impl Candle {
    /// High-low range of the bar
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// One row of the assembled feature panel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelRow {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub range: f64,
    /// Minutes since the earliest timestamp across every symbol in the batch
    pub time_idx: i64,
    /// Copy of `price`, used as the supervised label
    pub target: f64,
}

/// Tokens the service is allowed to forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    Bnb,
    Btc,
    Eth,
    Sol,
}

impl Token {
    pub const ALL: [Token; 4] = [Token::Bnb, Token::Btc, Token::Eth, Token::Sol];

    /// Case-insensitive lookup by ticker (`eth`, `BTC`, ...)
    pub fn parse(ticker: &str) -> Result<Token, ForecastError> {
        match ticker.to_uppercase().as_str() {
            "BNB" => Ok(Token::Bnb),
            "BTC" => Ok(Token::Btc),
            "ETH" => Ok(Token::Eth),
            "SOL" => Ok(Token::Sol),
            _ => Err(ForecastError::UnsupportedToken(ticker.to_string())),
        }
    }

    /// Lookup by exchange pair symbol (`ETHUSDT`)
    pub fn from_symbol(symbol: &str) -> Option<Token> {
        Token::ALL.into_iter().find(|t| t.symbol() == symbol)
    }

    pub fn ticker(&self) -> &'static str {
        match self {
            Token::Bnb => "BNB",
            Token::Btc => "BTC",
            Token::Eth => "ETH",
            Token::Sol => "SOL",
        }
    }

    /// Exchange pair symbol quoted in USDT
    pub fn symbol(&self) -> &'static str {
        match self {
            Token::Bnb => "BNBUSDT",
            Token::Btc => "BTCUSDT",
            Token::Eth => "ETHUSDT",
            Token::Sol => "SOLUSDT",
        }
    }

    /// Forecast horizon in minutes
    pub fn horizon_minutes(&self) -> usize {
        match self {
            Token::Sol => 10,
            _ => 20,
        }
    }

    /// Number of candles fetched for training. SOL has the shorter horizon and needs less history.
    pub fn history_limit(&self) -> u32 {
        match self {
            Token::Sol => 600,
            _ => 1200,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

impl FromStr for Token {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::parse(s)
    }
}
