use crate::error::ForecastError;
use crate::models::Candle;
use crate::Result;

/// Sanity checks applied to exchange candles before they enter the panel
pub struct CandleValidator;

impl CandleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a candle for correctness
    pub fn validate(&self, candle: &Candle) -> Result<()> {
        self.validate_prices(candle)?;
        self.validate_timestamps(candle)?;
        self.validate_ohlc_relationship(candle)?;
        Ok(())
    }

    fn validate_prices(&self, candle: &Candle) -> Result<()> {
        for (name, value) in [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("Invalid {} price: {}", name, value)));
            }
        }
        // Quiet minutes trade nothing, so zero volume is fine
        if !candle.volume.is_finite() || candle.volume < 0.0 {
            return Err(invalid(format!("Invalid volume: {}", candle.volume)));
        }
        Ok(())
    }

    fn validate_timestamps(&self, candle: &Candle) -> Result<()> {
        if candle.close_time < candle.open_time {
            return Err(invalid(format!(
                "Close time {} precedes open time {}",
                candle.close_time, candle.open_time
            )));
        }
        Ok(())
    }

    fn validate_ohlc_relationship(&self, candle: &Candle) -> Result<()> {
        if candle.high < candle.low {
            return Err(invalid(format!(
                "High ({}) is less than low ({})",
                candle.high, candle.low
            )));
        }
        if candle.close > candle.high || candle.close < candle.low {
            return Err(invalid(format!(
                "Close ({}) outside high/low ({} - {})",
                candle.close, candle.low, candle.high
            )));
        }
        Ok(())
    }
}

impl Default for CandleValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(message: String) -> ForecastError {
    ForecastError::Decode(message)
}
