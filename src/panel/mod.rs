pub mod validator;

use crate::models::{Candle, PanelRow};
use crate::Result;
use chrono::{DateTime, Utc};
use std::io::Write;

pub use validator::CandleValidator;

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Raw candles for one symbol, as returned by the exchange
#[derive(Debug, Clone)]
pub struct CandleBatch {
    pub symbol: String,
    pub candles: Vec<Candle>,
}

impl CandleBatch {
    pub fn new(symbol: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.into(),
            candles,
        }
    }
}

/// Time-aligned multi-symbol feature panel
///
/// Rows are unique on (`time_idx`, `symbol`) and sorted by (`symbol`, `time_idx`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    rows: Vec<PanelRow>,
}

impl Panel {
    /// Normalize arbitrary rows into a panel
    ///
    /// Recomputes `time_idx` from the earliest timestamp over all rows, copies `price`
    /// into `target`, keeps the earliest row for each (`time_idx`, `symbol`), and sorts.
    /// Applying this to an existing panel's rows returns the same panel.
    pub fn from_rows(mut rows: Vec<PanelRow>) -> Panel {
        let Some(origin) = rows.iter().map(|r| r.timestamp).min() else {
            return Panel::default();
        };

        for row in rows.iter_mut() {
            row.time_idx = minutes_since(origin, row.timestamp);
            row.target = row.price;
        }

        // Stable sort: among duplicates the earliest timestamp wins, then input order.
        // Keeping the earliest row guarantees the origin row always survives.
        rows.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then(a.time_idx.cmp(&b.time_idx))
                .then(a.timestamp.cmp(&b.timestamp))
        });
        rows.dedup_by(|later, kept| later.symbol == kept.symbol && later.time_idx == kept.time_idx);

        Panel { rows }
    }

    pub fn rows(&self) -> &[PanelRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<PanelRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct symbols in sorted order
    pub fn symbols(&self) -> Vec<&str> {
        self.groups().map(|(symbol, _)| symbol).collect()
    }

    /// Rows of one symbol, ordered by `time_idx`
    pub fn group(&self, symbol: &str) -> &[PanelRow] {
        let start = self.rows.partition_point(|r| r.symbol.as_str() < symbol);
        let end = self.rows.partition_point(|r| r.symbol.as_str() <= symbol);
        &self.rows[start..end]
    }

    /// Iterate over (symbol, rows) groups
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[PanelRow])> {
        self.rows
            .chunk_by(|a, b| a.symbol == b.symbol)
            .map(|chunk| (chunk[0].symbol.as_str(), chunk))
    }

    /// Smallest and largest `time_idx` in the panel
    pub fn time_bounds(&self) -> Option<(i64, i64)> {
        let min = self.rows.iter().map(|r| r.time_idx).min()?;
        let max = self.rows.iter().map(|r| r.time_idx).max()?;
        Some((min, max))
    }

    /// Write the panel as CSV with a header row
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

/// Turns per-symbol candle batches into a single aligned panel
pub struct PanelBuilder {
    validator: CandleValidator,
}

impl PanelBuilder {
    pub fn new() -> Self {
        Self {
            validator: CandleValidator::new(),
        }
    }

    /// Build the panel from one or more candle batches
    ///
    /// Batches may have different lengths; alignment always uses the global earliest
    /// close time. Candles failing validation are dropped.
    pub fn build(&self, batches: Vec<CandleBatch>) -> Panel {
        let capacity = batches.iter().map(|b| b.candles.len()).sum();
        let mut rows = Vec::with_capacity(capacity);

        for batch in batches {
            let mut dropped = 0usize;
            for candle in &batch.candles {
                if let Err(e) = self.validator.validate(candle) {
                    dropped += 1;
                    tracing::debug!("Dropping {} candle at {}: {}", batch.symbol, candle.close_time, e);
                    continue;
                }
                rows.push(PanelRow {
                    timestamp: candle.close_time,
                    symbol: batch.symbol.clone(),
                    price: candle.close,
                    volume: candle.volume,
                    range: candle.range(),
                    time_idx: 0,
                    target: candle.close,
                });
            }
            if dropped > 0 {
                tracing::warn!(
                    "Dropped {} invalid candles out of {} for {}",
                    dropped,
                    batch.candles.len(),
                    batch.symbol
                );
            }
        }

        let panel = Panel::from_rows(rows);
        tracing::debug!(
            "Built panel with {} rows across {} symbols",
            panel.len(),
            panel.symbols().len()
        );
        panel
    }
}

impl Default for PanelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn minutes_since(origin: DateTime<Utc>, timestamp: DateTime<Utc>) -> i64 {
    (timestamp - origin)
        .num_milliseconds()
        .div_euclid(MILLIS_PER_MINUTE)
}
