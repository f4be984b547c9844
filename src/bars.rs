//! OHLCV bar types shared by the indicator library, pattern filters, and
//! the strategy engine.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One OHLCV observation for a single security at one period (daily or
/// minute). Timestamps are exchange-local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Close of the previous bar at the same period, as reported by the feed.
    pub prev_close: f64,
    /// Traded volume in board lots of 100 shares.
    pub volume: f64,
    /// Traded value in yuan.
    pub amount: f64,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Ordered sequence of bars for one security over a contiguous trading
/// window. Timestamps are strictly increasing within a series.
pub type BarSeries = Vec<Bar>;
