//! Per-security session caches.
//!
//! `StockFacts` is built once per trading day from daily history so the
//! signal predicates stay cheap to re-evaluate every second. The embedded
//! `SignalState` is the only part that mutates intraday.

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime};

use crate::bars::Bar;
use crate::indicators::{candle_body_extreme, is_continuous_volume_reduction};
use crate::market::{
    is_flip_off_bar, is_limit_down_bar, is_limit_up_bar, theoretical_limit_down_price,
    theoretical_limit_price,
};

/// Intraday mutable state for one security, reset at session start.
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    /// Highest close observed at any MACD-top event today. Monotone
    /// non-decreasing.
    pub macd_top_price: f64,
    /// 0 = no partial sale yet, 1 = first partial sale done
    pub sell_percent_record: u8,
    /// When the throttled sell checks last ran
    pub macd_signal_updated: Option<NaiveDateTime>,
    /// When the MACD-top price was last raised
    pub macd_top_updated: Option<NaiveDateTime>,
    /// One-shot latch for the buy-on-dip entry
    pub buy_signal_generated: bool,
}

/// Per-security facts derived once from daily history at session start.
#[derive(Debug, Clone)]
pub struct StockFacts {
    /// Date of the most recent completed session
    pub yesterday_date: NaiveDate,
    /// Candle-body high of yesterday's bar (wicks excluded)
    pub yesterday_body_high: f64,
    pub yesterday_close: f64,
    pub yesterday_volume: f64,
    pub yesterday_limit_up: bool,
    /// Yesterday touched the limit but closed away from it
    pub yesterday_flipped: bool,
    /// Yesterday closed at the down limit
    pub yesterday_hit_down: bool,
    /// Yesterday's volume contracted versus the day before
    pub yesterday_contraction: bool,
    /// Open of the most recent limit-up day inside the pattern window
    pub last_limit_up_open: Option<f64>,
    /// Volume of the day following that limit-up day
    pub limit_up_next_day_volume: Option<f64>,
    /// Date of the last recorded entry for this security
    pub last_entry_date: Option<NaiveDate>,
    pub signal: SignalState,
}

impl StockFacts {
    /// Derive facts from daily history ending at the most recent completed
    /// session. Fails when no history is available; limit-up-dependent
    /// fields stay `None` when the window holds no limit-up day.
    pub fn build(
        security: &str,
        daily: &[Bar],
        window_days: usize,
        price_tolerance: f64,
        volume_tolerance: f64,
        last_entry_date: Option<NaiveDate>,
    ) -> Result<Self> {
        let Some(yesterday) = daily.last() else {
            bail!("no daily history for {security}");
        };

        let window_start = daily.len().saturating_sub(window_days);
        let last_limit_up_idx = (window_start..daily.len())
            .rev()
            .find(|&i| is_limit_up_bar(security, &daily[i], price_tolerance));

        Ok(Self {
            yesterday_date: yesterday.date(),
            yesterday_body_high: candle_body_extreme(yesterday, true),
            yesterday_close: yesterday.close,
            yesterday_volume: yesterday.volume,
            yesterday_limit_up: is_limit_up_bar(security, yesterday, price_tolerance),
            yesterday_flipped: is_flip_off_bar(security, yesterday, price_tolerance),
            yesterday_hit_down: is_limit_down_bar(security, yesterday, price_tolerance),
            yesterday_contraction: daily.len() >= 2
                && is_continuous_volume_reduction(&daily[daily.len() - 2..], volume_tolerance),
            last_limit_up_open: last_limit_up_idx.map(|i| daily[i].open),
            limit_up_next_day_volume: last_limit_up_idx
                .and_then(|i| daily.get(i + 1))
                .map(|bar| bar.volume),
            last_entry_date,
            signal: SignalState::default(),
        })
    }
}

/// Official daily-open attributes for one pool member, derived once the
/// session's daily bar is published.
#[derive(Debug, Clone)]
pub struct OpenSnapshot {
    pub open_price: f64,
    pub prev_close: f64,
    pub limit_up_price: f64,
    pub limit_down_price: f64,
}

impl OpenSnapshot {
    /// Build from today's daily bar, using the practical limit comparators.
    pub fn from_daily_bar(security: &str, bar: &Bar, tolerance: f64) -> Self {
        Self {
            open_price: bar.open,
            prev_close: bar.prev_close,
            limit_up_price: theoretical_limit_price(security, bar.prev_close, tolerance),
            limit_down_price: theoretical_limit_down_price(security, bar.prev_close, tolerance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PRICE_TOLERANCE;
    use chrono::NaiveDate;

    fn daily_bar(day: u32, open: f64, high: f64, low: f64, close: f64, prev_close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2025, 6, day)
                .unwrap()
                .and_hms_opt(15, 0, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            prev_close,
            volume,
            amount: close * volume * 100.0,
        }
    }

    #[test]
    fn test_facts_from_limit_up_history() {
        let daily = vec![
            daily_bar(2, 10.0, 10.2, 9.9, 10.1, 10.0, 1000.0),
            daily_bar(3, 10.1, 11.11, 10.1, 11.11, 10.1, 2000.0),
            daily_bar(4, 11.0, 11.3, 10.8, 11.2, 11.11, 1700.0),
            daily_bar(5, 11.1, 11.25, 10.9, 11.0, 11.2, 1500.0),
        ];
        let facts =
            StockFacts::build("600001", &daily, 5, PRICE_TOLERANCE, 0.1, None).unwrap();

        assert_eq!(facts.yesterday_date, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
        assert_eq!(facts.yesterday_body_high, 11.1);
        assert_eq!(facts.yesterday_volume, 1500.0);
        assert!(!facts.yesterday_limit_up);
        assert!(facts.yesterday_contraction);
        assert_eq!(facts.last_limit_up_open, Some(10.1));
        assert_eq!(facts.limit_up_next_day_volume, Some(1700.0));
        assert_eq!(facts.signal.sell_percent_record, 0);
        assert!(!facts.signal.buy_signal_generated);
    }

    #[test]
    fn test_facts_without_limit_up_day() {
        let daily = vec![
            daily_bar(4, 10.0, 10.2, 9.9, 10.1, 10.0, 1000.0),
            daily_bar(5, 10.1, 10.3, 10.0, 10.2, 10.1, 1100.0),
        ];
        let facts =
            StockFacts::build("600001", &daily, 5, PRICE_TOLERANCE, 0.1, None).unwrap();
        assert_eq!(facts.last_limit_up_open, None);
        assert_eq!(facts.limit_up_next_day_volume, None);
        // 1100 > 1000 * 1.1 is false, so still a contraction under tolerance
        assert!(facts.yesterday_contraction);
    }

    #[test]
    fn test_facts_require_history() {
        assert!(StockFacts::build("600001", &[], 5, PRICE_TOLERANCE, 0.1, None).is_err());
    }

    #[test]
    fn test_open_snapshot_limits() {
        let bar = daily_bar(5, 10.0, 10.2, 9.9, 10.1, 10.0, 1000.0);
        let snapshot = OpenSnapshot::from_daily_bar("600001", &bar, PRICE_TOLERANCE);
        assert_eq!(snapshot.open_price, 10.0);
        assert_eq!(snapshot.prev_close, 10.0);
        assert!((snapshot.limit_up_price - 10.998).abs() < 1e-9);
        assert!((snapshot.limit_down_price - 9.002).abs() < 1e-9);
    }
}
