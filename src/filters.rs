//! Daily-bar pattern scans that build the session buy pool.
//!
//! Both filters walk the candidate universe independently (no shared
//! state), so the scan fans out across cores. A name whose daily history
//! is missing or too short is simply not matched; filters never abort the
//! scan.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::info;

use crate::bars::{Bar, BarSeries};
use crate::config::StrategyOptions;
use crate::market::{
    is_flip_off_bar, is_limit_down_bar, is_limit_up_bar, is_one_word_limit_up, PRICE_TOLERANCE,
};

/// Knobs shared by both pattern scans.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Lookback window for limit-up counting, in trading days
    pub window_days: usize,
    /// Maximum limit-up count allowed inside the window
    pub max_limit_up_count: usize,
    /// Lookback window for the one-word-board exclusion
    pub one_word_window_days: usize,
    /// Fractional slack for limit-price comparisons
    pub price_tolerance: f64,
    /// Fractional slack for the volume-contraction clause
    pub volume_tolerance: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            window_days: 5,
            max_limit_up_count: 2,
            one_word_window_days: 10,
            price_tolerance: PRICE_TOLERANCE,
            volume_tolerance: 0.1,
        }
    }
}

impl From<&StrategyOptions> for FilterConfig {
    fn from(opts: &StrategyOptions) -> Self {
        Self {
            window_days: opts.pattern_window_days,
            max_limit_up_count: opts.max_limit_up_count,
            one_word_window_days: opts.one_word_window_days,
            price_tolerance: opts.price_tolerance,
            volume_tolerance: opts.volume_tolerance,
        }
    }
}

/// Tail slice covering the last `days` bars of a series.
fn tail(series: &[Bar], days: usize) -> &[Bar] {
    let start = series.len().saturating_sub(days);
    &series[start..]
}

/// Number of limit-up closes inside the tail window.
fn limit_up_count(security: &str, window: &[Bar], tolerance: f64) -> usize {
    window
        .iter()
        .filter(|bar| is_limit_up_bar(security, bar, tolerance))
        .count()
}

/// Index (into the full series) of the most recent limit-up bar found
/// inside the tail window.
fn last_limit_up_index(security: &str, series: &[Bar], days: usize, tolerance: f64) -> Option<usize> {
    let start = series.len().saturating_sub(days);
    (start..series.len())
        .rev()
        .find(|&i| is_limit_up_bar(security, &series[i], tolerance))
}

/// Coiled-spring board: a recent non-degenerate limit-up whose pullback has
/// held above the breakout day's open.
///
/// A name is kept iff, within the window:
/// 1. limit-up count is in (0, max]
/// 2. the most recent limit-up bar has a real body (open != close)
/// 3. the latest session did not itself close at the limit
/// 4. every low after the limit-up day stayed above that day's open
pub fn coiled_spring_filter(
    universe: &[String],
    daily: &HashMap<String, BarSeries>,
    cfg: &FilterConfig,
) -> Vec<String> {
    info!("scanning {} names for coiled-spring boards", universe.len());
    let matched: Vec<String> = universe
        .par_iter()
        .filter(|security| {
            let Some(series) = daily.get(security.as_str()) else {
                return false;
            };
            matches_coiled_spring(security, series, cfg)
        })
        .cloned()
        .collect();
    info!("coiled-spring scan matched {} names", matched.len());
    matched
}

fn matches_coiled_spring(security: &str, series: &[Bar], cfg: &FilterConfig) -> bool {
    let window = tail(series, cfg.window_days);
    if window.is_empty() {
        return false;
    }

    let count = limit_up_count(security, window, cfg.price_tolerance);
    if count == 0 || count > cfg.max_limit_up_count {
        return false;
    }

    let Some(limit_idx) = last_limit_up_index(security, series, cfg.window_days, cfg.price_tolerance)
    else {
        return false;
    };
    let limit_bar = &series[limit_idx];

    // One-word boards have no tradeable entry
    if limit_bar.open == limit_bar.close {
        return false;
    }

    // The latest session must not itself be a limit-up
    let last = &series[series.len() - 1];
    if is_limit_up_bar(security, last, cfg.price_tolerance) {
        return false;
    }

    // Pullback must hold above the breakout day's open
    let pullback = &series[limit_idx + 1..];
    if pullback.is_empty() {
        return false;
    }
    pullback.iter().all(|bar| bar.low > limit_bar.open)
}

/// Buy-on-dip setup: a recent limit-up followed by an orderly,
/// volume-contracting pullback that has not broken the breakout or hit the
/// down limit.
///
/// A name is kept iff:
/// 1. limit-up count inside the window is in (0, max]
/// 2. no one-word limit-up inside the one-word window
/// 3. at least 3 daily bars exist after the limit-up day
/// 4. T+1 traded >= 80% of the limit-up day's volume and closed <= 1.05x
///    the limit-up close
/// 5. volume contracts continuously from T+1 through today
/// 6. every low from T+1 onward stays above the limit-up day's open
/// 7. no day from T+1 onward closed at the down limit or flipped off a
///    limit-up
pub fn buy_on_dip_filter(
    universe: &[String],
    daily: &HashMap<String, BarSeries>,
    cfg: &FilterConfig,
) -> Vec<String> {
    info!("scanning {} names for buy-on-dip setups", universe.len());
    let matched: Vec<String> = universe
        .par_iter()
        .filter(|security| {
            let Some(series) = daily.get(security.as_str()) else {
                return false;
            };
            matches_buy_on_dip(security, series, cfg)
        })
        .cloned()
        .collect();
    info!("buy-on-dip scan matched {} names", matched.len());
    matched
}

fn matches_buy_on_dip(security: &str, series: &[Bar], cfg: &FilterConfig) -> bool {
    let window = tail(series, cfg.window_days);
    if window.is_empty() {
        return false;
    }

    let count = limit_up_count(security, window, cfg.price_tolerance);
    if count == 0 || count > cfg.max_limit_up_count {
        return false;
    }

    let one_word_window = tail(series, cfg.one_word_window_days);
    if one_word_window.iter().any(|bar| {
        is_one_word_limit_up(security, bar.open, bar.close, bar.prev_close, cfg.price_tolerance)
    }) {
        return false;
    }

    let Some(limit_idx) = last_limit_up_index(security, series, cfg.window_days, cfg.price_tolerance)
    else {
        return false;
    };
    let limit_bar = &series[limit_idx];

    let pullback = &series[limit_idx + 1..];
    if pullback.len() < 3 {
        return false;
    }

    // T+1 held most of the breakout volume without running away in price
    let t1 = &pullback[0];
    if t1.volume < 0.8 * limit_bar.volume || t1.close > 1.05 * limit_bar.close {
        return false;
    }

    if !crate::indicators::is_continuous_volume_reduction(pullback, cfg.volume_tolerance) {
        return false;
    }

    if !pullback.iter().all(|bar| bar.low > limit_bar.open) {
        return false;
    }

    // The pullback must be orderly: no down-limit close, no flip-off day
    !pullback.iter().any(|bar| {
        is_limit_down_bar(security, bar, cfg.price_tolerance)
            || is_flip_off_bar(security, bar, cfg.price_tolerance)
    })
}
