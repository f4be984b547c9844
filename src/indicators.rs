//! Indicator library: MACD over a bar series, histogram turning points,
//! intraday volume-weighted average price, and volume-shape checks.

use crate::bars::Bar;

/// One MACD observation: DIF, DEA, and the histogram value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub dif: f64,
    pub dea: f64,
    pub histogram: f64,
}

/// Recursive exponential moving average, alpha = 2 / (span + 1), seeded
/// with the first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = 0.0;
    for (i, &value) in values.iter().enumerate() {
        let current = if i == 0 {
            value
        } else {
            alpha * value + (1.0 - alpha) * prev
        };
        out.push(current);
        prev = current;
    }
    out
}

/// MACD over closes: DIF = EMA12 - EMA26, DEA = 9-span EMA of DIF,
/// histogram = 2 * (DIF - DEA).
pub fn macd(series: &[Bar]) -> Vec<MacdPoint> {
    let closes: Vec<f64> = series.iter().map(|b| b.close).collect();
    let ema12 = ema(&closes, 12);
    let ema26 = ema(&closes, 26);
    let dif: Vec<f64> = ema12.iter().zip(&ema26).map(|(a, b)| a - b).collect();
    let dea = ema(&dif, 9);
    dif.iter()
        .zip(&dea)
        .map(|(&dif, &dea)| MacdPoint {
            dif,
            dea,
            histogram: 2.0 * (dif - dea),
        })
        .collect()
}

/// Histogram top: with m1 the most recent value, m1 < m2 < m3 > m4 and all
/// four strictly positive. Requires at least 4 points.
pub fn is_histogram_top(macd: &[MacdPoint]) -> bool {
    let n = macd.len();
    if n < 4 {
        return false;
    }
    let (m1, m2, m3, m4) = (
        macd[n - 1].histogram,
        macd[n - 2].histogram,
        macd[n - 3].histogram,
        macd[n - 4].histogram,
    );
    m1 < m2 && m2 < m3 && m3 > m4 && m1 > 0.0 && m2 > 0.0 && m3 > 0.0 && m4 > 0.0
}

/// Histogram bottom: with m1 the most recent value, m1 > m2 > m3 > m4 < m5
/// and all five strictly negative. Requires at least 5 points.
pub fn is_histogram_bottom(macd: &[MacdPoint]) -> bool {
    let n = macd.len();
    if n < 5 {
        return false;
    }
    let (m1, m2, m3, m4, m5) = (
        macd[n - 1].histogram,
        macd[n - 2].histogram,
        macd[n - 3].histogram,
        macd[n - 4].histogram,
        macd[n - 5].histogram,
    );
    m1 > m2
        && m2 > m3
        && m3 > m4
        && m4 < m5
        && m1 < 0.0
        && m2 < 0.0
        && m3 < 0.0
        && m4 < 0.0
        && m5 < 0.0
}

/// Volume-weighted average price from session open to the latest bar.
/// Bar volume is in 100-share lots while amount is in yuan, so the lot
/// scale is divided out. Returns 0.0 on an empty or zero-volume series.
pub fn intraday_vwap(series: &[Bar]) -> f64 {
    let volume: f64 = series.iter().map(|b| b.volume).sum();
    if volume <= 0.0 {
        return 0.0;
    }
    let amount: f64 = series.iter().map(|b| b.amount).sum();
    amount / volume / 100.0
}

/// Continuous volume contraction: every bar's volume stays within
/// `(1 + tolerance)` of the previous bar's. Requires at least 2 bars.
pub fn is_continuous_volume_reduction(series: &[Bar], tolerance: f64) -> bool {
    if series.len() < 2 {
        return false;
    }
    for pair in series.windows(2) {
        if pair[1].volume > pair[0].volume * (1.0 + tolerance) {
            return false;
        }
    }
    true
}

/// Candle body boundary, excluding wicks: max(open, close) or
/// min(open, close).
pub fn candle_body_extreme(bar: &Bar, want_max: bool) -> f64 {
    if want_max {
        bar.open.max(bar.close)
    } else {
        bar.open.min(bar.close)
    }
}
