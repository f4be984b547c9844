//! Board classification and daily price-limit rules.
//!
//! Every listed security belongs to one board, and each board carries a
//! fixed daily price-move cap. Official limit prices are rounded to a tick
//! the core does not model, so all comparisons carry a small tolerance.

use crate::bars::Bar;

/// Fractional slack applied when comparing a price ratio against a board's
/// limit rate. Absorbs the tick rounding of official limit prices.
pub const PRICE_TOLERANCE: f64 = 0.002;

/// Listing board of a security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Board {
    /// Main board (Shanghai/Shenzhen), 10% daily limit
    Main,
    /// Growth Enterprise Market, 20% daily limit
    Gem,
    /// Sci-tech innovation board, 20% daily limit
    Star,
    /// Beijing Stock Exchange, 30% daily limit
    Bse,
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Board::Main => write!(f, "MAIN"),
            Board::Gem => write!(f, "GEM"),
            Board::Star => write!(f, "STAR"),
            Board::Bse => write!(f, "BSE"),
        }
    }
}

impl Board {
    /// Daily price-move cap for the board, ignoring special treatment.
    pub fn limit_rate(self) -> f64 {
        match self {
            Board::Main => 0.10,
            Board::Gem | Board::Star => 0.20,
            Board::Bse => 0.30,
        }
    }
}

/// Classify a security id by its numeric prefix. Accepts ids with or
/// without an exchange suffix ("600519" or "600519.SH"). Unknown or
/// malformed prefixes fall back to the main board.
pub fn classify_board(security: &str) -> Board {
    let code = security.split('.').next().unwrap_or(security);
    if code.starts_with("688") || code.starts_with("689") {
        Board::Star
    } else if code.starts_with("30") {
        Board::Gem
    } else if code.starts_with("83") {
        Board::Bse
    } else {
        Board::Main
    }
}

/// Effective limit rate for a security. Special-treatment names are capped
/// at 5% regardless of board.
pub fn limit_rate(security: &str, is_special_treatment: bool) -> f64 {
    if is_special_treatment {
        0.05
    } else {
        classify_board(security).limit_rate()
    }
}

/// Whether `price` is at the daily up limit relative to `prev_close`.
pub fn is_limit_up(security: &str, price: f64, prev_close: f64, tolerance: f64) -> bool {
    price / prev_close - 1.0 >= limit_rate(security, false) - tolerance
}

/// Whether `price` is at the daily down limit relative to `prev_close`.
pub fn is_limit_down(security: &str, price: f64, prev_close: f64, tolerance: f64) -> bool {
    price / prev_close - 1.0 <= -limit_rate(security, false) + tolerance
}

/// Practical ceiling comparator for today's limit price. The tolerance is
/// subtracted so the result sits just below the tick-rounded official
/// price and never produces a false negative on comparison.
pub fn theoretical_limit_price(security: &str, prev_close: f64, tolerance: f64) -> f64 {
    prev_close * (1.0 + limit_rate(security, false) - tolerance)
}

/// Floor comparator for today's down-limit price, mirror image of
/// [`theoretical_limit_price`].
pub fn theoretical_limit_down_price(security: &str, prev_close: f64, tolerance: f64) -> f64 {
    prev_close * (1.0 - limit_rate(security, false) + tolerance)
}

/// A one-word board: the session opened at the limit and never left it.
/// No tradeable entry exists on such a day.
pub fn is_one_word_limit_up(
    security: &str,
    open: f64,
    close: f64,
    prev_close: f64,
    tolerance: f64,
) -> bool {
    is_limit_up(security, close, prev_close, tolerance) && open == close
}

/// Whether a daily bar closed at the up limit.
pub fn is_limit_up_bar(security: &str, bar: &Bar, tolerance: f64) -> bool {
    is_limit_up(security, bar.close, bar.prev_close, tolerance)
}

/// Whether a daily bar closed at the down limit.
pub fn is_limit_down_bar(security: &str, bar: &Bar, tolerance: f64) -> bool {
    is_limit_down(security, bar.close, bar.prev_close, tolerance)
}

/// Flip-off day: the high touched the limit price but the close did not
/// hold it.
pub fn is_flip_off_bar(security: &str, bar: &Bar, tolerance: f64) -> bool {
    let limit_price = theoretical_limit_price(security, bar.prev_close, tolerance);
    bar.high >= limit_price && bar.close < bar.high
}
