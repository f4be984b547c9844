//! Strategy configuration.

use serde::{Deserialize, Serialize};

use crate::market::PRICE_TOLERANCE;

/// Which strategy family drives pool selection and signal evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Chase freshly sealed limit-up boards (coiled-spring pool)
    BoardHitting,
    /// Buy the pullback after a limit-up day (buy-on-dip pool)
    BuyOnDips,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::BoardHitting => write!(f, "BoardHitting"),
            StrategyKind::BuyOnDips => write!(f, "BuyOnDips"),
        }
    }
}

/// Static options supplied at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// Trading account identifier
    pub account_id: String,

    /// Strategy family to run
    pub kind: StrategyKind,

    /// Whether buy signals are evaluated and dispatched
    pub buy_signal_enabled: bool,

    /// Whether sell signals are evaluated and dispatched
    pub sell_signal_enabled: bool,

    /// Monetary size of a single buy order, in yuan
    pub fixed_buy_value: f64,

    /// Lookback window for the pattern filters, in trading days
    pub pattern_window_days: usize,

    /// Maximum limit-up count allowed inside the pattern window
    pub max_limit_up_count: usize,

    /// Lookback window for the one-word-board exclusion, in trading days
    pub one_word_window_days: usize,

    /// Fractional slack for limit-price comparisons
    pub price_tolerance: f64,

    /// Fractional slack for the volume-contraction check
    pub volume_tolerance: f64,

    /// Seconds after the open before the open-down exit window starts
    pub open_down_delay_seconds: i64,

    /// Drop below the daily open that triggers the open-down exit
    pub open_down_percent: f64,

    /// Whether the open-down exit also requires price below the prior close
    pub open_down_checks_prev_close: bool,

    /// Whether the MACD-top exit requires price below the prior close
    pub macd_sell_checks_prev_close: bool,

    /// Cooldown between throttled MACD-top sell evaluations, in minutes
    pub macd_cooldown_minutes: i64,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            kind: StrategyKind::BoardHitting,
            buy_signal_enabled: true,
            sell_signal_enabled: true,
            fixed_buy_value: 10_000.0,
            pattern_window_days: 5,
            max_limit_up_count: 2,
            one_word_window_days: 10,
            price_tolerance: PRICE_TOLERANCE,
            volume_tolerance: 0.1,
            open_down_delay_seconds: 30,
            open_down_percent: 0.01,
            open_down_checks_prev_close: true,
            macd_sell_checks_prev_close: true,
            macd_cooldown_minutes: 5,
        }
    }
}
