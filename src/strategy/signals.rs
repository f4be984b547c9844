//! Signal functions and the priority-ordered sell cascade.
//!
//! Each function inspects one security's intraday minute bars plus the
//! cached session facts and returns at most one trade instruction. The
//! functions are pure over their inputs; all intraday mutation
//! (progressive sizing, throttling, latches) lives in the engine.

use chrono::{NaiveDateTime, NaiveTime};
use tracing::debug;

use crate::bars::Bar;
use crate::config::StrategyOptions;
use crate::indicators::{intraday_vwap, is_histogram_bottom, is_histogram_top, MacdPoint};
use crate::strategy::facts::{OpenSnapshot, StockFacts};

/// One proposed order.
#[derive(Debug, Clone)]
pub struct Signal {
    pub security: String,
    pub kind: SignalKind,
    pub price: f64,
    /// Human-readable reason, used for logging and de-duplication
    pub reason: &'static str,
}

/// Closed set of instruction kinds with kind-specific payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalKind {
    /// Buy a fixed monetary value, in yuan
    BuyValue { value: f64 },
    /// Clear the whole available position
    SellAll,
    /// Sell a fraction of the available position
    SellPercent { percent: f64 },
}

/// Board-hitting buy: price just reached the limit without having opened
/// there. Excludes one-word and T-shaped boards (daily open at the limit).
pub fn board_hitting_buy(
    security: &str,
    bars: &[Bar],
    open: &OpenSnapshot,
    fixed_value: f64,
) -> Option<Signal> {
    let latest = bars.last()?;
    if latest.open >= open.limit_up_price || latest.close < open.limit_up_price * 0.998 {
        return None;
    }
    if open.open_price >= open.limit_up_price {
        return None;
    }
    Some(Signal {
        security: security.to_string(),
        kind: SignalKind::BuyValue { value: fixed_value },
        price: open.limit_up_price,
        reason: "board hitting buy",
    })
}

/// Open-down exit: within a short window after the open, price has flushed
/// below the daily open by `open_down_percent` (and optionally below the
/// prior close). Prices the sell at a 2% discount for a guaranteed fill.
pub fn open_down_exit(
    security: &str,
    bars: &[Bar],
    open: &OpenSnapshot,
    now: NaiveDateTime,
    opts: &StrategyOptions,
) -> Option<Signal> {
    let market_open = now.date().and_time(NaiveTime::from_hms_opt(9, 30, 0)?);
    let elapsed = (now - market_open).num_seconds();
    if elapsed < opts.open_down_delay_seconds || elapsed > opts.open_down_delay_seconds + 30 {
        return None;
    }

    let latest = bars.last()?;
    if opts.open_down_checks_prev_close && latest.close >= open.prev_close {
        return None;
    }
    if latest.close >= open.open_price * (1.0 - opts.open_down_percent) {
        return None;
    }
    Some(Signal {
        security: security.to_string(),
        kind: SignalKind::SellAll,
        price: latest.close * 0.98,
        reason: "open-down exit",
    })
}

/// Board-explosion exit: price touched the limit and fell away within one
/// or two bars.
pub fn board_explosion_exit(security: &str, bars: &[Bar], open: &OpenSnapshot) -> Option<Signal> {
    let latest = bars.last()?;
    let threshold = open.limit_up_price * 0.98;
    if latest.close < threshold && (latest.open >= threshold || latest.prev_close >= threshold) {
        return Some(Signal {
            security: security.to_string(),
            kind: SignalKind::SellAll,
            price: latest.close * 0.98,
            reason: "board explosion exit",
        });
    }
    None
}

/// MACD-top partial exit: the histogram formed a top and price is not at
/// the limit. The engine owns the progressive 50%/100% sizing; the
/// percent here is a placeholder it rewrites.
pub fn macd_top_exit(
    security: &str,
    bars: &[Bar],
    macd: &[MacdPoint],
    open: &OpenSnapshot,
    checks_prev_close: bool,
) -> Option<Signal> {
    let latest = bars.last()?;
    if checks_prev_close && latest.close >= open.prev_close {
        return None;
    }
    if latest.close >= open.limit_up_price {
        return None;
    }
    if !is_histogram_top(macd) {
        return None;
    }
    Some(Signal {
        security: security.to_string(),
        kind: SignalKind::SellPercent { percent: 1.0 },
        price: latest.close * 0.99,
        reason: "macd top exit",
    })
}

/// Buy-on-dip entry. All seven clauses must hold simultaneously at
/// evaluation time; only the one-shot latch (checked here, set by the
/// engine) is sticky.
#[allow(clippy::too_many_arguments)]
pub fn buy_on_dip_entry(
    security: &str,
    bars: &[Bar],
    macd: &[MacdPoint],
    open: &OpenSnapshot,
    facts: &StockFacts,
    already_held: bool,
    exited_today: bool,
    fixed_value: f64,
) -> Option<Signal> {
    if facts.signal.buy_signal_generated {
        return None;
    }
    let latest = bars.last()?;
    let day_high = bars.iter().map(|bar| bar.high).fold(f64::MIN, f64::max);

    // 1. today's high broke above yesterday's candle body high
    if day_high <= facts.yesterday_body_high {
        return None;
    }
    // 2. today's high never touched today's limit price
    if day_high >= open.limit_up_price {
        return None;
    }
    // 3. intraday MACD histogram bottom
    if !is_histogram_bottom(macd) {
        return None;
    }
    // 4. price above the intraday average
    if latest.close <= intraday_vwap(bars) {
        return None;
    }
    // 5. price above yesterday's close
    if latest.close <= open.prev_close {
        return None;
    }
    // 6/7. not already held and no exit recorded today
    if already_held || exited_today {
        return None;
    }

    Some(Signal {
        security: security.to_string(),
        kind: SignalKind::BuyValue { value: fixed_value },
        price: latest.close,
        reason: "buy-on-dip entry",
    })
}

/// Inputs shared by every sell rule in a cascade.
pub struct RuleCtx<'a> {
    pub security: &'a str,
    pub bars: &'a [Bar],
    pub macd: &'a [MacdPoint],
    pub open: &'a OpenSnapshot,
    pub facts: &'a StockFacts,
    pub now: NaiveDateTime,
    pub opts: &'a StrategyOptions,
}

/// One named exit rule. Rules are evaluated in list order and the first
/// non-empty result wins; that order is a tested invariant. Rules marked
/// `throttled` share the engine's MACD cooldown.
pub trait SellRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn throttled(&self) -> bool {
        false
    }
    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal>;
}

/// Common gate for the throttled cascade rules: a fresh histogram top,
/// price strictly below the running top price, and price below the limit.
/// Ties with the running top price do not count as "below".
fn macd_top_conditions(ctx: &RuleCtx) -> bool {
    let Some(latest) = ctx.bars.last() else {
        return false;
    };
    is_histogram_top(ctx.macd)
        && latest.close < ctx.facts.signal.macd_top_price
        && latest.close < ctx.open.limit_up_price
}

fn sell_all(ctx: &RuleCtx, reason: &'static str) -> Option<Signal> {
    let latest = ctx.bars.last()?;
    Some(Signal {
        security: ctx.security.to_string(),
        kind: SignalKind::SellAll,
        price: latest.close * 0.98,
        reason,
    })
}

fn sell_percent(ctx: &RuleCtx, reason: &'static str) -> Option<Signal> {
    let latest = ctx.bars.last()?;
    Some(Signal {
        security: ctx.security.to_string(),
        kind: SignalKind::SellPercent { percent: 1.0 },
        price: latest.close * 0.99,
        reason,
    })
}

/// Cascade rule 1: the high reached the limit but price has fallen off it.
struct DipExplosionRule;

impl SellRule for DipExplosionRule {
    fn name(&self) -> &'static str {
        "explosion"
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        let latest = ctx.bars.last()?;
        let day_high = ctx.bars.iter().map(|bar| bar.high).fold(f64::MIN, f64::max);
        if day_high >= ctx.open.limit_up_price && latest.close < ctx.open.limit_up_price {
            return sell_all(ctx, "limit flip-off exit");
        }
        None
    }
}

/// Cascade rule 2: into the final minutes, volume has expanded past
/// yesterday while price sits below the daily open.
struct FinalMinuteRule;

impl SellRule for FinalMinuteRule {
    fn name(&self) -> &'static str {
        "final-minute"
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        if ctx.now.time() < NaiveTime::from_hms_opt(14, 50, 0)? {
            return None;
        }
        let latest = ctx.bars.last()?;
        let session_volume: f64 = ctx.bars.iter().map(|bar| bar.volume).sum();
        if session_volume > 1.1 * ctx.facts.yesterday_volume && latest.close < ctx.open.open_price {
            return sell_all(ctx, "final-minute volume exit");
        }
        None
    }
}

/// Cascade rule 3: price lost the breakout day's open on a MACD top.
struct BreakoutStopRule;

impl SellRule for BreakoutStopRule {
    fn name(&self) -> &'static str {
        "breakout-stop"
    }

    fn throttled(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        let breakout_open = ctx.facts.last_limit_up_open?;
        let latest = ctx.bars.last()?;
        if latest.close < breakout_open && macd_top_conditions(ctx) {
            return sell_percent(ctx, "breakout stop exit");
        }
        None
    }
}

/// Cascade rule 4: yesterday broke the contraction (and was not the entry
/// day itself) and a MACD top printed.
struct YesterdaySurgeRule;

impl SellRule for YesterdaySurgeRule {
    fn name(&self) -> &'static str {
        "yesterday-surge"
    }

    fn throttled(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        if ctx.facts.yesterday_contraction {
            return None;
        }
        if ctx.facts.last_entry_date == Some(ctx.facts.yesterday_date) {
            return None;
        }
        if macd_top_conditions(ctx) {
            return sell_percent(ctx, "yesterday volume-surge exit");
        }
        None
    }
}

/// Cascade rule 5: yesterday's volume ran back up to the T+1 level.
struct T1SurgeRule;

impl SellRule for T1SurgeRule {
    fn name(&self) -> &'static str {
        "t1-surge"
    }

    fn throttled(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        let t1_volume = ctx.facts.limit_up_next_day_volume?;
        if ctx.facts.yesterday_volume >= 0.95 * t1_volume && macd_top_conditions(ctx) {
            return sell_percent(ctx, "t+1 volume-surge exit");
        }
        None
    }
}

/// Cascade rule 6: yesterday hit, flipped off, or hit down the limit.
struct StaleLimitRule;

impl SellRule for StaleLimitRule {
    fn name(&self) -> &'static str {
        "stale-limit"
    }

    fn throttled(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        let limit_event = ctx.facts.yesterday_limit_up
            || ctx.facts.yesterday_flipped
            || ctx.facts.yesterday_hit_down;
        if limit_event && macd_top_conditions(ctx) {
            return sell_percent(ctx, "stale limit-event exit");
        }
        None
    }
}

/// Adapter rules so the board-hitting exits share the cascade contract.
struct BoardExplosionRule;

impl SellRule for BoardExplosionRule {
    fn name(&self) -> &'static str {
        "board-explosion"
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        board_explosion_exit(ctx.security, ctx.bars, ctx.open)
    }
}

struct OpenDownRule;

impl SellRule for OpenDownRule {
    fn name(&self) -> &'static str {
        "open-down"
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        open_down_exit(ctx.security, ctx.bars, ctx.open, ctx.now, ctx.opts)
    }
}

struct MacdSellRule;

impl SellRule for MacdSellRule {
    fn name(&self) -> &'static str {
        "macd-top"
    }

    fn evaluate(&self, ctx: &RuleCtx) -> Option<Signal> {
        macd_top_exit(
            ctx.security,
            ctx.bars,
            ctx.macd,
            ctx.open,
            ctx.opts.macd_sell_checks_prev_close,
        )
    }
}

/// Exit cascade for the board-hitting strategy, in priority order.
pub fn board_hitting_rules() -> Vec<Box<dyn SellRule>> {
    vec![
        Box::new(BoardExplosionRule),
        Box::new(OpenDownRule),
        Box::new(MacdSellRule),
    ]
}

/// Exit cascade for the buy-on-dip strategy, in priority order. The order
/// is load-bearing: the first matching rule wins.
pub fn buy_on_dip_rules() -> Vec<Box<dyn SellRule>> {
    vec![
        Box::new(DipExplosionRule),
        Box::new(FinalMinuteRule),
        Box::new(BreakoutStopRule),
        Box::new(YesterdaySurgeRule),
        Box::new(T1SurgeRule),
        Box::new(StaleLimitRule),
    ]
}

/// Walk a cascade in order; first non-empty result wins.
pub fn evaluate_rules(rules: &[Box<dyn SellRule>], ctx: &RuleCtx, cooldown_ok: bool) -> CascadeOutcome {
    let mut ran_throttled = false;
    for rule in rules {
        if rule.throttled() {
            if !cooldown_ok {
                continue;
            }
            ran_throttled = true;
        }
        if let Some(signal) = rule.evaluate(ctx) {
            debug!("sell rule {} fired for {}", rule.name(), ctx.security);
            return CascadeOutcome {
                signal: Some(signal),
                ran_throttled,
            };
        }
    }
    CascadeOutcome {
        signal: None,
        ran_throttled,
    }
}

/// Result of one cascade walk.
pub struct CascadeOutcome {
    pub signal: Option<Signal>,
    /// Whether any throttled rule was actually evaluated this walk
    pub ran_throttled: bool,
}
