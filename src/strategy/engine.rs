//! Strategy state machine and trading loop.
//!
//! Drives one session: connect, build pools, cache per-stock facts,
//! subscribe, wait for open data, then poll once a second until the close.
//! Within one tick every sell evaluation completes and dispatches before
//! any buy evaluation begins; this ordering frees capital and avoids
//! self-competition.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Asia::Shanghai;
use tracing::{info, warn};

use crate::broker::{
    calculate_volume, Broker, MarketDataSource, OrderId, OrderRequest, OrderSide, Period,
};
use crate::config::{StrategyKind, StrategyOptions};
use crate::filters::{buy_on_dip_filter, coiled_spring_filter, FilterConfig};
use crate::indicators::{is_histogram_top, macd};
use crate::market::{classify_board, Board};
use crate::records::{RecordStore, TradeRecord};
use crate::strategy::facts::{OpenSnapshot, StockFacts};
use crate::strategy::signals::{
    board_hitting_buy, buy_on_dip_entry, buy_on_dip_rules, board_hitting_rules, evaluate_rules,
    RuleCtx, SellRule, Signal, SignalKind,
};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    PoolBuilt,
    Subscribed,
    AwaitingOpenData,
    Trading,
    Closed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Init => write!(f, "INIT"),
            EngineState::PoolBuilt => write!(f, "POOL_BUILT"),
            EngineState::Subscribed => write!(f, "SUBSCRIBED"),
            EngineState::AwaitingOpenData => write!(f, "AWAITING_OPEN_DATA"),
            EngineState::Trading => write!(f, "TRADING"),
            EngineState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// One dispatched order, kept in-session for buy de-duplication.
#[derive(Debug, Clone)]
struct SessionOrder {
    security: String,
    side: OrderSide,
    #[allow(dead_code)]
    order_id: OrderId,
}

/// The strategy state machine. Generic over the broker gateway and the
/// market-data source so replay runs substitute both.
pub struct StrategyEngine<B: Broker, D: MarketDataSource> {
    opts: StrategyOptions,
    broker: B,
    data: D,
    records: RecordStore,
    state: EngineState,
    trade_date: NaiveDate,
    buy_pool: Vec<String>,
    sell_pool: Vec<String>,
    facts: HashMap<String, StockFacts>,
    open_data: HashMap<String, OpenSnapshot>,
    sell_rules: Vec<Box<dyn SellRule>>,
    session_orders: Vec<SessionOrder>,
}

/// Trading evaluation window: after the opening auction settles, outside
/// the lunch break, and not into the closing minutes.
fn is_trading_time(time: NaiveTime) -> bool {
    let open = NaiveTime::from_hms_opt(9, 30, 5).unwrap();
    let lunch_start = NaiveTime::from_hms_opt(11, 30, 0).unwrap();
    let lunch_end = NaiveTime::from_hms_opt(13, 0, 5).unwrap();
    let last_call = NaiveTime::from_hms_opt(14, 55, 0).unwrap();
    if time < open || time > last_call {
        return false;
    }
    !(time > lunch_start && time < lunch_end)
}

impl<B: Broker, D: MarketDataSource> StrategyEngine<B, D> {
    pub fn new(
        opts: StrategyOptions,
        broker: B,
        data: D,
        records: RecordStore,
        trade_date: NaiveDate,
    ) -> Self {
        let sell_rules = match opts.kind {
            StrategyKind::BoardHitting => board_hitting_rules(),
            StrategyKind::BuyOnDips => buy_on_dip_rules(),
        };
        Self {
            opts,
            broker,
            data,
            records,
            state: EngineState::Init,
            trade_date,
            buy_pool: Vec::new(),
            sell_pool: Vec::new(),
            facts: HashMap::new(),
            open_data: HashMap::new(),
            sell_rules,
            session_orders: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn buy_pool(&self) -> &[String] {
        &self.buy_pool
    }

    pub fn sell_pool(&self) -> &[String] {
        &self.sell_pool
    }

    /// Pre-open sequence: connect, build pools, cache facts, subscribe.
    pub fn prepare(&mut self) -> Result<()> {
        self.broker.connect()?;
        let account = self.broker.account()?;
        info!(
            "account {} | total {:.2} | cash {:.2} | market value {:.2}",
            self.opts.account_id, account.total_asset, account.cash, account.market_value
        );

        self.build_pools()?;
        self.state = EngineState::PoolBuilt;

        self.build_facts()?;

        if self.buy_pool.is_empty() && self.sell_pool.is_empty() {
            info!("both pools empty, nothing to trade today");
            self.state = EngineState::Closed;
            return Ok(());
        }

        let union = self.pool_union();
        self.data.subscribe(&union, Period::Daily)?;
        self.data.subscribe(&union, Period::Minute)?;
        self.state = EngineState::Subscribed;
        info!(
            "subscribed {} securities ({} buy / {} sell)",
            union.len(),
            self.buy_pool.len(),
            self.sell_pool.len()
        );

        self.state = EngineState::AwaitingOpenData;
        Ok(())
    }

    /// Run the polling loop against the exchange wall clock until close.
    pub async fn run(&mut self) -> Result<()> {
        self.prepare()?;
        if self.state == EngineState::Closed {
            return Ok(());
        }

        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let now = Utc::now().with_timezone(&Shanghai).naive_local();

            let market_close = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
            if now.time() >= market_close {
                info!("market closed, stopping strategy");
                self.state = EngineState::Closed;
                break;
            }
            if !self.broker.is_connected() {
                bail!("broker connection lost, stopping trading loop");
            }

            match self.state {
                EngineState::AwaitingOpenData => {
                    self.poll_open_data(now)?;
                }
                EngineState::Trading => self.trading_tick(now)?,
                EngineState::Closed => break,
                _ => {}
            }
        }
        Ok(())
    }

    fn pool_union(&self) -> Vec<String> {
        let mut union = self.sell_pool.clone();
        for security in &self.buy_pool {
            if !union.contains(security) {
                union.push(security.clone());
            }
        }
        union
    }

    /// Sell pool from holdings, buy pool from the pattern filter minus
    /// anything held.
    fn build_pools(&mut self) -> Result<()> {
        let positions = self.broker.positions()?;
        self.sell_pool = positions.into_iter().map(|p| p.security).collect();
        info!("sell pool holds {} securities", self.sell_pool.len());

        let universe = self.main_board_universe();
        info!("candidate universe: {} main-board names", universe.len());

        let lookback = self
            .opts
            .pattern_window_days
            .max(self.opts.one_word_window_days);
        let end = self.yesterday();
        let daily = self.data.daily_bars(&universe, end, lookback)?;
        let cfg = FilterConfig::from(&self.opts);
        let matched = match self.opts.kind {
            StrategyKind::BoardHitting => coiled_spring_filter(&universe, &daily, &cfg),
            StrategyKind::BuyOnDips => buy_on_dip_filter(&universe, &daily, &cfg),
        };
        self.buy_pool = matched
            .into_iter()
            .filter(|security| !self.sell_pool.contains(security))
            .collect();
        info!("buy pool holds {} securities", self.buy_pool.len());
        Ok(())
    }

    /// Non-ST, non-suspended, non-delisting main-board names.
    fn main_board_universe(&self) -> Vec<String> {
        self.data
            .universe()
            .into_iter()
            .filter(|security| {
                if classify_board(security) != Board::Main {
                    return false;
                }
                match self.data.security_info(security) {
                    Some(info) => {
                        !info.is_special_treatment && !info.is_suspended && !info.is_delisting
                    }
                    None => false,
                }
            })
            .collect()
    }

    /// One-time daily-history lookups for every pool member. A member whose
    /// facts cannot be derived is dropped from its pool with a warning.
    fn build_facts(&mut self) -> Result<()> {
        let union = self.pool_union();
        let lookback = self
            .opts
            .pattern_window_days
            .max(self.opts.one_word_window_days);
        let daily = self.data.daily_bars(&union, self.yesterday(), lookback)?;

        for security in union {
            let last_entry_date = self
                .records
                .last_buy(&security)
                .map(|record| record.trade_date);
            let built = match daily.get(&security) {
                Some(series) => StockFacts::build(
                    &security,
                    series,
                    self.opts.pattern_window_days,
                    self.opts.price_tolerance,
                    self.opts.volume_tolerance,
                    last_entry_date,
                ),
                None => Err(anyhow!("no daily history for {security}")),
            };

            match built {
                Ok(facts) => {
                    // The dip cascade needs the limit-up day; a holding
                    // without one cannot be monitored by it
                    if self.opts.kind == StrategyKind::BuyOnDips
                        && self.sell_pool.contains(&security)
                        && facts.last_limit_up_open.is_none()
                    {
                        warn!(
                            "dropping {} from sell pool: no limit-up day in window",
                            security
                        );
                        self.sell_pool.retain(|s| s != &security);
                        continue;
                    }
                    self.facts.insert(security, facts);
                }
                Err(e) => {
                    warn!("dropping {} from pools: {}", security, e);
                    self.sell_pool.retain(|s| s != &security);
                    self.buy_pool.retain(|s| s != &security);
                }
            }
        }
        Ok(())
    }

    fn yesterday(&self) -> NaiveDate {
        self.trade_date.pred_opt().unwrap_or(self.trade_date)
    }

    /// Poll until official daily-open attributes are available for every
    /// pool member, then enter TRADING.
    pub fn poll_open_data(&mut self, now: NaiveDateTime) -> Result<bool> {
        if now.time() < NaiveTime::from_hms_opt(9, 30, 5).unwrap() {
            return Ok(false);
        }

        let union = self.pool_union();
        for security in &union {
            if self.open_data.contains_key(security) {
                continue;
            }
            let daily = self
                .data
                .daily_bars(std::slice::from_ref(security), self.trade_date, 1)?;
            let Some(bar) = daily.get(security).and_then(|series| series.last()) else {
                continue;
            };
            if bar.date() != self.trade_date {
                continue;
            }
            self.open_data.insert(
                security.clone(),
                OpenSnapshot::from_daily_bar(security, bar, self.opts.price_tolerance),
            );
        }

        if union.iter().all(|s| self.open_data.contains_key(s)) {
            info!("open data ready for {} securities, awaiting signals", union.len());
            self.state = EngineState::Trading;
            return Ok(true);
        }
        Ok(false)
    }

    /// One polling tick: fetch the latest bars, evaluate the sell pool,
    /// dispatch, then evaluate the buy pool.
    pub fn trading_tick(&mut self, now: NaiveDateTime) -> Result<()> {
        if !is_trading_time(now.time()) {
            return Ok(());
        }

        let union = self.pool_union();
        let bars_map = self.data.intraday_bars(&union, self.trade_date)?;

        if self.opts.sell_signal_enabled {
            for security in self.sell_pool.clone() {
                let Some(bars) = bars_map.get(&security).filter(|b| !b.is_empty()) else {
                    warn!("no intraday bars for {}, skipping sell checks", security);
                    continue;
                };
                if let Some(signal) = self.evaluate_sell(&security, bars, now) {
                    info!("signal: {} for {} ({})", describe(&signal.kind), security, signal.reason);
                    self.dispatch_sell(signal, now)?;
                }
            }
        }

        if self.opts.buy_signal_enabled {
            for security in self.buy_pool.clone() {
                let Some(bars) = bars_map.get(&security).filter(|b| !b.is_empty()) else {
                    warn!("no intraday bars for {}, skipping buy checks", security);
                    continue;
                };
                if let Some(signal) = self.evaluate_buy(&security, bars, now) {
                    info!("signal: {} for {} ({})", describe(&signal.kind), security, signal.reason);
                    self.dispatch_buy(signal, now)?;
                }
            }
        }
        Ok(())
    }

    /// Walk the sell cascade for one security. Also performs the always-on
    /// MACD-top price update (at most once per minute) and the shared
    /// cooldown bookkeeping for the throttled rules.
    fn evaluate_sell(
        &mut self,
        security: &str,
        bars: &[crate::bars::Bar],
        now: NaiveDateTime,
    ) -> Option<Signal> {
        if !self.open_data.contains_key(security) || !self.facts.contains_key(security) {
            return None;
        }
        let series_macd = macd(bars);

        // Raise the running top price on any fresh MACD top
        let cooldown = Duration::minutes(self.opts.macd_cooldown_minutes);
        {
            let facts = self.facts.get_mut(security)?;
            if is_histogram_top(&series_macd) {
                let due = facts
                    .signal
                    .macd_top_updated
                    .map_or(true, |t| now - t >= Duration::minutes(1));
                if due {
                    let close = bars.last()?.close;
                    if close > facts.signal.macd_top_price {
                        facts.signal.macd_top_price = close;
                    }
                    facts.signal.macd_top_updated = Some(now);
                }
            }
        }

        let facts = self.facts.get(security)?;
        let open = self.open_data.get(security)?;
        let cooldown_ok = facts
            .signal
            .macd_signal_updated
            .map_or(true, |t| now - t >= cooldown);

        let ctx = RuleCtx {
            security,
            bars,
            macd: &series_macd,
            open,
            facts,
            now,
            opts: &self.opts,
        };
        let outcome = evaluate_rules(&self.sell_rules, &ctx, cooldown_ok);

        if outcome.ran_throttled {
            if let Some(facts) = self.facts.get_mut(security) {
                facts.signal.macd_signal_updated = Some(now);
            }
        }
        outcome.signal
    }

    fn evaluate_buy(
        &mut self,
        security: &str,
        bars: &[crate::bars::Bar],
        _now: NaiveDateTime,
    ) -> Option<Signal> {
        let open = self.open_data.get(security)?;

        let signal = match self.opts.kind {
            StrategyKind::BoardHitting => {
                board_hitting_buy(security, bars, open, self.opts.fixed_buy_value)?
            }
            StrategyKind::BuyOnDips => {
                let facts = self.facts.get(security)?;
                let already_held = self.records.is_currently_held(security);
                let exited_today = self
                    .records
                    .last_sell(security)
                    .is_some_and(|record| record.trade_date == self.trade_date);
                let series_macd = macd(bars);
                let signal = buy_on_dip_entry(
                    security,
                    bars,
                    &series_macd,
                    open,
                    facts,
                    already_held,
                    exited_today,
                    self.opts.fixed_buy_value,
                )?;
                // One-shot latch holds for the rest of the session
                self.facts.get_mut(security)?.signal.buy_signal_generated = true;
                signal
            }
        };

        // Suppress repeat buys for a security this session
        let duplicate = self
            .session_orders
            .iter()
            .any(|order| order.security == security && order.side == OrderSide::Buy);
        if duplicate {
            return None;
        }
        Some(signal)
    }

    /// Dispatch one sell. An empty available position suppresses the signal
    /// with a log line only; placement failures are logged and not retried.
    fn dispatch_sell(&mut self, signal: Signal, now: NaiveDateTime) -> Result<()> {
        let available = self.broker.available_volume(&signal.security)?;
        if available <= 0 {
            info!(
                "no available position in {}, suppressing {}",
                signal.security, signal.reason
            );
            return Ok(());
        }

        let (volume, progressive) = match signal.kind {
            SignalKind::SellAll => (available, false),
            SignalKind::SellPercent { .. } => {
                let record = self
                    .facts
                    .get(&signal.security)
                    .map_or(0, |f| f.signal.sell_percent_record);
                // First partial sale takes 50%, any later one clears the rest
                let percent = if record == 0 { 0.5 } else { 1.0 };
                let shares = ((available as f64 * percent) as i64 / 100) * 100;
                // A fraction too small to round to a lot clears everything
                if shares == 0 {
                    (available, true)
                } else {
                    (shares, true)
                }
            }
            SignalKind::BuyValue { .. } => {
                warn!("ignoring buy-shaped signal in sell dispatch for {}", signal.security);
                return Ok(());
            }
        };

        let request = OrderRequest {
            security: signal.security.clone(),
            side: OrderSide::Sell,
            volume,
            price: signal.price,
            strategy: self.opts.kind.to_string(),
            remark: signal.reason.to_string(),
        };
        match self.broker.place_order(&request) {
            Ok(order_id) => {
                if progressive {
                    if let Some(facts) = self.facts.get_mut(&signal.security) {
                        facts.signal.sell_percent_record = 1;
                    }
                }
                self.session_orders.push(SessionOrder {
                    security: signal.security.clone(),
                    side: OrderSide::Sell,
                    order_id,
                });
                self.records.record_sell(TradeRecord {
                    security: signal.security,
                    price: signal.price,
                    volume,
                    trade_date: self.trade_date,
                    trade_time: now,
                    strategy: self.opts.kind.to_string(),
                    reason: signal.reason.to_string(),
                })?;
            }
            Err(e) => warn!("sell order rejected for {}: {}", signal.security, e),
        }
        Ok(())
    }

    fn dispatch_buy(&mut self, signal: Signal, now: NaiveDateTime) -> Result<()> {
        let SignalKind::BuyValue { value } = signal.kind else {
            warn!("ignoring sell-shaped signal in buy dispatch for {}", signal.security);
            return Ok(());
        };
        let volume = calculate_volume(value, signal.price);
        if volume == 0 {
            warn!(
                "buy value {:.2} too small for a board lot of {} at {:.2}",
                value, signal.security, signal.price
            );
            return Ok(());
        }

        let request = OrderRequest {
            security: signal.security.clone(),
            side: OrderSide::Buy,
            volume,
            price: signal.price,
            strategy: self.opts.kind.to_string(),
            remark: signal.reason.to_string(),
        };
        match self.broker.place_order(&request) {
            Ok(order_id) => {
                self.session_orders.push(SessionOrder {
                    security: signal.security.clone(),
                    side: OrderSide::Buy,
                    order_id,
                });
                self.records.record_buy(TradeRecord {
                    security: signal.security,
                    price: signal.price,
                    volume,
                    trade_date: self.trade_date,
                    trade_time: now,
                    strategy: self.opts.kind.to_string(),
                    reason: signal.reason.to_string(),
                })?;
            }
            Err(e) => warn!("buy order rejected for {}: {}", signal.security, e),
        }
        Ok(())
    }
}

fn describe(kind: &SignalKind) -> &'static str {
    match kind {
        SignalKind::BuyValue { .. } => "BUY_VALUE",
        SignalKind::SellAll => "SELL_ALL",
        SignalKind::SellPercent { .. } => "SELL_PERCENT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::Bar;
    use crate::broker::{PaperBroker, ReplayData};
    use crate::market::PRICE_TOLERANCE;
    use crate::strategy::facts::SignalState;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn minute_bar(day: u32, minute: u32, open: f64, close: f64) -> Bar {
        let (hour, min) = (9 + (31 + minute) / 60, (31 + minute) % 60);
        Bar {
            timestamp: date(day).and_hms_opt(hour, min, 0).unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            prev_close: open,
            volume: 100.0,
            amount: close * 100.0 * 100.0,
        }
    }

    fn bars_from_closes(day: u32, closes: &[f64]) -> Vec<Bar> {
        let mut prev = closes[0];
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let bar = minute_bar(day, i as u32, prev, close);
                prev = close;
                bar
            })
            .collect()
    }

    /// Intraday closes whose MACD histogram tops out on the final bar.
    const TOP_CLOSES: [f64; 14] = [
        10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.2, 10.4, 10.6, 10.8, 11.0, 11.0, 11.0, 11.0,
    ];

    fn facts_with(last_limit_up_open: Option<f64>) -> StockFacts {
        StockFacts {
            yesterday_date: date(5),
            yesterday_body_high: 10.5,
            yesterday_close: 10.0,
            yesterday_volume: 1.0e6,
            yesterday_limit_up: false,
            yesterday_flipped: false,
            yesterday_hit_down: false,
            yesterday_contraction: true,
            last_limit_up_open,
            limit_up_next_day_volume: Some(1.0e6),
            last_entry_date: None,
            signal: SignalState::default(),
        }
    }

    fn snapshot(open_price: f64, prev_close: f64) -> OpenSnapshot {
        OpenSnapshot {
            open_price,
            prev_close,
            limit_up_price: crate::market::theoretical_limit_price(
                "600001",
                prev_close,
                PRICE_TOLERANCE,
            ),
            limit_down_price: prev_close * 0.9,
        }
    }

    fn dip_engine(
        broker: PaperBroker,
        data: ReplayData,
    ) -> StrategyEngine<PaperBroker, ReplayData> {
        let opts = StrategyOptions {
            kind: StrategyKind::BuyOnDips,
            ..StrategyOptions::default()
        };
        let mut engine =
            StrategyEngine::new(opts, broker, data, RecordStore::in_memory(), date(6));
        engine.state = EngineState::Trading;
        engine
    }

    #[test]
    fn test_progressive_sell_sizing() {
        let mut broker = PaperBroker::new(0.0);
        broker.connect().unwrap();
        broker.seed_position("600001", 1000, 10.0);

        let mut data = ReplayData::new();
        data.add_intraday("600001", bars_from_closes(6, &TOP_CLOSES));

        let mut engine = dip_engine(broker, data);
        engine.sell_pool = vec!["600001".to_string()];
        // Breakout open above price and a stale higher top price so the
        // breakout-stop rule fires on every MACD top
        let mut facts = facts_with(Some(12.5));
        facts.signal.macd_top_price = 12.0;
        engine.facts.insert("600001".to_string(), facts);
        engine
            .open_data
            .insert("600001".to_string(), snapshot(10.5, 10.6));

        let first = date(6).and_hms_opt(10, 0, 0).unwrap();
        engine.trading_tick(first).unwrap();
        // Second qualifying trigger after the cooldown
        let second = date(6).and_hms_opt(10, 6, 0).unwrap();
        engine.trading_tick(second).unwrap();

        let fills = engine.broker.fills();
        assert_eq!(fills.len(), 2, "expected two partial sells");
        assert_eq!(fills[0].1.volume, 500, "first trigger sells 50%");
        assert_eq!(fills[1].1.volume, 500, "second trigger clears the rest");
        assert_eq!(engine.broker.available_volume("600001").unwrap(), 0);
    }

    #[test]
    fn test_throttle_blocks_rapid_retrigger() {
        let mut broker = PaperBroker::new(0.0);
        broker.connect().unwrap();
        broker.seed_position("600001", 1000, 10.0);

        let mut data = ReplayData::new();
        data.add_intraday("600001", bars_from_closes(6, &TOP_CLOSES));

        let mut engine = dip_engine(broker, data);
        engine.sell_pool = vec!["600001".to_string()];
        let mut facts = facts_with(Some(12.5));
        facts.signal.macd_top_price = 12.0;
        engine.facts.insert("600001".to_string(), facts);
        engine
            .open_data
            .insert("600001".to_string(), snapshot(10.5, 10.6));

        let first = date(6).and_hms_opt(10, 0, 0).unwrap();
        engine.trading_tick(first).unwrap();
        // One minute later: inside the 5-minute cooldown
        let soon = date(6).and_hms_opt(10, 1, 0).unwrap();
        engine.trading_tick(soon).unwrap();

        assert_eq!(engine.broker.fills().len(), 1);
    }

    #[test]
    fn test_empty_position_suppresses_sell() {
        let mut broker = PaperBroker::new(0.0);
        broker.connect().unwrap();
        // No position seeded

        let mut data = ReplayData::new();
        // Flip-off shape: high at the limit, close well below
        let mut bars = bars_from_closes(6, &[10.9, 11.0, 10.5]);
        bars[1].high = 11.7;
        data.add_intraday("600001", bars);

        let mut engine = dip_engine(broker, data);
        engine.sell_pool = vec!["600001".to_string()];
        engine
            .facts
            .insert("600001".to_string(), facts_with(Some(10.0)));
        engine
            .open_data
            .insert("600001".to_string(), snapshot(10.5, 10.6));

        let now = date(6).and_hms_opt(10, 0, 0).unwrap();
        engine.trading_tick(now).unwrap();

        // Signal was produced but no broker call went out
        assert!(engine.broker.fills().is_empty());
    }

    /// Dip-and-recover closes with a histogram bottom on the final bar.
    fn dip_recovery_bars(day: u32) -> Vec<Bar> {
        let closes = [
            9.2, 9.15, 9.1, 9.0, 8.9, 8.8, 8.65, 8.5, 8.3, 8.1, 8.2, 8.3, 8.4,
        ];
        let volumes = [
            50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.0, 800.0, 800.0, 800.0, 300.0, 300.0, 300.0,
        ];
        let mut bars = bars_from_closes(day, &closes);
        for (bar, volume) in bars.iter_mut().zip(volumes) {
            bar.volume = volume;
            bar.amount = bar.close * volume * 100.0;
        }
        bars
    }

    fn entry_ready_engine() -> StrategyEngine<PaperBroker, ReplayData> {
        let mut broker = PaperBroker::new(100_000.0);
        broker.connect().unwrap();
        let mut data = ReplayData::new();
        data.add_intraday("600001", dip_recovery_bars(6));

        let mut engine = dip_engine(broker, data);
        engine.buy_pool = vec!["600001".to_string()];
        let mut facts = facts_with(Some(8.0));
        facts.yesterday_body_high = 9.0;
        engine.facts.insert("600001".to_string(), facts);
        engine
            .open_data
            .insert("600001".to_string(), snapshot(9.2, 8.39));
        engine
    }

    #[test]
    fn test_buy_latch_is_one_shot() {
        let mut engine = entry_ready_engine();
        let now = date(6).and_hms_opt(10, 0, 0).unwrap();
        engine.trading_tick(now).unwrap();
        // All clauses still hold a tick later; the latch must hold
        let later = date(6).and_hms_opt(10, 0, 1).unwrap();
        engine.trading_tick(later).unwrap();

        let fills = engine.broker.fills();
        assert_eq!(fills.len(), 1, "entry must fire exactly once per session");
        assert_eq!(fills[0].1.side, OrderSide::Buy);
        // 10_000 yuan at 8.40 rounds down to 1100 shares
        assert_eq!(fills[0].1.volume, 1100);
    }

    #[test]
    fn test_sold_today_never_rebought() {
        let mut engine = entry_ready_engine();
        engine
            .records
            .record_sell(TradeRecord {
                security: "600001".to_string(),
                price: 9.0,
                volume: 1000,
                trade_date: date(6),
                trade_time: date(6).and_hms_opt(9, 40, 0).unwrap(),
                strategy: "BuyOnDips".to_string(),
                reason: "test".to_string(),
            })
            .unwrap();

        let now = date(6).and_hms_opt(10, 0, 0).unwrap();
        engine.trading_tick(now).unwrap();
        assert!(engine.broker.fills().is_empty());
    }

    #[test]
    fn test_sells_dispatch_before_buys() {
        let mut broker = PaperBroker::new(100_000.0);
        broker.connect().unwrap();
        broker.seed_position("600002", 1000, 10.0);

        let mut data = ReplayData::new();
        // Buy member: board-hitting shape
        data.add_intraday("600001", vec![minute_bar(6, 0, 10.5, 11.0)]);
        // Sell member: board-explosion shape
        let mut sell_bars = vec![minute_bar(6, 0, 10.9, 11.0), minute_bar(6, 1, 10.9, 10.5)];
        sell_bars[1].prev_close = 11.0;
        data.add_intraday("600002", sell_bars);

        let opts = StrategyOptions {
            kind: StrategyKind::BoardHitting,
            ..StrategyOptions::default()
        };
        let mut engine =
            StrategyEngine::new(opts, broker, data, RecordStore::in_memory(), date(6));
        engine.state = EngineState::Trading;
        engine.buy_pool = vec!["600001".to_string()];
        engine.sell_pool = vec!["600002".to_string()];
        engine
            .facts
            .insert("600001".to_string(), facts_with(None));
        engine
            .facts
            .insert("600002".to_string(), facts_with(None));
        engine
            .open_data
            .insert("600001".to_string(), snapshot(10.0, 10.0));
        engine
            .open_data
            .insert("600002".to_string(), snapshot(10.0, 10.0));

        let now = date(6).and_hms_opt(10, 0, 0).unwrap();
        engine.trading_tick(now).unwrap();

        let fills = engine.broker.fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].1.side, OrderSide::Sell);
        assert_eq!(fills[0].1.security, "600002");
        assert_eq!(fills[1].1.side, OrderSide::Buy);
        assert_eq!(fills[1].1.security, "600001");
    }

    #[test]
    fn test_buy_not_repeated_within_session() {
        let mut broker = PaperBroker::new(100_000.0);
        broker.connect().unwrap();
        let mut data = ReplayData::new();
        data.add_intraday("600001", vec![minute_bar(6, 0, 10.5, 11.0)]);

        let opts = StrategyOptions {
            kind: StrategyKind::BoardHitting,
            ..StrategyOptions::default()
        };
        let mut engine =
            StrategyEngine::new(opts, broker, data, RecordStore::in_memory(), date(6));
        engine.state = EngineState::Trading;
        engine.buy_pool = vec!["600001".to_string()];
        engine
            .facts
            .insert("600001".to_string(), facts_with(None));
        engine
            .open_data
            .insert("600001".to_string(), snapshot(10.0, 10.0));

        let now = date(6).and_hms_opt(10, 0, 0).unwrap();
        engine.trading_tick(now).unwrap();
        engine
            .trading_tick(date(6).and_hms_opt(10, 0, 1).unwrap())
            .unwrap();

        assert_eq!(engine.broker.fills().len(), 1);
    }

    #[test]
    fn test_prepare_builds_pools_and_open_data() {
        let mut broker = PaperBroker::new(100_000.0);
        // Held name without a limit-up history: dropped from the dip
        // strategy's sell pool with a warning
        broker.seed_position("600002", 1000, 10.0);

        let mut data = ReplayData::new();
        // Buy candidate: limit-up on day 3, three-day contracting pullback.
        // The final bar is today's daily open bar, published after 09:30.
        data.add_daily(
            "600001",
            vec![
                daily_bar(2, 10.0, 10.2, 9.9, 10.1, 10.0, 1000.0),
                daily_bar(3, 10.1, 11.11, 10.1, 11.11, 10.1, 2000.0),
                daily_bar(4, 11.0, 11.3, 10.8, 11.0, 11.11, 1800.0),
                daily_bar(5, 11.0, 11.2, 10.7, 10.9, 11.0, 1500.0),
                daily_bar(6, 10.9, 11.1, 10.6, 10.8, 10.9, 1300.0),
                daily_bar(9, 10.9, 11.0, 10.8, 11.0, 10.8, 100.0),
            ],
        );
        data.add_daily(
            "600002",
            vec![
                daily_bar(6, 10.0, 10.2, 9.9, 10.1, 10.0, 1000.0),
                daily_bar(9, 10.0, 10.1, 9.9, 10.0, 10.1, 100.0),
            ],
        );

        let opts = StrategyOptions {
            kind: StrategyKind::BuyOnDips,
            ..StrategyOptions::default()
        };
        let mut engine =
            StrategyEngine::new(opts, broker, data, RecordStore::in_memory(), date(9));
        engine.prepare().unwrap();

        assert_eq!(engine.state(), EngineState::AwaitingOpenData);
        assert_eq!(engine.buy_pool(), &["600001".to_string()]);
        // 600002 had no limit-up day in the window
        assert!(engine.sell_pool().is_empty());
        assert!(engine.data.subscriptions().contains("600001"));

        // Before the open: no transition
        assert!(!engine
            .poll_open_data(date(9).and_hms_opt(9, 20, 0).unwrap())
            .unwrap());
        // After the open, today's daily bar is visible
        assert!(engine
            .poll_open_data(date(9).and_hms_opt(9, 31, 0).unwrap())
            .unwrap());
        assert_eq!(engine.state(), EngineState::Trading);
        let open = &engine.open_data["600001"];
        assert_eq!(open.open_price, 10.9);
        assert_eq!(open.prev_close, 10.8);
    }

    fn daily_bar(
        day: u32,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        prev_close: f64,
        volume: f64,
    ) -> Bar {
        Bar {
            timestamp: date(day).and_hms_opt(15, 0, 0).unwrap(),
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
    fn test_trading_time_guard() {
        assert!(!is_trading_time(NaiveTime::from_hms_opt(9, 29, 0).unwrap()));
        assert!(is_trading_time(NaiveTime::from_hms_opt(9, 30, 5).unwrap()));
        assert!(is_trading_time(NaiveTime::from_hms_opt(11, 30, 0).unwrap()));
        assert!(!is_trading_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(is_trading_time(NaiveTime::from_hms_opt(13, 0, 5).unwrap()));
        assert!(is_trading_time(NaiveTime::from_hms_opt(14, 54, 59).unwrap()));
        assert!(!is_trading_time(NaiveTime::from_hms_opt(14, 56, 0).unwrap()));
    }
}
