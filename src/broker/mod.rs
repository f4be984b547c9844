//! Collaborator seams: the broker gateway and the market-data source.
//!
//! The strategy core is gateway-agnostic. Live trading plugs the vendor
//! terminal in behind these traits; replay testing and the paper broker
//! plug in the implementations in this module's submodules. Every call is
//! synchronous; the polling loop awaits each one to completion before the
//! next tick.

pub mod paper;
pub mod replay;

use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::bars::BarSeries;

pub use paper::PaperBroker;
pub use replay::ReplayData;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Quote subscription period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Minute,
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Daily => write!(f, "1d"),
            Period::Minute => write!(f, "1m"),
        }
    }
}

/// Account funds snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_asset: f64,
    pub cash: f64,
    pub market_value: f64,
    pub frozen_cash: f64,
}

/// One position row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub security: String,
    /// Total held volume in shares
    pub volume: i64,
    /// Volume available to sell today (T+1 settlement excludes today's buys)
    pub available: i64,
    pub cost_price: f64,
}

/// Static instrument attributes used for universe hygiene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub name: String,
    pub is_special_treatment: bool,
    pub is_suspended: bool,
    pub is_delisting: bool,
}

/// One order submission.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub security: String,
    pub side: OrderSide,
    /// Volume in shares, a multiple of the 100-share lot
    pub volume: i64,
    /// Limit price; 0.0 requests the latest market price
    pub price: f64,
    /// Strategy tag carried on the order for downstream auditing
    pub strategy: String,
    /// Human-readable reason, also used for de-duplication matching
    pub remark: String,
}

pub type OrderId = String;

/// Broker gateway operations the core depends on.
pub trait Broker {
    fn connect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn account(&self) -> Result<AccountSnapshot>;
    fn positions(&self) -> Result<Vec<Position>>;
    /// Volume of `security` available to sell right now; 0 if not held.
    fn available_volume(&self, security: &str) -> Result<i64>;
    fn place_order(&mut self, request: &OrderRequest) -> Result<OrderId>;
    fn cancel_order(&mut self, order_id: &OrderId) -> Result<()>;
}

/// Market-data operations the core depends on.
pub trait MarketDataSource {
    /// Up to `count` daily bars per security ending at `end` (inclusive).
    fn daily_bars(
        &self,
        securities: &[String],
        end: NaiveDate,
        count: usize,
    ) -> Result<HashMap<String, BarSeries>>;

    /// All intraday minute bars per security for the session on `date`,
    /// oldest first, up to "now".
    fn intraday_bars(
        &self,
        securities: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, BarSeries>>;

    fn security_info(&self, security: &str) -> Option<SecurityInfo>;

    /// Candidate universe for pool building.
    fn universe(&self) -> Vec<String>;

    fn subscribe(&mut self, securities: &[String], period: Period) -> Result<()>;
    fn unsubscribe(&mut self, securities: &[String]) -> Result<()>;
}

/// Volume purchasable for `value` yuan at `price`, floored to a multiple
/// of the 100-share board lot.
pub fn calculate_volume(value: f64, price: f64) -> i64 {
    if value <= 0.0 || price <= 0.0 {
        return 0;
    }
    let shares = (value / price) as i64;
    (shares / 100) * 100
}
