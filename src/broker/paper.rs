//! Simulated broker with immediate fills.
//!
//! Stands in for the vendor terminal during replay runs and tests. Fills
//! every accepted order at its limit price, tracks cash and positions, and
//! honors T+1 settlement: shares bought today are not available to sell
//! until the next session.

use std::collections::HashMap;

use anyhow::{bail, Result};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AccountSnapshot, Broker, OrderId, OrderRequest, OrderSide, Position};

#[derive(Debug, Clone)]
struct PaperPosition {
    volume: i64,
    available: i64,
    cost_price: f64,
}

/// In-memory broker. Orders fill instantly at their limit price.
pub struct PaperBroker {
    cash: f64,
    positions: HashMap<String, PaperPosition>,
    fills: Vec<(OrderId, OrderRequest)>,
    connected: bool,
    session_id: u32,
}

impl PaperBroker {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            cash: starting_cash,
            positions: HashMap::new(),
            fills: Vec::new(),
            connected: false,
            session_id: 0,
        }
    }

    /// Seed a settled position, fully available to sell. Replay runs use
    /// this to model holdings carried in from earlier sessions.
    pub fn seed_position(&mut self, security: &str, volume: i64, cost_price: f64) {
        self.positions.insert(
            security.to_string(),
            PaperPosition {
                volume,
                available: volume,
                cost_price,
            },
        );
    }

    /// All fills in submission order.
    pub fn fills(&self) -> &[(OrderId, OrderRequest)] {
        &self.fills
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }
}

impl Broker for PaperBroker {
    fn connect(&mut self) -> Result<()> {
        // The vendor terminal draws a random six-digit session id per connect
        self.session_id = rand::thread_rng().gen_range(100_000..1_000_000);
        self.connected = true;
        info!("paper broker connected, session {}", self.session_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn account(&self) -> Result<AccountSnapshot> {
        if !self.connected {
            bail!("paper broker not connected");
        }
        let market_value: f64 = self
            .positions
            .values()
            .map(|p| p.volume as f64 * p.cost_price)
            .sum();
        Ok(AccountSnapshot {
            total_asset: self.cash + market_value,
            cash: self.cash,
            market_value,
            frozen_cash: 0.0,
        })
    }

    fn positions(&self) -> Result<Vec<Position>> {
        if !self.connected {
            bail!("paper broker not connected");
        }
        let mut rows: Vec<Position> = self
            .positions
            .iter()
            .filter(|(_, p)| p.volume > 0)
            .map(|(security, p)| Position {
                security: security.clone(),
                volume: p.volume,
                available: p.available,
                cost_price: p.cost_price,
            })
            .collect();
        rows.sort_by(|a, b| a.security.cmp(&b.security));
        Ok(rows)
    }

    fn available_volume(&self, security: &str) -> Result<i64> {
        Ok(self.positions.get(security).map_or(0, |p| p.available))
    }

    fn place_order(&mut self, request: &OrderRequest) -> Result<OrderId> {
        if !self.connected {
            bail!("paper broker not connected");
        }
        if request.volume <= 0 || request.price <= 0.0 {
            bail!("rejected order for {}: bad volume/price", request.security);
        }

        match request.side {
            OrderSide::Buy => {
                let cost = request.volume as f64 * request.price;
                if cost > self.cash {
                    bail!(
                        "rejected buy for {}: insufficient cash ({:.2} > {:.2})",
                        request.security,
                        cost,
                        self.cash
                    );
                }
                self.cash -= cost;
                let position = self
                    .positions
                    .entry(request.security.clone())
                    .or_insert(PaperPosition {
                        volume: 0,
                        available: 0,
                        cost_price: request.price,
                    });
                // T+1: today's buy raises volume but not available
                position.cost_price = (position.cost_price * position.volume as f64 + cost)
                    / (position.volume + request.volume) as f64;
                position.volume += request.volume;
            }
            OrderSide::Sell => {
                let Some(position) = self.positions.get_mut(&request.security) else {
                    bail!("rejected sell for {}: no position", request.security);
                };
                if position.available < request.volume {
                    bail!(
                        "rejected sell for {}: available {} < {}",
                        request.security,
                        position.available,
                        request.volume
                    );
                }
                position.volume -= request.volume;
                position.available -= request.volume;
                self.cash += request.volume as f64 * request.price;
            }
        }

        let order_id = Uuid::new_v4().to_string();
        info!(
            "filled {} {} x{} @ {:.2} [{}] {}",
            request.side, request.security, request.volume, request.price, request.strategy,
            request.remark
        );
        self.fills.push((order_id.clone(), request.clone()));
        Ok(order_id)
    }

    fn cancel_order(&mut self, order_id: &OrderId) -> Result<()> {
        // Fills are immediate, so there is never a resting order to cancel
        warn!("cancel ignored for {}: order already filled", order_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(security: &str, volume: i64, price: f64) -> OrderRequest {
        OrderRequest {
            security: security.to_string(),
            side: OrderSide::Buy,
            volume,
            price,
            strategy: "test".to_string(),
            remark: "test".to_string(),
        }
    }

    fn sell(security: &str, volume: i64, price: f64) -> OrderRequest {
        OrderRequest {
            side: OrderSide::Sell,
            ..buy(security, volume, price)
        }
    }

    #[test]
    fn test_buy_fills_and_debits_cash() {
        let mut broker = PaperBroker::new(50_000.0);
        broker.connect().unwrap();
        broker.place_order(&buy("600001", 1000, 10.0)).unwrap();
        assert_eq!(broker.cash(), 40_000.0);
        let positions = broker.positions().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].volume, 1000);
        // T+1: nothing available same day
        assert_eq!(broker.available_volume("600001").unwrap(), 0);
    }

    #[test]
    fn test_buy_rejected_on_insufficient_cash() {
        let mut broker = PaperBroker::new(5_000.0);
        broker.connect().unwrap();
        assert!(broker.place_order(&buy("600001", 1000, 10.0)).is_err());
        assert_eq!(broker.cash(), 5_000.0);
    }

    #[test]
    fn test_sell_from_seeded_position() {
        let mut broker = PaperBroker::new(0.0);
        broker.connect().unwrap();
        broker.seed_position("600001", 1000, 10.0);
        broker.place_order(&sell("600001", 500, 11.0)).unwrap();
        assert_eq!(broker.cash(), 5_500.0);
        assert_eq!(broker.available_volume("600001").unwrap(), 500);
    }

    #[test]
    fn test_sell_rejected_beyond_available() {
        let mut broker = PaperBroker::new(0.0);
        broker.connect().unwrap();
        broker.seed_position("600001", 1000, 10.0);
        assert!(broker.place_order(&sell("600001", 1500, 11.0)).is_err());
    }
}
