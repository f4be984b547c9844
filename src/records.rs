//! Keyed store of filled orders.
//!
//! Persists the most recent buy and sell per security as JSON so the
//! strategy can tell, across restarts, whether a name is currently held
//! and whether it already exited today.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One filled order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub security: String,
    pub price: f64,
    pub volume: i64,
    pub trade_date: NaiveDate,
    pub trade_time: NaiveDateTime,
    pub strategy: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SecurityRecords {
    last_buy: Option<TradeRecord>,
    last_sell: Option<TradeRecord>,
}

/// JSON-file-backed record store, keyed by security id. An in-memory
/// variant (no path) backs tests and replay runs.
#[derive(Debug, Default)]
pub struct RecordStore {
    path: Option<PathBuf>,
    records: HashMap<String, SecurityRecords>,
}

impl RecordStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`, starting empty if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: Some(path.to_path_buf()),
                records: HashMap::new(),
            });
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading record store {}", path.display()))?;
        let records: HashMap<String, SecurityRecords> =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        info!("loaded trade records for {} securities", records.len());
        Ok(Self {
            path: Some(path.to_path_buf()),
            records,
        })
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing record store {}", path.display()))?;
        Ok(())
    }

    pub fn record_buy(&mut self, record: TradeRecord) -> Result<()> {
        let key = record.security.clone();
        self.records.entry(key).or_default().last_buy = Some(record);
        self.save()
    }

    pub fn record_sell(&mut self, record: TradeRecord) -> Result<()> {
        let key = record.security.clone();
        self.records.entry(key).or_default().last_sell = Some(record);
        self.save()
    }

    pub fn last_buy(&self, security: &str) -> Option<&TradeRecord> {
        self.records.get(security)?.last_buy.as_ref()
    }

    pub fn last_sell(&self, security: &str) -> Option<&TradeRecord> {
        self.records.get(security)?.last_sell.as_ref()
    }

    /// A security is held iff its most recent buy postdates its most recent
    /// sell.
    pub fn is_currently_held(&self, security: &str) -> bool {
        match (self.last_buy(security), self.last_sell(security)) {
            (Some(buy), Some(sell)) => buy.trade_date > sell.trade_date,
            (Some(_), None) => true,
            _ => false,
        }
    }
}
