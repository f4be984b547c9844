//! In-memory market-data source for replay runs, tests, and the offline
//! scan tool. Daily histories load from per-security CSV files; intraday
//! minute bars are fed in directly and windowed by a movable clock so a
//! replay sees only the bars "so far".

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::{debug, info};

use super::{MarketDataSource, Period, SecurityInfo};
use crate::bars::{Bar, BarSeries};

#[derive(Debug, Deserialize)]
struct CsvDailyRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    prev_close: f64,
    volume: f64,
    amount: f64,
}

/// Replayable data source backed by plain maps.
#[derive(Debug, Default)]
pub struct ReplayData {
    daily: HashMap<String, BarSeries>,
    intraday: HashMap<String, BarSeries>,
    info: HashMap<String, SecurityInfo>,
    subscriptions: HashSet<String>,
    clock: Option<NaiveDateTime>,
}

impl ReplayData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load daily histories from a directory of `<security>.csv` files with
    /// columns date,open,high,low,close,prev_close,volume,amount.
    pub fn from_csv_dir(dir: &Path) -> Result<Self> {
        let mut data = Self::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading data directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
                continue;
            }
            let Some(security) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let mut reader = csv::Reader::from_path(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let mut series = Vec::new();
            for row in reader.deserialize() {
                let row: CsvDailyRow =
                    row.with_context(|| format!("parsing {}", path.display()))?;
                series.push(Bar {
                    timestamp: row.date.and_hms_opt(15, 0, 0).unwrap_or_default(),
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    prev_close: row.prev_close,
                    volume: row.volume,
                    amount: row.amount,
                });
            }
            series.sort_by_key(|bar| bar.timestamp);
            debug!("loaded {} daily bars for {}", series.len(), security);
            data.add_daily(security, series);
        }
        info!("loaded daily histories for {} securities", data.daily.len());
        Ok(data)
    }

    pub fn add_daily(&mut self, security: &str, series: BarSeries) {
        self.info.entry(security.to_string()).or_insert(SecurityInfo {
            name: security.to_string(),
            is_special_treatment: false,
            is_suspended: false,
            is_delisting: false,
        });
        self.daily.insert(security.to_string(), series);
    }

    pub fn add_intraday(&mut self, security: &str, series: BarSeries) {
        self.intraday.insert(security.to_string(), series);
    }

    pub fn set_info(&mut self, security: &str, info: SecurityInfo) {
        self.info.insert(security.to_string(), info);
    }

    /// Limit intraday visibility to bars at or before `now`.
    pub fn set_clock(&mut self, now: NaiveDateTime) {
        self.clock = Some(now);
    }

    pub fn subscriptions(&self) -> &HashSet<String> {
        &self.subscriptions
    }
}

impl MarketDataSource for ReplayData {
    fn daily_bars(
        &self,
        securities: &[String],
        end: NaiveDate,
        count: usize,
    ) -> Result<HashMap<String, BarSeries>> {
        let mut out = HashMap::new();
        for security in securities {
            let Some(series) = self.daily.get(security) else {
                continue;
            };
            let upto: Vec<Bar> = series
                .iter()
                .filter(|bar| bar.date() <= end)
                .cloned()
                .collect();
            let start = upto.len().saturating_sub(count);
            out.insert(security.clone(), upto[start..].to_vec());
        }
        Ok(out)
    }

    fn intraday_bars(
        &self,
        securities: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, BarSeries>> {
        let mut out = HashMap::new();
        for security in securities {
            let Some(series) = self.intraday.get(security) else {
                continue;
            };
            let bars: Vec<Bar> = series
                .iter()
                .filter(|bar| {
                    bar.date() == date && self.clock.map_or(true, |now| bar.timestamp <= now)
                })
                .cloned()
                .collect();
            if !bars.is_empty() {
                out.insert(security.clone(), bars);
            }
        }
        Ok(out)
    }

    fn security_info(&self, security: &str) -> Option<SecurityInfo> {
        self.info.get(security).cloned()
    }

    fn universe(&self) -> Vec<String> {
        let mut names: Vec<String> = self.daily.keys().cloned().collect();
        names.sort();
        names
    }

    fn subscribe(&mut self, securities: &[String], period: Period) -> Result<()> {
        for security in securities {
            self.subscriptions.insert(security.clone());
        }
        info!("subscribed {} securities at {}", securities.len(), period);
        Ok(())
    }

    fn unsubscribe(&mut self, securities: &[String]) -> Result<()> {
        for security in securities {
            self.subscriptions.remove(security);
        }
        Ok(())
    }
}
