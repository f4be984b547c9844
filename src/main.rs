use std::path::PathBuf;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_tz::Asia::Shanghai;
use clap::Parser;
use tracing::info;

use boardhawk::broker::{PaperBroker, ReplayData};
use boardhawk::config::{StrategyKind, StrategyOptions};
use boardhawk::records::RecordStore;
use boardhawk::strategy::StrategyEngine;

#[derive(Parser, Debug)]
#[command(author, version, about = "Intraday A-share limit-up strategy bot")]
struct Args {
    /// Trading account identifier
    #[arg(long, env = "ACCOUNT_ID")]
    account_id: String,

    /// Strategy family: board-hitting or buy-on-dips
    #[arg(long, default_value = "board-hitting")]
    strategy: String,

    /// Directory of per-security daily bar CSV files
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Trading date (YYYYMMDD); defaults to today in exchange time
    #[arg(short = 'D', long)]
    date: Option<String>,

    /// Path of the trade-record store
    #[arg(long, default_value = "records.json")]
    records: PathBuf,

    /// Starting cash for the simulated account
    #[arg(long, default_value = "100000")]
    cash: f64,

    /// Monetary size of a single buy order, in yuan
    #[arg(long, default_value = "10000")]
    fixed_buy_value: f64,

    /// Lookback window for the pattern filters, in trading days
    #[arg(long, default_value = "5")]
    pattern_window_days: usize,

    /// Maximum limit-up count allowed inside the pattern window
    #[arg(long, default_value = "2")]
    max_limit_up_count: usize,

    /// Disable buy signal evaluation
    #[arg(long)]
    no_buy: bool,

    /// Disable sell signal evaluation
    #[arg(long)]
    no_sell: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("boardhawk=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let kind = match args.strategy.as_str() {
        "buy-on-dips" => StrategyKind::BuyOnDips,
        _ => StrategyKind::BoardHitting,
    };

    let trade_date = match &args.date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y%m%d")?,
        None => Utc::now().with_timezone(&Shanghai).date_naive(),
    };

    info!("starting {} session for {}", kind, trade_date);
    info!("data dir: {}", args.data_dir.display());

    let opts = StrategyOptions {
        account_id: args.account_id.clone(),
        kind,
        buy_signal_enabled: !args.no_buy,
        sell_signal_enabled: !args.no_sell,
        fixed_buy_value: args.fixed_buy_value,
        pattern_window_days: args.pattern_window_days,
        max_limit_up_count: args.max_limit_up_count,
        ..StrategyOptions::default()
    };

    let data = ReplayData::from_csv_dir(&args.data_dir)?;
    let records = RecordStore::load(&args.records)?;
    let broker = PaperBroker::new(args.cash);

    let mut engine = StrategyEngine::new(opts, broker, data, records, trade_date);

    tokio::select! {
        result = engine.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping strategy");
        }
    }

    info!("session finished in state {}", engine.state());
    Ok(())
}
