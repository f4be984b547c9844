//! Offline pattern scan over a directory of daily bar CSV files.
//!
//! Runs the session pool filters without a broker attached, the nightly
//! workflow for eyeballing tomorrow's candidates.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_tz::Asia::Shanghai;
use clap::Parser;
use tracing::info;

use boardhawk::broker::{MarketDataSource, ReplayData};
use boardhawk::filters::{buy_on_dip_filter, coiled_spring_filter, FilterConfig};
use boardhawk::market::{classify_board, Board};

#[derive(Parser, Debug)]
#[command(name = "scan")]
#[command(about = "Scan daily bars for coiled-spring and buy-on-dip setups")]
struct Args {
    /// Directory of per-security daily bar CSV files
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Filter to run: coiled-spring, buy-on-dip, or both
    #[arg(short, long, default_value = "both")]
    filter: String,

    /// Scan date (YYYYMMDD); defaults to today in exchange time
    #[arg(short = 'D', long)]
    date: Option<String>,

    /// Lookback window in trading days
    #[arg(long, default_value = "5")]
    window_days: usize,

    /// Maximum limit-up count inside the window
    #[arg(long, default_value = "2")]
    max_limit_up_count: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("boardhawk=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let end = match &args.date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y%m%d")?,
        None => Utc::now().with_timezone(&Shanghai).date_naive(),
    };

    let data = ReplayData::from_csv_dir(&args.data_dir)?;
    let universe: Vec<String> = data
        .universe()
        .into_iter()
        .filter(|security| classify_board(security) == Board::Main)
        .collect();
    info!("scanning {} main-board names up to {}", universe.len(), end);

    let cfg = FilterConfig {
        window_days: args.window_days,
        max_limit_up_count: args.max_limit_up_count,
        ..FilterConfig::default()
    };
    let lookback = cfg.window_days.max(cfg.one_word_window_days);
    let daily = data.daily_bars(&universe, end, lookback)?;

    if args.filter == "coiled-spring" || args.filter == "both" {
        let matched = coiled_spring_filter(&universe, &daily, &cfg);
        println!("coiled-spring ({}):", matched.len());
        for security in &matched {
            println!("  {security}");
        }
    }

    if args.filter == "buy-on-dip" || args.filter == "both" {
        let matched = buy_on_dip_filter(&universe, &daily, &cfg);
        println!("buy-on-dip ({}):", matched.len());
        for security in &matched {
            println!("  {security}");
        }
    }

    Ok(())
}
