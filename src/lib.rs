// Library crate - exports the strategy core and collaborator seams

pub mod bars;
pub mod broker;
pub mod config;
pub mod filters;
pub mod indicators;
pub mod market;
pub mod records;
pub mod strategy;

// Re-export commonly used types
pub use bars::{Bar, BarSeries};
pub use broker::{Broker, MarketDataSource, PaperBroker, ReplayData};
pub use config::{StrategyKind, StrategyOptions};
pub use records::RecordStore;
pub use strategy::{EngineState, Signal, SignalKind, StrategyEngine};
