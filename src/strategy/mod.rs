//! Strategy core: per-security session caches, signal functions, and the
//! orchestrating state machine.

pub mod engine;
pub mod facts;
pub mod signals;

pub use engine::{EngineState, StrategyEngine};
pub use facts::{OpenSnapshot, SignalState, StockFacts};
pub use signals::{Signal, SignalKind};
