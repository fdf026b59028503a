//! Deterministic backtest engine.
//!
//! Bar-driven order/position/SL-TP state machine with documented intrabar
//! resolution, seeded slippage, and margin/stop-out rules. Identical config
//! (including `rng_seed`) and bar series produce bit-identical trades and
//! equity curves.

pub mod broker;
pub mod costs;
pub mod metrics;
pub mod report;

pub use broker::{AccountSnapshot, SimBroker};
pub use metrics::compute_metrics;
