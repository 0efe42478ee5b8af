//! Market scanning and parameter tuning.
//!
//! The scanner scores candle windows with the registered signals and returns
//! at most one candidate per scan. The tuner nudges the shared
//! `StrategyParameters` after every closed trade.

pub mod config;
pub mod indicators;
pub mod registry;
pub mod scanner;
pub mod scoring;
pub mod signals;
pub mod tuner;

pub use config::ScannerConfig;
pub use registry::SignalRegistry;
pub use scanner::{rank_universe, Scanner};
pub use scoring::{pick_best, score_window, ScoreResult, SignalOutcome};
pub use signals::Signal;
pub use tuner::{adjust, signal_performance, ParameterTuner, SignalPerformance};
