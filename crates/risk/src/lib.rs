//! Exit rules and the per-position exit monitor.

pub mod exit;
pub mod monitor;

pub use exit::{ExitConfig, TrailingStop};
pub use monitor::{ExitMonitor, MonitorExit};
