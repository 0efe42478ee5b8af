//! Implementations of `common::PositionStore`.
//!
//! `SqliteStore` is the durable store shared by every process pointed at the
//! same database file. `MemoryStore` gives identical semantics inside a single
//! process and backs simulations and tests.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use common::{Error, ParameterBounds, Position, PositionStatus, Result, StrategyParameters};

/// Limits and parameter bounds every store enforces.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Maximum number of non-NONE positions at any time.
    pub max_open_positions: usize,
    /// Maximum length of the closed-trade log.
    pub closed_trade_capacity: usize,
    pub bounds: ParameterBounds,
    /// Parameters used until the tuner writes its first adjustment.
    pub initial_parameters: StrategyParameters,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_open_positions: 1,
            closed_trade_capacity: 500,
            bounds: ParameterBounds::default(),
            initial_parameters: StrategyParameters::default(),
        }
    }
}

/// Reject writes that skip or reorder lifecycle steps, or that would file a
/// position under the wrong market.
pub(crate) fn validate_transition(
    market: &str,
    expected: Option<PositionStatus>,
    new: Option<&Position>,
) -> Result<()> {
    let to = new.map(|p| p.status);
    if !PositionStatus::is_valid_transition(expected, to) {
        return Err(Error::InvalidTransition { from: expected, to });
    }
    if let Some(p) = new {
        if p.market != market {
            return Err(Error::Other(format!(
                "position for '{}' cannot be stored under '{market}'",
                p.market
            )));
        }
    }
    Ok(())
}
