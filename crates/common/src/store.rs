use std::time::Duration;

use async_trait::async_trait;

use crate::{ClosedTrade, CooldownMark, Position, PositionStatus, Result, StrategyParameters};

/// Shared, process-external trading state.
///
/// This is the only mutable state crossing task and process boundaries. Every
/// position transition goes through `compare_and_set_position`, which must be
/// atomic across all writers of the same backing store: two schedulers racing
/// for a slot can never both win.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Move `market`'s position from `expected` to `new` if, and only if, the
    /// stored status currently equals `expected`. `None` is the empty slot.
    ///
    /// Claiming an empty slot (`None -> ENTERING`) additionally fails when the
    /// market is cooling down or the store already holds its maximum number of
    /// positions. Returns `Ok(false)` when the comparison fails and
    /// `Err(InvalidTransition)` for a step outside the lifecycle.
    async fn compare_and_set_position(
        &self,
        market: &str,
        expected: Option<PositionStatus>,
        new: Option<&Position>,
    ) -> Result<bool>;

    /// Atomically clear `market`'s position (if it is in `expected`) and put
    /// the market on cooldown for `ttl`.
    async fn release_with_cooldown(
        &self,
        market: &str,
        expected: PositionStatus,
        ttl: Duration,
    ) -> Result<bool>;

    async fn position(&self, market: &str) -> Result<Option<Position>>;

    /// Every non-NONE position.
    async fn positions(&self) -> Result<Vec<Position>>;

    /// Operator escape hatch: drop every position regardless of status.
    async fn clear_all_positions(&self) -> Result<Vec<Position>>;

    async fn set_cooldown(&self, market: &str, ttl: Duration) -> Result<()>;

    async fn is_cooling_down(&self, market: &str) -> Result<bool>;

    async fn active_cooldowns(&self) -> Result<Vec<CooldownMark>>;

    /// Append to the bounded trade log, evicting the oldest entries.
    async fn append_closed_trade(&self, trade: &ClosedTrade) -> Result<()>;

    /// The most recent `limit` trades, oldest first.
    async fn closed_trades(&self, limit: usize) -> Result<Vec<ClosedTrade>>;

    async fn parameters(&self) -> Result<StrategyParameters>;

    /// Store `params` clamped to the configured bounds; returns what was stored.
    async fn set_parameters(&self, params: &StrategyParameters) -> Result<StrategyParameters>;

    async fn is_paused(&self) -> Result<bool>;

    async fn set_paused(&self, paused: bool) -> Result<()>;
}
