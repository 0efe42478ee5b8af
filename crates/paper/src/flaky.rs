use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use common::{
    ClosedTrade, CooldownMark, Error, Position, PositionStatus, PositionStore, Result,
    StrategyParameters,
};

/// A store write that `FlakyStore` can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFault {
    /// `compare_and_set_position` calls expecting this status.
    CompareAndSet(Option<PositionStatus>),
    ReleaseWithCooldown,
    AppendClosedTrade,
}

/// Wraps a `PositionStore` and fails chosen writes a set number of times
/// before letting them through.
pub struct FlakyStore {
    inner: Arc<dyn PositionStore>,
    faults: Mutex<HashMap<StoreFault, usize>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn PositionStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` calls matching `fault`.
    pub async fn fail_next(&self, fault: StoreFault, times: usize) {
        self.faults.lock().await.insert(fault, times);
    }

    async fn trip(&self, fault: StoreFault) -> Result<()> {
        let mut faults = self.faults.lock().await;
        match faults.get_mut(&fault) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                warn!(?fault, "Injected store failure");
                Err(Error::Other(format!("injected store failure: {fault:?}")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PositionStore for FlakyStore {
    async fn compare_and_set_position(
        &self,
        market: &str,
        expected: Option<PositionStatus>,
        new: Option<&Position>,
    ) -> Result<bool> {
        self.trip(StoreFault::CompareAndSet(expected)).await?;
        self.inner.compare_and_set_position(market, expected, new).await
    }

    async fn release_with_cooldown(
        &self,
        market: &str,
        expected: PositionStatus,
        ttl: Duration,
    ) -> Result<bool> {
        self.trip(StoreFault::ReleaseWithCooldown).await?;
        self.inner.release_with_cooldown(market, expected, ttl).await
    }

    async fn position(&self, market: &str) -> Result<Option<Position>> {
        self.inner.position(market).await
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        self.inner.positions().await
    }

    async fn clear_all_positions(&self) -> Result<Vec<Position>> {
        self.inner.clear_all_positions().await
    }

    async fn set_cooldown(&self, market: &str, ttl: Duration) -> Result<()> {
        self.inner.set_cooldown(market, ttl).await
    }

    async fn is_cooling_down(&self, market: &str) -> Result<bool> {
        self.inner.is_cooling_down(market).await
    }

    async fn active_cooldowns(&self) -> Result<Vec<CooldownMark>> {
        self.inner.active_cooldowns().await
    }

    async fn append_closed_trade(&self, trade: &ClosedTrade) -> Result<()> {
        self.trip(StoreFault::AppendClosedTrade).await?;
        self.inner.append_closed_trade(trade).await
    }

    async fn closed_trades(&self, limit: usize) -> Result<Vec<ClosedTrade>> {
        self.inner.closed_trades(limit).await
    }

    async fn parameters(&self) -> Result<StrategyParameters> {
        self.inner.parameters().await
    }

    async fn set_parameters(&self, params: &StrategyParameters) -> Result<StrategyParameters> {
        self.inner.set_parameters(params).await
    }

    async fn is_paused(&self) -> Result<bool> {
        self.inner.is_paused().await
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        self.inner.set_paused(paused).await
    }
}
