use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{
    ClosedTrade, CooldownMark, Position, PositionStore, Result, SchedulerState,
    StrategyParameters, TradeEvent, TradeSummary, TradingMode,
};
use strategy::{signal_performance, SignalPerformance};

use crate::scheduler::SchedulerHandle;

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub mode: TradingMode,
    pub paused: bool,
    pub scheduler: SchedulerState,
    pub positions: Vec<Position>,
    pub cooldowns: Vec<CooldownMark>,
    pub parameters: StrategyParameters,
}

/// Aggregates returned by `summary`.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub trades: TradeSummary,
    pub signals: BTreeMap<String, SignalPerformance>,
    pub parameters: StrategyParameters,
}

/// Operator commands shared by the chat bot and the webhook.
#[derive(Clone)]
pub struct ControlSurface {
    store: Arc<dyn PositionStore>,
    scheduler: SchedulerHandle,
    mode: TradingMode,
    events: mpsc::Sender<TradeEvent>,
    /// Trades considered by `summary`.
    summary_window: usize,
}

impl ControlSurface {
    pub fn new(
        store: Arc<dyn PositionStore>,
        scheduler: SchedulerHandle,
        mode: TradingMode,
        events: mpsc::Sender<TradeEvent>,
        summary_window: usize,
    ) -> Self {
        Self {
            store,
            scheduler,
            mode,
            events,
            summary_window,
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Stop new entries. Open positions keep being monitored.
    pub async fn pause(&self, operator: &str) -> Result<()> {
        self.store.set_paused(true).await?;
        info!(operator, "Entries paused");
        Ok(())
    }

    pub async fn resume(&self, operator: &str) -> Result<()> {
        self.store.set_paused(false).await?;
        info!(operator, "Entries resumed");
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            mode: self.mode,
            paused: self.store.is_paused().await?,
            scheduler: self.scheduler.state().await,
            positions: self.store.positions().await?,
            cooldowns: self.store.active_cooldowns().await?,
            parameters: self.store.parameters().await?,
        })
    }

    pub async fn summary(&self) -> Result<SummaryReport> {
        let trades = self.store.closed_trades(self.summary_window).await?;
        Ok(SummaryReport {
            trades: TradeSummary::from_trades(&trades),
            signals: signal_performance(&trades),
            parameters: self.store.parameters().await?,
        })
    }

    /// The most recent `limit` closed trades, oldest first.
    pub async fn trades(&self, limit: usize) -> Result<Vec<ClosedTrade>> {
        self.store.closed_trades(limit).await
    }

    /// Drop every position regardless of status. The only way out of a
    /// stuck EXITING position; running monitors notice and stop.
    pub async fn reset(&self, operator: &str) -> Result<Vec<Position>> {
        let cleared = self.store.clear_all_positions().await?;
        let markets: Vec<String> = cleared
            .iter()
            .map(|p| format!("{}:{}", p.market, p.status))
            .collect();
        warn!(target: "audit", operator, cleared = ?markets, "Operator reset cleared all positions");

        let event = TradeEvent::PositionsReset {
            operator: operator.to_string(),
            cleared: cleared.iter().map(|p| p.market.clone()).collect(),
        };
        if self.events.send(event).await.is_err() {
            debug!("Event channel closed");
        }
        Ok(cleared)
    }
}
