use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use common::clock::to_chrono;
use common::{
    Clock, ClosedTrade, CooldownMark, Error, Position, PositionStatus, PositionStore, Result,
    StrategyParameters, SystemClock,
};

use crate::{validate_transition, StoreSettings};

#[derive(Debug)]
struct State {
    positions: BTreeMap<String, Position>,
    cooldowns: HashMap<String, DateTime<Utc>>,
    trades: VecDeque<ClosedTrade>,
    params: StrategyParameters,
    paused: bool,
}

impl State {
    fn cooling(&self, market: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns
            .get(market)
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }
}

/// In-process store. All operations run under one lock, which makes
/// compare-and-set trivially atomic for every task sharing the instance.
pub struct MemoryStore {
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: StoreSettings, clock: Arc<dyn Clock>) -> Self {
        let params = settings.initial_parameters.clamped(&settings.bounds);
        Self {
            settings,
            clock,
            state: Mutex::new(State {
                positions: BTreeMap::new(),
                cooldowns: HashMap::new(),
                trades: VecDeque::new(),
                params,
                paused: false,
            }),
        }
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn compare_and_set_position(
        &self,
        market: &str,
        expected: Option<PositionStatus>,
        new: Option<&Position>,
    ) -> Result<bool> {
        validate_transition(market, expected, new)?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let current = state.positions.get(market).map(|p| p.status);
        if current != expected {
            debug!(market, ?expected, ?current, "CAS comparison failed");
            return Ok(false);
        }

        match new {
            Some(position) => {
                if expected.is_none()
                    && (state.cooling(market, now)
                        || state.positions.len() >= self.settings.max_open_positions)
                {
                    return Ok(false);
                }
                state.positions.insert(market.to_string(), position.clone());
            }
            None => {
                state.positions.remove(market);
            }
        }
        Ok(true)
    }

    async fn release_with_cooldown(
        &self,
        market: &str,
        expected: PositionStatus,
        ttl: Duration,
    ) -> Result<bool> {
        validate_transition(market, Some(expected), None)?;
        let expires_at = self.clock.now() + to_chrono(ttl);
        let mut state = self.state.lock().await;

        if state.positions.get(market).map(|p| p.status) != Some(expected) {
            return Ok(false);
        }
        state.positions.remove(market);
        state.cooldowns.insert(market.to_string(), expires_at);
        Ok(true)
    }

    async fn position(&self, market: &str) -> Result<Option<Position>> {
        Ok(self.state.lock().await.positions.get(market).cloned())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().await.positions.values().cloned().collect())
    }

    async fn clear_all_positions(&self) -> Result<Vec<Position>> {
        let mut state = self.state.lock().await;
        let cleared = std::mem::take(&mut state.positions);
        Ok(cleared.into_values().collect())
    }

    async fn set_cooldown(&self, market: &str, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.positions.contains_key(market) {
            return Err(Error::Other(format!(
                "cannot cool down '{market}' while it holds a position"
            )));
        }
        state.cooldowns.retain(|_, expires| *expires > now);
        state
            .cooldowns
            .insert(market.to_string(), now + to_chrono(ttl));
        Ok(())
    }

    async fn is_cooling_down(&self, market: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.state.lock().await.cooling(market, now))
    }

    async fn active_cooldowns(&self) -> Result<Vec<CooldownMark>> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let mut marks: Vec<CooldownMark> = state
            .cooldowns
            .iter()
            .filter(|(_, expires)| **expires > now)
            .map(|(market, expires)| CooldownMark {
                market: market.clone(),
                expires_at: *expires,
            })
            .collect();
        marks.sort_by(|a, b| a.market.cmp(&b.market));
        Ok(marks)
    }

    async fn append_closed_trade(&self, trade: &ClosedTrade) -> Result<()> {
        let mut state = self.state.lock().await;
        state.trades.push_back(trade.clone());
        while state.trades.len() > self.settings.closed_trade_capacity {
            state.trades.pop_front();
        }
        Ok(())
    }

    async fn closed_trades(&self, limit: usize) -> Result<Vec<ClosedTrade>> {
        let state = self.state.lock().await;
        let skip = state.trades.len().saturating_sub(limit);
        Ok(state.trades.iter().skip(skip).cloned().collect())
    }

    async fn parameters(&self) -> Result<StrategyParameters> {
        Ok(self.state.lock().await.params)
    }

    async fn set_parameters(&self, params: &StrategyParameters) -> Result<StrategyParameters> {
        let clamped = params.clamped(&self.settings.bounds);
        self.state.lock().await.params = clamped;
        Ok(clamped)
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.state.lock().await.paused)
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        self.state.lock().await.paused = paused;
        Ok(())
    }
}
