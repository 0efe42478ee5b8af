use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use common::{
    with_retry, with_timeout, Clock, ExecutionGateway, MarketData, Order, OrderSide, OrderSize,
    Position, PositionStatus, PositionStore, Result, SchedulerState, SystemClock, TradeEvent,
};
use risk::{ExitConfig, ExitMonitor, MonitorExit};
use strategy::{ParameterTuner, Scanner, ScoreResult};

use crate::config::SchedulerConfig;

/// What one scheduler tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Paused,
    AtCapacity,
    NoCandidate,
    /// Another writer won the slot, or the market is cooling down.
    ClaimLost { market: String },
    Entered { market: String },
    EntryFailed { market: String, ambiguous: bool },
    /// The buy filled but no OPEN position tracks the coins.
    Unmanaged { market: String },
}

/// A store write still owed after it failed during a tick.
#[derive(Debug, Clone)]
enum PendingWrite {
    /// Clear a failed entry and start its cooldown.
    Release,
    /// Promote a filled entry to this OPEN position.
    Open(Position),
}

/// Everything the scheduler talks to.
pub struct SchedulerDeps {
    pub scanner: Arc<Scanner>,
    pub market: Arc<dyn MarketData>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub store: Arc<dyn PositionStore>,
    pub tuner: Arc<ParameterTuner>,
    pub events: mpsc::Sender<TradeEvent>,
}

/// Cloneable handle passed to the control surface and the binary.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Arc<RwLock<SchedulerState>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Stop the run loop. Monitors are aborted on the way out.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Drives entries: one scan and at most one entry attempt per tick.
///
/// Owns the exit monitor tasks it spawns; dropping the scheduler aborts them.
pub struct Scheduler {
    config: SchedulerConfig,
    exit_config: ExitConfig,
    deps: SchedulerDeps,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<SchedulerState>>,
    shutdown_rx: watch::Receiver<bool>,
    monitors: HashMap<String, JoinHandle<MonitorExit>>,
    pending: HashMap<String, PendingWrite>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        exit_config: ExitConfig,
        deps: SchedulerDeps,
    ) -> (Self, SchedulerHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(SchedulerState::Idle));

        let handle = SchedulerHandle {
            state: state.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
        };

        let scheduler = Scheduler {
            config,
            exit_config,
            deps,
            clock: Arc::new(SystemClock),
            state,
            shutdown_rx,
            monitors: HashMap::new(),
            pending: HashMap::new(),
        };

        (scheduler, handle)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Markets with a live monitor task.
    pub fn monitored(&self) -> Vec<String> {
        let mut markets: Vec<String> = self
            .monitors
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(m, _)| m.clone())
            .collect();
        markets.sort();
        markets
    }

    /// Run until shutdown. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            tick_ms = self.config.tick_interval_ms,
            quote_amount = self.config.quote_amount,
            max_open = self.config.max_open_positions,
            "Scheduler running"
        );

        if let Err(e) = self.recover().await {
            error!(error = %e, "Startup recovery failed, continuing");
        }

        let mut failures: u32 = 0;
        loop {
            let delay = backoff_delay(
                self.config.tick_interval(),
                failures,
                self.config.max_backoff(),
            );
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.tick().await {
                Ok(outcome) => {
                    if failures > 0 {
                        info!("Store reachable again, leaving backoff");
                    }
                    failures = 0;
                    self.set_state(SchedulerState::Idle).await;
                    debug!(?outcome, "Tick done");
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.set_state(SchedulerState::ErrorBackoff).await;
                    warn!(error = %e, failures, "Tick failed, backing off");
                }
            }
        }

        info!(monitors = self.monitors.len(), "Scheduler stopping, aborting monitors");
        self.abort_monitors();
    }

    /// One pass: reap monitors, settle owed writes, adopt orphans, then scan
    /// and maybe enter.
    #[instrument(skip_all)]
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.reap_monitors().await;
        self.settle_pending().await?;

        let store = self.deps.store.clone();
        let positions = store.positions().await?;
        self.adopt_orphans(&positions);

        if store.is_paused().await? {
            return Ok(TickOutcome::Paused);
        }
        if positions.len() >= self.config.max_open_positions {
            return Ok(TickOutcome::AtCapacity);
        }

        let mut excluded: HashSet<String> = positions.iter().map(|p| p.market.clone()).collect();
        excluded.extend(store.active_cooldowns().await?.into_iter().map(|c| c.market));
        let params = store.parameters().await?;

        let Some(candidate) = self.deps.scanner.select_candidate(&excluded, &params).await? else {
            return Ok(TickOutcome::NoCandidate);
        };
        self.attempt_entry(&candidate).await
    }

    /// Claim the slot for `candidate.market`, buy, and hand the position to a
    /// monitor. Any failure after the claim releases it with a cooldown. A
    /// position write that keeps failing is owed and retried on later ticks.
    #[instrument(skip_all, fields(market = %candidate.market, score = candidate.score))]
    pub async fn attempt_entry(&mut self, candidate: &ScoreResult) -> Result<TickOutcome> {
        let market = candidate.market.clone();
        let store = self.deps.store.clone();

        let claim = Position::entering(
            market.clone(),
            self.config.quote_amount,
            candidate.reason(),
            self.clock.now(),
        );
        if !store
            .compare_and_set_position(&market, None, Some(&claim))
            .await?
        {
            info!("Slot already taken or market cooling down");
            return Ok(TickOutcome::ClaimLost { market });
        }

        self.set_state(SchedulerState::AwaitingFill).await;
        let order = Order::market(
            market.clone(),
            OrderSide::Buy,
            OrderSize::Quote(self.config.quote_amount),
        );
        info!(client_order_id = %order.id, quote = self.config.quote_amount, reason = %claim.entry_reason, "Placing entry order");

        let result = with_timeout(
            "buy order",
            self.config.order_timeout(),
            self.deps.gateway.place_market_order(&order),
        )
        .await;
        self.set_state(SchedulerState::Idle).await;

        let attempts = self.config.store_retry_attempts;
        let backoff = |n| self.config.store_retry_backoff(n);

        match result {
            Ok(fill) => {
                let open = claim.opened(&fill);
                let promoted = with_retry("open position", attempts, backoff, || {
                    store.compare_and_set_position(
                        &market,
                        Some(PositionStatus::Entering),
                        Some(&open),
                    )
                })
                .await;

                match promoted {
                    Ok(true) => {
                        info!(price = open.entry_price, qty = open.quantity, "Position opened");
                        self.emit(TradeEvent::Entered {
                            market: market.clone(),
                            price: open.entry_price,
                            reason: open.entry_reason.clone(),
                        })
                        .await;
                        self.spawn_monitor(open);
                        Ok(TickOutcome::Entered { market })
                    }
                    Ok(false) => {
                        error!(
                            qty = fill.base_amount,
                            "Entry filled but the position was reset in flight; holdings are unmanaged"
                        );
                        self.emit(TradeEvent::UnmanagedFill {
                            market: market.clone(),
                            quantity: open.quantity,
                            price: open.entry_price,
                            detail: "position reset while the entry order was in flight".into(),
                        })
                        .await;
                        Ok(TickOutcome::Unmanaged { market })
                    }
                    Err(e) => {
                        error!(error = %e, "Entry filled but the OPEN write failed, retrying every tick");
                        self.emit(TradeEvent::UnmanagedFill {
                            market: market.clone(),
                            quantity: open.quantity,
                            price: open.entry_price,
                            detail: format!("recording the position failed ({e}), retrying"),
                        })
                        .await;
                        self.pending.insert(market, PendingWrite::Open(open));
                        Err(e)
                    }
                }
            }
            Err(e) => {
                let ambiguous = e.is_ambiguous();
                warn!(error = %e, ambiguous, "Entry failed, releasing slot with cooldown");
                let cooldown = self.config.cooldown();
                let released = with_retry("release entry", attempts, backoff, || {
                    store.release_with_cooldown(&market, PositionStatus::Entering, cooldown)
                })
                .await;

                self.emit(TradeEvent::EntryFailed {
                    market: market.clone(),
                    error: e.to_string(),
                    ambiguous,
                })
                .await;

                if let Err(store_err) = released {
                    error!(error = %store_err, "Failed entry not released, retrying every tick");
                    self.pending.insert(market, PendingWrite::Release);
                    return Err(store_err);
                }
                Ok(TickOutcome::EntryFailed { market, ambiguous })
            }
        }
    }

    /// Retry writes owed from earlier ticks, so a stranded ENTERING slot is
    /// released or promoted before anything else happens.
    async fn settle_pending(&mut self) -> Result<()> {
        let store = self.deps.store.clone();
        let mut last_error = None;

        for (market, write) in std::mem::take(&mut self.pending) {
            let result = match &write {
                PendingWrite::Release => {
                    store
                        .release_with_cooldown(
                            &market,
                            PositionStatus::Entering,
                            self.config.cooldown(),
                        )
                        .await
                }
                PendingWrite::Open(open) => {
                    store
                        .compare_and_set_position(
                            &market,
                            Some(PositionStatus::Entering),
                            Some(open),
                        )
                        .await
                }
            };

            match (result, write) {
                (Ok(true), PendingWrite::Release) => {
                    info!(market = %market, "Stranded entry released with cooldown")
                }
                (Ok(false), PendingWrite::Release) => {
                    debug!(market = %market, "Stranded entry already gone")
                }
                (Ok(true), PendingWrite::Open(open)) => {
                    info!(market = %market, price = open.entry_price, "Stranded fill recorded, position opened");
                    self.emit(TradeEvent::Entered {
                        market: market.clone(),
                        price: open.entry_price,
                        reason: open.entry_reason.clone(),
                    })
                    .await;
                    self.spawn_monitor(open);
                }
                (Ok(false), PendingWrite::Open(open)) => {
                    error!(market = %market, qty = open.quantity, "Position reset before the fill was recorded; holdings are unmanaged");
                    self.emit(TradeEvent::UnmanagedFill {
                        market: market.clone(),
                        quantity: open.quantity,
                        price: open.entry_price,
                        detail: "position reset before the fill could be recorded".into(),
                    })
                    .await;
                }
                (Err(e), write) => {
                    warn!(market = %market, error = %e, "Owed store write still failing");
                    self.pending.insert(market, write);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reconcile positions left behind by a previous process.
    ///
    /// OPEN positions get a fresh monitor. ENTERING ones have an unknown fill
    /// and are released with a cooldown. EXITING ones are reported for
    /// operator reset.
    pub async fn recover(&mut self) -> Result<()> {
        let store = self.deps.store.clone();
        for position in store.positions().await? {
            match position.status {
                PositionStatus::Open => {
                    info!(market = %position.market, "Adopting open position");
                    self.spawn_monitor(position);
                }
                PositionStatus::Entering => {
                    warn!(market = %position.market, "Clearing stale ENTERING position");
                    if store
                        .release_with_cooldown(
                            &position.market,
                            PositionStatus::Entering,
                            self.config.cooldown(),
                        )
                        .await?
                    {
                        self.emit(TradeEvent::StaleEntryCleared {
                            market: position.market.clone(),
                        })
                        .await;
                    }
                }
                PositionStatus::Exiting => {
                    warn!(market = %position.market, "Found EXITING position at startup");
                    self.emit(TradeEvent::ExitStuck {
                        market: position.market.clone(),
                        attempts: 0,
                        error: "position was EXITING when the process started".into(),
                    })
                    .await;
                }
            }
        }
        Ok(())
    }

    fn spawn_monitor(&mut self, position: Position) {
        let market = position.market.clone();
        let monitor = ExitMonitor::new(
            position,
            self.exit_config.clone(),
            self.deps.market.clone(),
            self.deps.gateway.clone(),
            self.deps.store.clone(),
            self.deps.tuner.clone(),
            self.deps.events.clone(),
        );
        if let Some(previous) = self.monitors.insert(market, tokio::spawn(monitor.run())) {
            previous.abort();
        }
    }

    /// Collect finished monitors and log how they ended.
    async fn reap_monitors(&mut self) {
        let finished: Vec<String> = self
            .monitors
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(m, _)| m.clone())
            .collect();

        for market in finished {
            let Some(handle) = self.monitors.remove(&market) else {
                continue;
            };
            match handle.await {
                Ok(MonitorExit::Closed(trade)) => {
                    info!(market = %market, change_pct = trade.change_pct, outcome = %trade.outcome, "Monitor finished")
                }
                Ok(MonitorExit::Stuck { attempts }) => {
                    warn!(market = %market, attempts, "Monitor gave up on exit")
                }
                Ok(MonitorExit::Released) => info!(market = %market, "Monitor released"),
                Err(e) => error!(market = %market, error = %e, "Monitor task failed"),
            }
        }
    }

    /// OPEN positions without a live monitor get one.
    fn adopt_orphans(&mut self, positions: &[Position]) {
        for position in positions {
            if position.status != PositionStatus::Open {
                continue;
            }
            let live = self
                .monitors
                .get(&position.market)
                .map(|h| !h.is_finished())
                .unwrap_or(false);
            if !live {
                warn!(market = %position.market, "Open position without monitor, adopting");
                self.spawn_monitor(position.clone());
            }
        }
    }

    fn abort_monitors(&mut self) {
        for (_, handle) in self.monitors.drain() {
            handle.abort();
        }
    }

    async fn set_state(&self, state: SchedulerState) {
        *self.state.write().await = state;
    }

    async fn emit(&self, event: TradeEvent) {
        if self.deps.events.send(event).await.is_err() {
            debug!("Event channel closed");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.abort_monitors();
    }
}

/// Tick delay after `failures` consecutive failed ticks: the tick interval
/// doubled per failure, capped at `max`.
pub fn backoff_delay(tick: Duration, failures: u32, max: Duration) -> Duration {
    if failures == 0 {
        return tick;
    }
    let factor = 1u32 << failures.min(16);
    tick.saturating_mul(factor).min(max.max(tick))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use common::{Candle, MarketTicker, StrategyParameters};
    use paper::{FlakyStore, OrderFault, PaperClient, SimulatedMarket, StoreFault};
    use store::{MemoryStore, StoreSettings};
    use strategy::{ScannerConfig, SignalRegistry};

    const HOT: &str = "DOGE-EUR";

    fn hot_window() -> Vec<Candle> {
        (0..30)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.1;
                Candle {
                    open: close - 0.1,
                    high: close + 0.05,
                    low: close - 0.05,
                    close,
                    volume: if i >= 27 { 30.0 } else { 10.0 },
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap(),
                }
            })
            .collect()
    }

    struct Harness {
        market: Arc<SimulatedMarket>,
        paper: Arc<PaperClient>,
        store: Arc<MemoryStore>,
        events: mpsc::Receiver<TradeEvent>,
        tx: mpsc::Sender<TradeEvent>,
    }

    impl Harness {
        async fn new() -> Self {
            let market = Arc::new(SimulatedMarket::new());
            market
                .set_ticker(MarketTicker {
                    market: HOT.into(),
                    last_price: 102.9,
                    quote_volume: 50_000.0,
                    price_change_pct: 3.0,
                })
                .await;
            market.set_candles(HOT, hot_window()).await;
            market.set_price(HOT, 100.0).await;

            let paper = Arc::new(PaperClient::new(market.clone(), 0.0));
            let store = Arc::new(MemoryStore::new(StoreSettings::default()));
            let (tx, events) = mpsc::channel(32);
            Self {
                market,
                paper,
                store,
                events,
                tx,
            }
        }

        fn scheduler(&self) -> (Scheduler, SchedulerHandle) {
            self.scheduler_with(self.store.clone(), self.paper.clone())
        }

        fn scheduler_with(
            &self,
            store: Arc<dyn PositionStore>,
            gateway: Arc<dyn ExecutionGateway>,
        ) -> (Scheduler, SchedulerHandle) {
            let scanner_config = ScannerConfig::default();
            let registry = SignalRegistry::from_config(&scanner_config).unwrap();
            let scanner = Arc::new(Scanner::new(scanner_config, registry, self.paper.clone()));
            let tuner = Arc::new(ParameterTuner::new(store.clone(), Default::default()));
            let deps = SchedulerDeps {
                scanner,
                market: self.paper.clone(),
                gateway,
                store,
                tuner,
                events: self.tx.clone(),
            };
            let config = SchedulerConfig {
                tick_interval_ms: 10,
                order_timeout_ms: 50,
                store_retry_backoff_ms: 1,
                ..SchedulerConfig::default()
            };
            let exit = ExitConfig {
                poll_interval_ms: 5,
                ..ExitConfig::default()
            };
            Scheduler::new(config, exit, deps)
        }
    }

    #[tokio::test]
    async fn entry_opens_position_and_starts_monitor() {
        let mut h = Harness::new().await;
        let (mut scheduler, _handle) = h.scheduler();

        let outcome = scheduler.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Entered { market: HOT.into() });

        let position = h.store.position(HOT).await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.entry_price, 100.0);
        assert!(position.entry_reason.contains("volume_spike"));
        assert_eq!(scheduler.monitored(), vec![HOT.to_string()]);

        match h.events.recv().await {
            Some(TradeEvent::Entered { market, price, .. }) => {
                assert_eq!(market, HOT);
                assert_eq!(price, 100.0);
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::AtCapacity);
    }

    #[tokio::test]
    async fn rejected_entry_releases_with_cooldown() {
        let mut h = Harness::new().await;
        h.paper
            .inject_fault(OrderFault::Reject("insufficient balance".into()), Some(1))
            .await;
        let (mut scheduler, _handle) = h.scheduler();

        let outcome = scheduler.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::EntryFailed {
                market: HOT.into(),
                ambiguous: false
            }
        );
        assert!(h.store.position(HOT).await.unwrap().is_none());
        assert!(h.store.is_cooling_down(HOT).await.unwrap());
        assert!(matches!(
            h.events.recv().await,
            Some(TradeEvent::EntryFailed { ambiguous: false, .. })
        ));

        // The only hot market is excluded while it cools down.
        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::NoCandidate);
    }

    #[tokio::test]
    async fn ambiguous_entry_replay_never_opens_twice() {
        let h = Harness::new().await;
        h.paper.inject_fault(OrderFault::Hang, Some(1)).await;
        let (mut scheduler, _handle) = h.scheduler();

        let outcome = scheduler.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::EntryFailed {
                market: HOT.into(),
                ambiguous: true
            }
        );

        let candidate = ScoreResult {
            market: HOT.into(),
            score: 5,
            signals: Vec::new(),
        };
        for _ in 0..2 {
            let replay = scheduler.attempt_entry(&candidate).await.unwrap();
            assert_eq!(replay, TickOutcome::ClaimLost { market: HOT.into() });
        }
        assert!(h.store.positions().await.unwrap().is_empty());
        let buys = h
            .paper
            .submitted_orders()
            .await
            .into_iter()
            .filter(|o| o.side == OrderSide::Buy)
            .count();
        assert_eq!(buys, 1);
    }

    /// Clears every position just before the buy goes out, like an operator
    /// reset landing while the order is in flight.
    struct ResetBeforeFill {
        store: Arc<dyn PositionStore>,
        inner: Arc<PaperClient>,
    }

    #[async_trait::async_trait]
    impl ExecutionGateway for ResetBeforeFill {
        async fn place_market_order(&self, order: &Order) -> Result<common::Fill> {
            self.store.clear_all_positions().await?;
            self.inner.place_market_order(order).await
        }
    }

    #[tokio::test]
    async fn failed_release_is_retried_on_the_next_tick() {
        let mut h = Harness::new().await;
        h.paper
            .inject_fault(OrderFault::Reject("insufficient balance".into()), Some(1))
            .await;
        let flaky = Arc::new(FlakyStore::new(h.store.clone()));
        let attempts = SchedulerConfig::default().store_retry_attempts as usize;
        flaky.fail_next(StoreFault::ReleaseWithCooldown, attempts).await;
        let (mut scheduler, _handle) = h.scheduler_with(flaky.clone(), h.paper.clone());

        assert!(scheduler.tick().await.is_err());
        assert_eq!(
            h.store.position(HOT).await.unwrap().map(|p| p.status),
            Some(PositionStatus::Entering)
        );
        assert!(matches!(
            h.events.recv().await,
            Some(TradeEvent::EntryFailed { ambiguous: false, .. })
        ));

        // The owed release goes through first, then the market cools down.
        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::NoCandidate);
        assert!(h.store.positions().await.unwrap().is_empty());
        assert!(h.store.is_cooling_down(HOT).await.unwrap());
    }

    #[tokio::test]
    async fn failed_open_write_is_promoted_on_the_next_tick() {
        let mut h = Harness::new().await;
        let flaky = Arc::new(FlakyStore::new(h.store.clone()));
        let attempts = SchedulerConfig::default().store_retry_attempts as usize;
        flaky
            .fail_next(
                StoreFault::CompareAndSet(Some(PositionStatus::Entering)),
                attempts,
            )
            .await;
        let (mut scheduler, _handle) = h.scheduler_with(flaky.clone(), h.paper.clone());

        assert!(scheduler.tick().await.is_err());
        assert_eq!(
            h.store.position(HOT).await.unwrap().map(|p| p.status),
            Some(PositionStatus::Entering)
        );
        assert!(scheduler.monitored().is_empty());
        match h.events.recv().await {
            Some(TradeEvent::UnmanagedFill { market, detail, .. }) => {
                assert_eq!(market, HOT);
                assert!(detail.contains("retrying"), "{detail}");
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::AtCapacity);
        let position = h.store.position(HOT).await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(scheduler.monitored(), vec![HOT.to_string()]);
        assert!(matches!(
            h.events.recv().await,
            Some(TradeEvent::Entered { market, .. }) if market == HOT
        ));

        // Only one buy went out across both ticks.
        let buys = h
            .paper
            .submitted_orders()
            .await
            .into_iter()
            .filter(|o| o.side == OrderSide::Buy)
            .count();
        assert_eq!(buys, 1);
    }

    #[tokio::test]
    async fn reset_during_the_buy_reports_unmanaged_holdings() {
        let mut h = Harness::new().await;
        let gateway = Arc::new(ResetBeforeFill {
            store: h.store.clone(),
            inner: h.paper.clone(),
        });
        let (mut scheduler, _handle) = h.scheduler_with(h.store.clone(), gateway);

        assert_eq!(
            scheduler.tick().await.unwrap(),
            TickOutcome::Unmanaged { market: HOT.into() }
        );
        assert!(h.store.positions().await.unwrap().is_empty());
        assert!(scheduler.monitored().is_empty());
        assert_eq!(h.paper.holding(HOT).await, 0.25);
        match h.events.recv().await {
            Some(TradeEvent::UnmanagedFill {
                market, quantity, ..
            }) => {
                assert_eq!(market, HOT);
                assert_eq!(quantity, 0.25);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn pause_is_honoured_at_the_top_of_the_tick() {
        let h = Harness::new().await;
        h.store.set_paused(true).await.unwrap();
        let (mut scheduler, _handle) = h.scheduler();

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Paused);
        assert!(h.paper.submitted_orders().await.is_empty());

        h.store.set_paused(false).await.unwrap();
        assert!(matches!(
            scheduler.tick().await.unwrap(),
            TickOutcome::Entered { .. }
        ));
    }

    #[tokio::test]
    async fn two_schedulers_race_for_one_slot() {
        let h = Harness::new().await;
        let (mut a, _) = h.scheduler();
        let (mut b, _) = h.scheduler();

        let (ra, rb) = tokio::join!(a.tick(), b.tick());
        let outcomes = [ra.unwrap(), rb.unwrap()];
        let entered = outcomes
            .iter()
            .filter(|o| matches!(o, TickOutcome::Entered { .. }))
            .count();
        assert_eq!(entered, 1, "outcomes: {outcomes:?}");
        assert_eq!(h.store.positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_adopts_open_and_clears_entering() {
        let mut h = Harness::new().await;
        let settings = StoreSettings {
            max_open_positions: 3,
            ..StoreSettings::default()
        };
        h.store = Arc::new(MemoryStore::new(settings));

        let stale = Position::entering("ADA-EUR", 25.0, "slope", Utc::now());
        h.store
            .compare_and_set_position("ADA-EUR", None, Some(&stale))
            .await
            .unwrap();

        let open = Position::entering(HOT, 25.0, "slope", Utc::now());
        h.store
            .compare_and_set_position(HOT, None, Some(&open))
            .await
            .unwrap();
        let mut opened = open.with_status(PositionStatus::Open);
        opened.entry_price = 100.0;
        opened.quantity = 0.25;
        h.store
            .compare_and_set_position(HOT, Some(PositionStatus::Entering), Some(&opened))
            .await
            .unwrap();

        let (mut scheduler, _handle) = h.scheduler();
        scheduler.recover().await.unwrap();

        assert!(h.store.position("ADA-EUR").await.unwrap().is_none());
        assert!(h.store.is_cooling_down("ADA-EUR").await.unwrap());
        assert_eq!(scheduler.monitored(), vec![HOT.to_string()]);
        assert!(matches!(
            h.events.recv().await,
            Some(TradeEvent::StaleEntryCleared { market }) if market == "ADA-EUR"
        ));
    }

    #[tokio::test]
    async fn run_loop_enters_and_stops_on_shutdown() {
        let mut h = Harness::new().await;
        let (scheduler, handle) = h.scheduler();
        let task = tokio::spawn(scheduler.run());

        let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(TradeEvent::Entered { .. })));
        assert_eq!(handle.state().await, SchedulerState::Idle);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        // The monitor was aborted with the loop: the price moves past
        // take-profit but nothing sells.
        h.market.set_price(HOT, 110.0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            h.store.position(HOT).await.unwrap().map(|p| p.status),
            Some(PositionStatus::Open)
        );
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let tick = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(tick, 0, max), tick);
        assert_eq!(backoff_delay(tick, 1, max), Duration::from_secs(10));
        assert_eq!(backoff_delay(tick, 3, max), Duration::from_secs(40));
        assert_eq!(backoff_delay(tick, 10, max), max);
        assert_eq!(backoff_delay(tick, u32::MAX, max), max);
    }

    #[test]
    fn default_parameters_accept_the_hot_window() {
        let registry = SignalRegistry::from_config(&ScannerConfig::default()).unwrap();
        let scored = registry.score(HOT, &hot_window(), &StrategyParameters::default());
        assert!(scored.score >= StrategyParameters::default().min_score);
    }
}
