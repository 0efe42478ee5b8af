use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use common::{
    with_retry, with_timeout, ClosedTrade, ExecutionGateway, ExitReason, Fill, MarketData, Order,
    OrderSide, OrderSize, Position, PositionStatus, PositionStore, TradeEvent,
};
use strategy::ParameterTuner;

use crate::exit::ExitConfig;

/// How a monitor task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorExit {
    /// Sold, logged and released.
    Closed(ClosedTrade),
    /// The sell or the final release kept failing; the position stays EXITING.
    Stuck { attempts: u32 },
    /// The position was removed or replaced by someone else (operator reset).
    Released,
}

/// Watches one OPEN position until an exit rule fires, then sells it.
pub struct ExitMonitor {
    position: Position,
    config: ExitConfig,
    market: Arc<dyn MarketData>,
    gateway: Arc<dyn ExecutionGateway>,
    store: Arc<dyn PositionStore>,
    tuner: Arc<ParameterTuner>,
    events: mpsc::Sender<TradeEvent>,
}

impl ExitMonitor {
    pub fn new(
        position: Position,
        config: ExitConfig,
        market: Arc<dyn MarketData>,
        gateway: Arc<dyn ExecutionGateway>,
        store: Arc<dyn PositionStore>,
        tuner: Arc<ParameterTuner>,
        events: mpsc::Sender<TradeEvent>,
    ) -> Self {
        Self {
            position,
            config,
            market,
            gateway,
            store,
            tuner,
            events,
        }
    }

    #[instrument(skip_all, fields(market = %self.position.market, id = %self.position.id))]
    pub async fn run(self) -> MonitorExit {
        info!(entry = self.position.entry_price, qty = self.position.quantity, "Exit monitor started");

        let mut peak = self.position.entry_price;
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.store.position(&self.position.market).await {
                Ok(Some(p)) if p.id == self.position.id && p.status == PositionStatus::Open => {}
                Ok(_) => {
                    info!("Position no longer open, monitor stopping");
                    return MonitorExit::Released;
                }
                Err(e) => {
                    warn!(error = %e, "Store unavailable, skipping tick");
                    continue;
                }
            }

            let price = match with_timeout(
                "price",
                self.config.price_timeout(),
                self.market.price(&self.position.market),
            )
            .await
            {
                Ok(price) => price,
                Err(e) => {
                    debug!(error = %e, "Price unavailable, skipping tick");
                    continue;
                }
            };
            peak = peak.max(price);

            let Some(reason) = self.config.evaluate(self.position.entry_price, peak, price) else {
                continue;
            };
            info!(
                %reason,
                price,
                peak,
                change_pct = self.position.change_pct(price),
                "Exit triggered"
            );

            let exiting = self.position.with_status(PositionStatus::Exiting);
            match self
                .store
                .compare_and_set_position(
                    &self.position.market,
                    Some(PositionStatus::Open),
                    Some(&exiting),
                )
                .await
            {
                Ok(true) => return self.sell(reason).await,
                Ok(false) => {
                    info!("Position changed underneath the monitor, stopping");
                    return MonitorExit::Released;
                }
                Err(e) => {
                    warn!(error = %e, "Could not mark position EXITING, retrying next tick");
                }
            }
        }
    }

    /// Sell the full quantity, retrying with the same client order id.
    async fn sell(&self, reason: ExitReason) -> MonitorExit {
        let order = Order::market(
            self.position.market.clone(),
            OrderSide::Sell,
            OrderSize::Base(self.position.quantity),
        );
        let max = self.config.sell_max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            let result = with_timeout(
                "sell order",
                self.config.order_timeout(),
                self.gateway.place_market_order(&order),
            )
            .await;

            match result {
                Ok(fill) => return self.finish(reason, fill).await,
                Err(e) => {
                    warn!(
                        attempt,
                        max,
                        order_id = %order.id,
                        ambiguous = e.is_ambiguous(),
                        error = %e,
                        "Exit sell failed"
                    );
                    last_error = e.to_string();
                    if attempt < max {
                        tokio::time::sleep(self.config.sell_backoff(attempt)).await;
                    }
                }
            }
        }

        error!(attempts = max, error = %last_error, "Exit stuck, operator reset required");
        self.emit(TradeEvent::ExitStuck {
            market: self.position.market.clone(),
            attempts: max,
            error: last_error,
        })
        .await;
        MonitorExit::Stuck { attempts: max }
    }

    /// Record the sold trade and free the slot. Store writes are retried
    /// with the sell backoff; a release that never lands is reported stuck.
    async fn finish(&self, reason: ExitReason, fill: Fill) -> MonitorExit {
        let trade = ClosedTrade::from_exit(&self.position, &fill, reason);
        info!(
            exit_price = trade.exit_price,
            change_pct = trade.change_pct,
            outcome = %trade.outcome,
            "Position closed"
        );

        let market = self.position.market.as_str();
        let attempts = self.config.sell_max_attempts;
        let backoff = |n| self.config.sell_backoff(n);

        if let Err(e) = with_retry("record closed trade", attempts, backoff, || {
            self.store.append_closed_trade(&trade)
        })
        .await
        {
            error!(error = %e, "Failed to record closed trade");
        }

        let released = with_retry("release position", attempts, backoff, || {
            self.store
                .compare_and_set_position(market, Some(PositionStatus::Exiting), None)
        })
        .await;

        if let Err(e) = self.tuner.on_trade_closed(&trade).await {
            error!(error = %e, "Parameter tuning failed");
        }
        self.emit(TradeEvent::Exited {
            trade: trade.clone(),
        })
        .await;

        match released {
            Ok(true) => MonitorExit::Closed(trade),
            Ok(false) => {
                warn!("Position was already released");
                MonitorExit::Closed(trade)
            }
            Err(e) => {
                error!(attempts, error = %e, "Sold, but the EXITING position could not be released");
                self.emit(TradeEvent::ExitStuck {
                    market: market.to_string(),
                    attempts,
                    error: format!("sold, but releasing the position failed: {e}"),
                })
                .await;
                MonitorExit::Stuck { attempts }
            }
        }
    }

    async fn emit(&self, event: TradeEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chrono::Utc;
    use common::{ParameterBounds, StrategyParameters, TradeOutcome};
    use paper::{FlakyStore, OrderFault, PaperClient, SimulatedMarket, StoreFault};
    use store::{MemoryStore, StoreSettings};

    const MARKET: &str = "DOGE-EUR";

    struct Harness {
        market: Arc<SimulatedMarket>,
        paper: Arc<PaperClient>,
        store: Arc<MemoryStore>,
        tuner: Arc<ParameterTuner>,
        events: mpsc::Receiver<TradeEvent>,
        tx: mpsc::Sender<TradeEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let market = Arc::new(SimulatedMarket::new());
            let paper = Arc::new(PaperClient::new(market.clone(), 0.0));
            let store = Arc::new(MemoryStore::new(StoreSettings::default()));
            let tuner = Arc::new(ParameterTuner::new(
                store.clone(),
                ParameterBounds::default(),
            ));
            let (tx, events) = mpsc::channel(16);
            Self {
                market,
                paper,
                store,
                tuner,
                events,
                tx,
            }
        }

        /// Buy at 100 through the paper venue and store the OPEN position.
        async fn open_at_100(&self) -> Position {
            self.market.set_price(MARKET, 100.0).await;
            let claim = Position::entering(MARKET, 100.0, "slope + volume_spike", Utc::now());
            assert!(self
                .store
                .compare_and_set_position(MARKET, None, Some(&claim))
                .await
                .unwrap());

            let buy = Order::market(MARKET, OrderSide::Buy, OrderSize::Quote(100.0));
            let fill = self.paper.place_market_order(&buy).await.unwrap();
            let open = claim.opened(&fill);
            assert!(self
                .store
                .compare_and_set_position(MARKET, Some(PositionStatus::Entering), Some(&open))
                .await
                .unwrap());
            open
        }

        fn monitor(&self, position: Position, config: ExitConfig) -> ExitMonitor {
            self.monitor_on(position, config, self.store.clone())
        }

        fn monitor_on(
            &self,
            position: Position,
            config: ExitConfig,
            store: Arc<dyn PositionStore>,
        ) -> ExitMonitor {
            ExitMonitor::new(
                position,
                config,
                self.paper.clone(),
                self.paper.clone(),
                store,
                self.tuner.clone(),
                self.tx.clone(),
            )
        }
    }

    fn fast() -> ExitConfig {
        ExitConfig {
            stop_loss_pct: 0.5,
            take_profit_pct: 1.5,
            poll_interval_ms: 5,
            price_timeout_ms: 100,
            order_timeout_ms: 100,
            sell_max_attempts: 3,
            sell_backoff_ms: 1,
            ..ExitConfig::default()
        }
    }

    async fn run(monitor: ExitMonitor) -> MonitorExit {
        tokio::time::timeout(Duration::from_secs(5), monitor.run())
            .await
            .expect("monitor did not finish")
    }

    #[tokio::test]
    async fn take_profit_exits_at_first_price_over_target() {
        let mut h = Harness::new();
        let position = h.open_at_100().await;
        // The sell is quoted once more before the market moves on.
        h.market
            .script_prices(MARKET, vec![100.5, 101.0, 101.5, 101.5, 101.6])
            .await;

        let exit = run(h.monitor(position, fast())).await;

        let trade = match exit {
            MonitorExit::Closed(trade) => trade,
            other => panic!("expected a closed trade, got {other:?}"),
        };
        assert_eq!(trade.exit_price, 101.5);
        assert!((trade.change_pct - 1.5).abs() < 1e-9);
        assert_eq!(trade.outcome, TradeOutcome::Win);
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);

        assert!(h.store.position(MARKET).await.unwrap().is_none());
        assert_eq!(h.store.closed_trades(10).await.unwrap(), vec![trade.clone()]);

        // A win loosens the entry threshold.
        let params = h.store.parameters().await.unwrap();
        assert_eq!(params.min_score, StrategyParameters::default().min_score - 1);

        match h.events.recv().await {
            Some(TradeEvent::Exited { trade: sent }) => assert_eq!(sent, trade),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_loss_closes_a_loss_and_tightens() {
        let h = Harness::new();
        let position = h.open_at_100().await;
        h.market.script_prices(MARKET, vec![99.8, 99.4]).await;

        let MonitorExit::Closed(trade) = run(h.monitor(position, fast())).await else {
            panic!("expected a closed trade");
        };
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.outcome, TradeOutcome::Loss);
        assert_eq!(
            h.store.parameters().await.unwrap().min_score,
            StrategyParameters::default().min_score + 1
        );
    }

    #[tokio::test]
    async fn unavailable_prices_are_skipped_not_reused() {
        let h = Harness::new();
        let position = h.open_at_100().await;
        h.market.set_unavailable(MARKET, true).await;

        let monitor = tokio::spawn(h.monitor(position, fast()).run());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!monitor.is_finished());

        h.market.set_price(MARKET, 102.0).await;
        h.market.set_unavailable(MARKET, false).await;

        let exit = tokio::time::timeout(Duration::from_secs(5), monitor)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(exit, MonitorExit::Closed(ref t) if t.exit_price == 102.0));
    }

    #[tokio::test]
    async fn failed_sells_leave_position_exiting_and_alert() {
        let mut h = Harness::new();
        let position = h.open_at_100().await;
        h.paper
            .inject_fault(OrderFault::Reject("market halted".into()), None)
            .await;
        h.market.set_price(MARKET, 99.0).await;

        let exit = run(h.monitor(position, fast())).await;
        assert_eq!(exit, MonitorExit::Stuck { attempts: 3 });

        let stored = h.store.position(MARKET).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Exiting);
        assert!(h.store.closed_trades(10).await.unwrap().is_empty());

        let sells: Vec<_> = h
            .paper
            .submitted_orders()
            .await
            .into_iter()
            .filter(|o| o.side == OrderSide::Sell)
            .collect();
        assert_eq!(sells.len(), 3);
        assert!(sells.iter().all(|o| o.id == sells[0].id));

        match h.events.recv().await {
            Some(TradeEvent::ExitStuck { market, attempts, .. }) => {
                assert_eq!(market, MARKET);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn sell_retry_recovers_after_transient_failure() {
        let h = Harness::new();
        let position = h.open_at_100().await;
        h.paper.inject_fault(OrderFault::Hang, Some(1)).await;
        h.market.set_price(MARKET, 101.7).await;

        let MonitorExit::Closed(trade) = run(h.monitor(position, fast())).await else {
            panic!("expected the retry to close the trade");
        };
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert!(h.paper.holding(MARKET).await.abs() < 1e-12);
    }

    #[tokio::test]
    async fn operator_reset_stops_the_monitor() {
        let h = Harness::new();
        let position = h.open_at_100().await;

        let monitor = tokio::spawn(h.monitor(position, fast()).run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.store.clear_all_positions().await.unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), monitor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, MonitorExit::Released);
        assert!(h.paper.submitted_orders().await.iter().all(|o| o.side == OrderSide::Buy));
    }

    #[tokio::test]
    async fn release_is_retried_after_a_store_failure() {
        let mut h = Harness::new();
        let position = h.open_at_100().await;
        h.market.set_price(MARKET, 102.0).await;

        let flaky = Arc::new(FlakyStore::new(h.store.clone()));
        flaky
            .fail_next(StoreFault::CompareAndSet(Some(PositionStatus::Exiting)), 1)
            .await;

        let exit = run(h.monitor_on(position, fast(), flaky)).await;
        assert!(matches!(exit, MonitorExit::Closed(_)), "{exit:?}");
        assert!(h.store.position(MARKET).await.unwrap().is_none());
        assert!(matches!(h.events.recv().await, Some(TradeEvent::Exited { .. })));
    }

    #[tokio::test]
    async fn release_that_keeps_failing_is_reported_stuck() {
        let mut h = Harness::new();
        let position = h.open_at_100().await;
        h.market.set_price(MARKET, 102.0).await;

        let flaky = Arc::new(FlakyStore::new(h.store.clone()));
        flaky
            .fail_next(StoreFault::CompareAndSet(Some(PositionStatus::Exiting)), 10)
            .await;

        let exit = run(h.monitor_on(position, fast(), flaky)).await;
        assert_eq!(exit, MonitorExit::Stuck { attempts: 3 });

        let stored = h.store.position(MARKET).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Exiting);
        // The sale itself happened and is logged.
        assert_eq!(h.store.closed_trades(10).await.unwrap().len(), 1);
        assert!(h.paper.holding(MARKET).await.abs() < 1e-12);

        assert!(matches!(h.events.recv().await, Some(TradeEvent::Exited { .. })));
        match h.events.recv().await {
            Some(TradeEvent::ExitStuck { market, attempts, error }) => {
                assert_eq!(market, MARKET);
                assert_eq!(attempts, 3);
                assert!(error.contains("releasing"), "{error}");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
