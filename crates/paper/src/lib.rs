//! Paper trading venue.
//!
//! `PaperClient` wraps any `MarketData` source and simulates market order
//! fills at a fresh quote. `SimulatedMarket` is a scripted data source and
//! `FlakyStore` a fault-injecting store wrapper, both for simulations and tests.

mod flaky;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::{
    Candle, Error, ExecutionGateway, Fill, MarketData, MarketTicker, Order, OrderSide, OrderSize,
    Result,
};

pub use flaky::{FlakyStore, StoreFault};

/// Orders and fills remembered for deduplication and inspection.
const DEFAULT_HISTORY: usize = 1_000;

/// A scripted failure for the next order(s).
#[derive(Debug, Clone, PartialEq)]
pub enum OrderFault {
    /// The venue refuses the order.
    Reject(String),
    /// The venue answers without a fill report.
    Unconfirmed,
    /// The request never completes; callers see their own timeout.
    Hang,
}

#[derive(Debug, Default)]
struct FaultPlan {
    fault: Option<OrderFault>,
    /// `None` keeps the fault until cleared.
    remaining: Option<usize>,
}

impl FaultPlan {
    fn take(&mut self) -> Option<OrderFault> {
        let fault = self.fault.clone()?;
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
            if *n == 0 {
                self.fault = None;
                self.remaining = None;
            }
        }
        Some(fault)
    }
}

#[derive(Debug, Default)]
struct Ledger {
    /// Base currency held per market.
    holdings: HashMap<String, f64>,
    /// Fills by client order id, so a resubmitted order is not executed twice.
    fills: HashMap<String, Fill>,
    /// Fill ids oldest first, for eviction.
    fill_order: VecDeque<String>,
    /// Recent submissions, including duplicates and faulted ones.
    submitted: VecDeque<Order>,
}

impl Ledger {
    fn record_submission(&mut self, order: &Order, cap: usize) {
        self.submitted.push_back(order.clone());
        while self.submitted.len() > cap {
            self.submitted.pop_front();
        }
    }

    fn record_fill(&mut self, fill: &Fill, cap: usize) {
        self.fills.insert(fill.order_id.clone(), fill.clone());
        self.fill_order.push_back(fill.order_id.clone());
        while self.fill_order.len() > cap {
            if let Some(old) = self.fill_order.pop_front() {
                self.fills.remove(&old);
            }
        }
    }
}

/// Simulated execution against a real or scripted market data source.
///
/// Every fill is priced at a quote fetched for that order, with
/// `slippage_bps` applied against the trader. Without a quote the order is
/// rejected and nothing is traded.
pub struct PaperClient {
    upstream: Arc<dyn MarketData>,
    slippage_bps: f64,
    history: usize,
    ledger: Mutex<Ledger>,
    faults: Mutex<FaultPlan>,
}

impl PaperClient {
    pub fn new(upstream: Arc<dyn MarketData>, slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperClient initialized");
        Self {
            upstream,
            slippage_bps,
            history: DEFAULT_HISTORY,
            ledger: Mutex::new(Ledger::default()),
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Keep at most `history` submitted orders and fills.
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history.max(1);
        self
    }

    /// Fail the next `times` orders (every order when `None`) with `fault`.
    pub async fn inject_fault(&self, fault: OrderFault, times: Option<usize>) {
        let mut plan = self.faults.lock().await;
        if times == Some(0) {
            *plan = FaultPlan::default();
            return;
        }
        *plan = FaultPlan {
            fault: Some(fault),
            remaining: times,
        };
    }

    pub async fn clear_faults(&self) {
        *self.faults.lock().await = FaultPlan::default();
    }

    /// Base currency currently held in `market`.
    pub async fn holding(&self, market: &str) -> f64 {
        self.ledger
            .lock()
            .await
            .holdings
            .get(market)
            .copied()
            .unwrap_or(0.0)
    }

    /// Recent submitted orders, in submission order.
    pub async fn submitted_orders(&self) -> Vec<Order> {
        self.ledger.lock().await.submitted.iter().cloned().collect()
    }

    fn slipped(&self, mid: f64, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

#[async_trait]
impl MarketData for PaperClient {
    async fn markets(&self) -> Result<Vec<MarketTicker>> {
        self.upstream.markets().await
    }

    async fn candles(&self, market: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.upstream.candles(market, interval, limit).await
    }

    async fn price(&self, market: &str) -> Result<f64> {
        self.upstream.price(market).await
    }
}

#[async_trait]
impl ExecutionGateway for PaperClient {
    async fn place_market_order(&self, order: &Order) -> Result<Fill> {
        self.ledger
            .lock()
            .await
            .record_submission(order, self.history);

        let fault = self.faults.lock().await.take();
        match fault {
            Some(OrderFault::Reject(reason)) => {
                warn!(market = %order.market, %reason, "Paper order rejected");
                return Err(Error::OrderRejected { reason });
            }
            Some(OrderFault::Unconfirmed) => {
                return Err(Error::OrderUnconfirmed(format!(
                    "no fill report for order {}",
                    order.id
                )));
            }
            Some(OrderFault::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        // One guard from the duplicate check to the fill insert.
        let mut ledger = self.ledger.lock().await;
        if let Some(fill) = ledger.fills.get(&order.id) {
            debug!(order_id = %order.id, "Duplicate client order id, returning original fill");
            return Ok(fill.clone());
        }

        let mid = match self.upstream.price(&order.market).await {
            Ok(price) if price > 0.0 => price,
            Ok(price) => {
                return Err(Error::OrderRejected {
                    reason: format!("no usable price for {}: {price}", order.market),
                })
            }
            Err(e) => {
                return Err(Error::OrderRejected {
                    reason: format!("no quote for {}: {e}", order.market),
                })
            }
        };
        let fill_price = self.slipped(mid, order.side);

        let held = ledger.holdings.get(&order.market).copied().unwrap_or(0.0);
        let (base_amount, quote_amount) = match order.size {
            OrderSize::Quote(quote) => (quote / fill_price, quote),
            OrderSize::Base(base) => (base, base * fill_price),
        };
        if base_amount <= 0.0 {
            return Err(Error::OrderRejected {
                reason: "order size must be positive".to_string(),
            });
        }

        let new_holding = match order.side {
            OrderSide::Buy => held + base_amount,
            OrderSide::Sell => {
                if base_amount > held + 1e-12 {
                    return Err(Error::OrderRejected {
                        reason: format!(
                            "insufficient balance: selling {base_amount} {} but holding {held}",
                            order.market
                        ),
                    });
                }
                (held - base_amount).max(0.0)
            }
        };
        ledger.holdings.insert(order.market.clone(), new_holding);

        let fill = Fill {
            order_id: order.id.clone(),
            market: order.market.clone(),
            side: order.side,
            avg_price: fill_price,
            base_amount,
            quote_amount,
            timestamp: Utc::now(),
        };
        ledger.record_fill(&fill, self.history);

        debug!(
            market = %order.market,
            side = %order.side,
            mid,
            fill = fill_price,
            base_amount,
            "Paper fill simulated"
        );
        Ok(fill)
    }
}

#[derive(Debug, Default)]
struct SimState {
    tickers: Vec<MarketTicker>,
    candles: HashMap<String, Vec<Candle>>,
    prices: HashMap<String, VecDeque<f64>>,
    unavailable: HashSet<String>,
}

/// Scripted market data.
///
/// Each `price` call consumes the next scripted price for the market; the
/// last one repeats forever.
#[derive(Debug, Default)]
pub struct SimulatedMarket {
    state: Mutex<SimState>,
}

impl SimulatedMarket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the 24h ticker for `ticker.market`.
    pub async fn set_ticker(&self, ticker: MarketTicker) {
        let mut state = self.state.lock().await;
        match state.tickers.iter_mut().find(|t| t.market == ticker.market) {
            Some(existing) => *existing = ticker,
            None => state.tickers.push(ticker),
        }
    }

    pub async fn set_candles(&self, market: &str, candles: Vec<Candle>) {
        self.state
            .lock()
            .await
            .candles
            .insert(market.to_string(), candles);
    }

    pub async fn set_price(&self, market: &str, price: f64) {
        self.script_prices(market, vec![price]).await;
    }

    pub async fn script_prices(&self, market: &str, prices: Vec<f64>) {
        self.state
            .lock()
            .await
            .prices
            .insert(market.to_string(), prices.into());
    }

    /// Make every per-market call for `market` fail while `down` is set.
    pub async fn set_unavailable(&self, market: &str, down: bool) {
        let mut state = self.state.lock().await;
        if down {
            state.unavailable.insert(market.to_string());
        } else {
            state.unavailable.remove(market);
        }
    }
}

#[async_trait]
impl MarketData for SimulatedMarket {
    async fn markets(&self) -> Result<Vec<MarketTicker>> {
        Ok(self.state.lock().await.tickers.clone())
    }

    async fn candles(&self, market: &str, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let state = self.state.lock().await;
        if state.unavailable.contains(market) {
            return Err(Error::Unavailable(format!("{market} candles")));
        }
        let candles = state
            .candles
            .get(market)
            .ok_or_else(|| Error::Unavailable(format!("no candles for {market}")))?;
        let skip = candles.len().saturating_sub(limit);
        Ok(candles[skip..].to_vec())
    }

    async fn price(&self, market: &str) -> Result<f64> {
        let mut state = self.state.lock().await;
        if state.unavailable.contains(market) {
            return Err(Error::Unavailable(format!("{market} price")));
        }
        let script = state
            .prices
            .get_mut(market)
            .ok_or_else(|| Error::Unavailable(format!("no price for {market}")))?;
        let price = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        price.ok_or_else(|| Error::Unavailable(format!("no price for {market}")))
    }
}
