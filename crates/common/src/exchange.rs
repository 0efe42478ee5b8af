use async_trait::async_trait;

use crate::{Candle, Fill, MarketTicker, Order, Result};

/// Read side of the venue: listings, candles and last-trade prices.
///
/// Implementations return an error rather than a cached value when fresh data
/// cannot be obtained. Callers skip the affected market or tick.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// 24h tickers for every listed market.
    async fn markets(&self) -> Result<Vec<MarketTicker>>;

    /// The most recent `limit` candles, oldest first.
    async fn candles(&self, market: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Last-trade price.
    async fn price(&self, market: &str) -> Result<f64>;
}

/// Write side of the venue.
///
/// `BitvavoClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Only the scheduler (entries) and exit monitors (exits) place orders, and
/// both claim the corresponding position transition in the `PositionStore`
/// before doing so.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Submit a market order and return the fill confirmation.
    ///
    /// `Err(OrderRejected)` means nothing traded. Ambiguous errors
    /// (see `Error::is_ambiguous`) mean the outcome is unknown.
    async fn place_market_order(&self, order: &Order) -> Result<Fill>;
}
