use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Sequences are ordered oldest first, most recent last.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// 24h ticker row used to build the scan universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTicker {
    pub market: String,
    pub last_price: f64,
    /// 24h traded volume in quote currency.
    pub quote_volume: f64,
    /// 24h price change in percent.
    pub price_change_pct: f64,
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// How much a market order should trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSize {
    /// Spend this much quote currency (entries).
    Quote(f64),
    /// Trade this much base currency (exits).
    Base(f64),
}

/// A market order to be submitted to the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client order id. Retries of the same logical order reuse it so the
    /// venue can deduplicate.
    pub id: String,
    pub market: String,
    pub side: OrderSide,
    pub size: OrderSize,
}

impl Order {
    pub fn market(market: impl Into<String>, side: OrderSide, size: OrderSize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            market: market.into(),
            side,
            size,
        }
    }
}

/// Confirmation of a filled order returned by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub market: String,
    pub side: OrderSide,
    pub avg_price: f64,
    /// Filled amount in base currency.
    pub base_amount: f64,
    /// Filled amount in quote currency.
    pub quote_amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle of a position. `None` in the store means no position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Entering,
    Open,
    Exiting,
}

impl PositionStatus {
    /// Whether `from -> to` is a legal lifecycle step. `None` is the empty slot.
    ///
    /// ENTERING -> NONE is the entry-abort path; everything else is the linear
    /// NONE -> ENTERING -> OPEN -> EXITING -> NONE cycle.
    pub fn is_valid_transition(from: Option<Self>, to: Option<Self>) -> bool {
        use PositionStatus::*;
        matches!(
            (from, to),
            (None, Some(Entering))
                | (Some(Entering), Some(Open))
                | (Some(Entering), None)
                | (Some(Open), Some(Exiting))
                | (Some(Exiting), None)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Entering => "ENTERING",
            PositionStatus::Open => "OPEN",
            PositionStatus::Exiting => "EXITING",
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PositionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTERING" => Ok(PositionStatus::Entering),
            "OPEN" => Ok(PositionStatus::Open),
            "EXITING" => Ok(PositionStatus::Exiting),
            other => Err(crate::Error::Other(format!("unknown position status '{other}'"))),
        }
    }
}

/// A speculative long position, from claim to exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub market: String,
    pub status: PositionStatus,
    /// Average fill price of the entry. Zero while ENTERING.
    pub entry_price: f64,
    /// Quote currency committed to the entry.
    pub quote_amount: f64,
    /// Base currency held. Zero while ENTERING.
    pub quantity: f64,
    /// Passed signals that triggered the entry, joined with " + ".
    pub entry_reason: String,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// A freshly claimed slot, before any order was placed.
    pub fn entering(
        market: impl Into<String>,
        quote_amount: f64,
        entry_reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            market: market.into(),
            status: PositionStatus::Entering,
            entry_price: 0.0,
            quote_amount,
            quantity: 0.0,
            entry_reason: entry_reason.into(),
            opened_at: now,
        }
    }

    /// The OPEN position resulting from a confirmed entry fill.
    pub fn opened(&self, fill: &Fill) -> Self {
        Self {
            status: PositionStatus::Open,
            entry_price: fill.avg_price,
            quote_amount: fill.quote_amount,
            quantity: fill.base_amount,
            opened_at: fill.timestamp,
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: PositionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Percent change of `price` relative to the entry price.
    pub fn change_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 100.0
    }
}

/// Temporary exclusion of a market after a failed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownMark {
    pub market: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::TakeProfit => write!(f, "take-profit"),
            ExitReason::TrailingStop => write!(f, "trailing-stop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeOutcome {
    Win,
    Loss,
}

impl TradeOutcome {
    pub fn from_change_pct(change_pct: f64) -> Self {
        if change_pct >= 0.0 {
            TradeOutcome::Win
        } else {
            TradeOutcome::Loss
        }
    }
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeOutcome::Win => write!(f, "WIN"),
            TradeOutcome::Loss => write!(f, "LOSS"),
        }
    }
}

/// Entry of the append-only trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub market: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub change_pct: f64,
    pub entry_reason: String,
    pub exit_reason: ExitReason,
    pub outcome: TradeOutcome,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn from_exit(position: &Position, exit: &Fill, exit_reason: ExitReason) -> Self {
        let change_pct = position.change_pct(exit.avg_price);
        Self {
            market: position.market.clone(),
            entry_price: position.entry_price,
            exit_price: exit.avg_price,
            change_pct,
            entry_reason: position.entry_reason.clone(),
            exit_reason,
            outcome: TradeOutcome::from_change_pct(change_pct),
            opened_at: position.opened_at,
            closed_at: exit.timestamp,
        }
    }

    /// Names of the signals recorded in the entry reason.
    pub fn entry_signals(&self) -> impl Iterator<Item = &str> {
        self.entry_reason
            .split(" + ")
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Aggregated statistics over the closed-trade log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub cumulative_pct: f64,
    pub best_pct: Option<f64>,
    pub worst_pct: Option<f64>,
}

impl TradeSummary {
    pub fn from_trades(trades: &[ClosedTrade]) -> Self {
        let wins = trades
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Win)
            .count();
        let count = trades.len();
        let win_rate = if count == 0 {
            0.0
        } else {
            wins as f64 / count as f64
        };

        Self {
            count,
            wins,
            losses: count - wins,
            win_rate,
            cumulative_pct: trades.iter().map(|t| t.change_pct).sum(),
            best_pct: trades.iter().map(|t| t.change_pct).reduce(f64::max),
            worst_pct: trades.iter().map(|t| t.change_pct).reduce(f64::min),
        }
    }
}

/// Current state of the trade scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    AwaitingFill,
    ErrorBackoff,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::AwaitingFill => write!(f, "awaiting fill"),
            SchedulerState::ErrorBackoff => write!(f, "error backoff"),
        }
    }
}

/// Whether the bot is running against the real venue or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Events emitted by the scheduler and monitors for operator notification.
#[derive(Debug, Clone)]
pub enum TradeEvent {
    Entered {
        market: String,
        price: f64,
        reason: String,
    },
    EntryFailed {
        market: String,
        error: String,
        /// The fill state is unknown (timeout or unconfirmed order).
        ambiguous: bool,
    },
    /// A buy filled but no OPEN position tracks the coins yet.
    UnmanagedFill {
        market: String,
        quantity: f64,
        price: f64,
        detail: String,
    },
    Exited {
        trade: ClosedTrade,
    },
    /// The exit sell could not be confirmed. Needs an operator `reset`.
    ExitStuck {
        market: String,
        attempts: u32,
        error: String,
    },
    /// An ENTERING position found at startup was cleared.
    StaleEntryCleared {
        market: String,
    },
    PositionsReset {
        operator: String,
        cleared: Vec<String>,
    },
}
