use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{Error, ExitReason, Result};

/// Tolerance for threshold comparisons on percent changes.
const EPSILON: f64 = 1e-9;

/// Trailing stop: once the peak gain reaches `activation_pct`, exit when the
/// price falls `distance_pct` below the peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub activation_pct: f64,
    pub distance_pct: f64,
}

/// `[exit]` section of the bot config file.
///
/// All percentages are in percent (1.5 means 1.5 %).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing: Option<TrailingStop>,
    pub poll_interval_ms: u64,
    pub price_timeout_ms: u64,
    pub order_timeout_ms: u64,
    /// Sell attempts before the exit is reported stuck.
    pub sell_max_attempts: u32,
    /// First retry delay; doubles on every further attempt.
    pub sell_backoff_ms: u64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.5,
            take_profit_pct: 1.5,
            trailing: None,
            poll_interval_ms: 2_000,
            price_timeout_ms: 3_000,
            order_timeout_ms: 10_000,
            sell_max_attempts: 5,
            sell_backoff_ms: 500,
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(Error::Config(format!("exit.{name} must be positive, got {value}")));
            }
        }
        if let Some(t) = self.trailing {
            if !(t.distance_pct > 0.0) || t.activation_pct < 0.0 {
                return Err(Error::Config(format!(
                    "exit.trailing needs activation_pct >= 0 and distance_pct > 0, got {t:?}"
                )));
            }
        }
        if self.sell_max_attempts == 0 {
            return Err(Error::Config("exit.sell_max_attempts must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("exit.poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    /// Delay before sell attempt `attempt + 1`, with `attempt` starting at 1.
    pub fn sell_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.sell_backoff_ms.saturating_mul(factor))
    }

    /// Decide whether to exit at `price`, given the entry and the highest
    /// price seen since entry.
    ///
    /// Stop-loss wins over take-profit, which wins over the trailing stop.
    pub fn evaluate(&self, entry: f64, peak: f64, price: f64) -> Option<ExitReason> {
        if entry <= 0.0 || !price.is_finite() {
            return None;
        }
        let change = (price - entry) / entry * 100.0;

        if change <= -self.stop_loss_pct + EPSILON {
            return Some(ExitReason::StopLoss);
        }
        if change >= self.take_profit_pct - EPSILON {
            return Some(ExitReason::TakeProfit);
        }
        if let Some(trailing) = self.trailing {
            let peak = peak.max(price);
            let peak_gain = (peak - entry) / entry * 100.0;
            let retrace = (peak - price) / peak * 100.0;
            if peak_gain >= trailing.activation_pct - EPSILON
                && retrace >= trailing.distance_pct - EPSILON
            {
                return Some(ExitReason::TrailingStop);
            }
        }
        None
    }
}
