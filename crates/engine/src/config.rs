use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{Error, ParameterBounds, Result, StrategyParameters};
use risk::ExitConfig;
use store::StoreSettings;
use strategy::ScannerConfig;

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Quote currency spent on every entry.
    pub quote_amount: f64,
    /// How long a market is excluded after a failed entry.
    pub cooldown_secs: u64,
    pub order_timeout_ms: u64,
    pub max_open_positions: usize,
    /// Ceiling for the exponential backoff after store errors.
    pub max_backoff_secs: u64,
    /// Attempts for a position write after an order has gone out.
    pub store_retry_attempts: u32,
    /// Base delay between those attempts, doubled each time.
    pub store_retry_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 15_000,
            quote_amount: 25.0,
            cooldown_secs: 300,
            order_timeout_ms: 10_000,
            max_open_positions: 1,
            max_backoff_secs: 120,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 200,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn store_retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.store_retry_backoff_ms.saturating_mul(factor))
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSection {
    /// Closed trades kept in the log; older ones are evicted.
    pub closed_trade_capacity: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            closed_trade_capacity: 500,
        }
    }
}

/// Trading settings file (TOML).
///
/// Example `config/bot.toml`:
/// ```toml
/// [scheduler]
/// quote_amount = 25.0
/// cooldown_secs = 300
///
/// [exit]
/// stop_loss_pct = 0.5
/// take_profit_pct = 1.5
///
/// [bounds.rsi_ceiling]
/// min = 40.0
/// max = 80.0
/// step = 2.0
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BotFileConfig {
    pub scheduler: SchedulerConfig,
    pub scanner: ScannerConfig,
    pub exit: ExitConfig,
    /// Starting thresholds, used until the tuner writes its own.
    pub parameters: StrategyParameters,
    pub bounds: ParameterBounds,
    pub store: StoreSection,
}

impl BotFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read bot config at '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bot config at '{}': {e}", path.display())))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.bounds.validate()?;
        self.exit.validate()?;

        let s = &self.scheduler;
        if !(s.quote_amount > 0.0) {
            return Err(Error::Config("scheduler.quote_amount must be positive".into()));
        }
        if s.max_open_positions == 0 {
            return Err(Error::Config("scheduler.max_open_positions must be at least 1".into()));
        }
        if s.tick_interval_ms == 0 {
            return Err(Error::Config("scheduler.tick_interval_ms must be positive".into()));
        }
        if s.store_retry_attempts == 0 {
            return Err(Error::Config("scheduler.store_retry_attempts must be at least 1".into()));
        }
        if self.scanner.window < 2 {
            return Err(Error::Config("scanner.window must be at least 2".into()));
        }
        if self.scanner.min_price_change_pct.is_some_and(|v| !v.is_finite()) {
            return Err(Error::Config("scanner.min_price_change_pct must be a number".into()));
        }
        if self.store.closed_trade_capacity == 0 {
            return Err(Error::Config("store.closed_trade_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            max_open_positions: self.scheduler.max_open_positions,
            closed_trade_capacity: self.store.closed_trade_capacity,
            bounds: self.bounds,
            initial_parameters: self.parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = BotFileConfig::parse("").unwrap();
        assert_eq!(cfg.scheduler, SchedulerConfig::default());
        assert_eq!(cfg.exit, ExitConfig::default());
        assert_eq!(cfg.scanner.quote_currency, "EUR");
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = BotFileConfig::parse(
            r#"
            [scheduler]
            quote_amount = 10.0
            max_open_positions = 2

            [scanner]
            signals = ["slope", "volume_spike"]

            [exit]
            take_profit_pct = 2.0
            trailing = { activation_pct = 1.0, distance_pct = 0.4 }

            [parameters]
            min_score = 4

            [bounds.min_score]
            min = 1
            max = 3
            step = 1
            "#,
        )
        .unwrap();

        assert_eq!(cfg.scheduler.quote_amount, 10.0);
        assert_eq!(cfg.scheduler.cooldown_secs, 300);
        assert_eq!(cfg.scanner.signals, vec!["slope", "volume_spike"]);
        assert_eq!(cfg.exit.take_profit_pct, 2.0);
        assert_eq!(cfg.exit.trailing.map(|t| t.distance_pct), Some(0.4));

        let settings = cfg.store_settings();
        assert_eq!(settings.max_open_positions, 2);
        // Starting parameters are clamped by the store, not rejected here.
        assert_eq!(settings.initial_parameters.min_score, 4);
        assert_eq!(settings.bounds.min_score.max, 3);
        assert_eq!(settings.bounds.rsi_ceiling, ParameterBounds::default().rsi_ceiling);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for bad in [
            "[scheduler]\nquote_amount = 0.0",
            "[scheduler]\nmax_open_positions = 0",
            "[scheduler]\nstore_retry_attempts = 0",
            "[exit]\nstop_loss_pct = -1.0",
            "[bounds.rsi_ceiling]\nmin = 90.0\nmax = 10.0\nstep = 1.0",
            "not toml at all [",
        ] {
            assert!(
                matches!(BotFileConfig::parse(bad), Err(Error::Config(_))),
                "accepted: {bad}"
            );
        }
    }

    #[test]
    fn shipped_config_parses() {
        let cfg = BotFileConfig::parse(include_str!("../../../config/bot.toml")).unwrap();
        assert_eq!(cfg.bounds, ParameterBounds::default());
        assert_eq!(cfg.parameters, StrategyParameters::default());
        assert!(cfg.exit.trailing.is_some());
        assert_eq!(cfg.scanner.min_price_change_pct, Some(1.0));
        assert!(cfg.scanner.signals.iter().any(|s| s == "bullish_candle"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            BotFileConfig::load("/nonexistent/bot.toml"),
            Err(Error::Config(_))
        ));
    }
}
