use tracing::info;

use common::{Candle, Error, Result, StrategyParameters};

use crate::config::ScannerConfig;
use crate::indicators::RsiIndicator;
use crate::scoring::{score_window, ScoreResult};
use crate::signals::{BullishCandle, PriceBand, Range, Rsi, Signal, Slope, VolumeSpike};

/// The enabled signals, in scoring order.
pub struct SignalRegistry {
    signals: Vec<Box<dyn Signal>>,
}

impl SignalRegistry {
    /// Build the registry from config, failing on unknown or duplicate names.
    pub fn from_config(cfg: &ScannerConfig) -> Result<Self> {
        let mut signals: Vec<Box<dyn Signal>> = Vec::new();

        for name in &cfg.signals {
            let signal = build_signal(name, cfg)?;
            if signals.iter().any(|s| s.name() == signal.name()) {
                return Err(Error::Config(format!("signal '{name}' listed twice")));
            }
            info!(name = %signal.name(), weight = signal.weight(), "Registered signal");
            signals.push(signal);
        }

        if signals.is_empty() {
            return Err(Error::Config("no signals enabled".to_string()));
        }
        Ok(Self { signals })
    }

    pub fn new(signals: Vec<Box<dyn Signal>>) -> Self {
        Self { signals }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.signals.iter().map(|s| s.name()).collect()
    }

    /// Largest score any window can reach.
    pub fn max_score(&self) -> u32 {
        self.signals.iter().map(|s| s.weight()).sum()
    }

    pub fn score(&self, market: &str, window: &[Candle], params: &StrategyParameters) -> ScoreResult {
        score_window(market, window, &self.signals, params)
    }
}

fn build_signal(name: &str, cfg: &ScannerConfig) -> Result<Box<dyn Signal>> {
    match name {
        "price_band" => Ok(Box::new(PriceBand)),
        "slope" => Ok(Box::new(Slope)),
        "range" => Ok(Box::new(Range)),
        "bullish_candle" => Ok(Box::new(BullishCandle)),
        "volume_spike" => Ok(Box::new(VolumeSpike {
            lookback: cfg.spike_lookback,
        })),
        "rsi" => Ok(Box::new(Rsi {
            indicator: RsiIndicator::new(cfg.rsi_period),
        })),
        other => Err(Error::Config(format!("unknown signal '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_registers_every_builtin() {
        let registry = SignalRegistry::from_config(&ScannerConfig::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec!["price_band", "slope", "range", "bullish_candle", "volume_spike", "rsi"]
        );
        assert_eq!(registry.max_score(), 7);
    }

    #[test]
    fn unknown_and_duplicate_signals_are_config_errors() {
        let unknown = ScannerConfig {
            signals: vec!["macd".into()],
            ..ScannerConfig::default()
        };
        assert!(matches!(
            SignalRegistry::from_config(&unknown),
            Err(Error::Config(_))
        ));

        let duplicate = ScannerConfig {
            signals: vec!["slope".into(), "slope".into()],
            ..ScannerConfig::default()
        };
        assert!(SignalRegistry::from_config(&duplicate).is_err());

        let empty = ScannerConfig {
            signals: Vec::new(),
            ..ScannerConfig::default()
        };
        assert!(SignalRegistry::from_config(&empty).is_err());
    }
}
