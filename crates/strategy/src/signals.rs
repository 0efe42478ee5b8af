//! Built-in entry signals.
//!
//! A signal reduces a candle window to one scalar and tests it against the
//! current `StrategyParameters`. Both steps are pure, so a given window and
//! parameter set always produce the same outcome.

use common::{Candle, StrategyParameters};

use crate::indicators::{band_position, range_pct, slope_pct, volume_spike_ratio, RsiIndicator};

/// An entry signal that contributes `weight` points when it passes.
pub trait Signal: Send + Sync {
    /// Stable identifier, used in configuration and recorded in entry reasons.
    fn name(&self) -> &'static str;

    /// Points contributed to the composite score when the signal passes.
    fn weight(&self) -> u32 {
        1
    }

    /// The signal's scalar for `window` (oldest first), or `None` if the
    /// window is too short or degenerate.
    fn measure(&self, window: &[Candle]) -> Option<f64>;

    /// Whether `value` clears the current threshold.
    fn passes(&self, value: f64, params: &StrategyParameters) -> bool;
}

/// Last close in the upper part of the window's band.
pub struct PriceBand;

impl Signal for PriceBand {
    fn name(&self) -> &'static str {
        "price_band"
    }

    fn measure(&self, window: &[Candle]) -> Option<f64> {
        band_position(window)
    }

    fn passes(&self, value: f64, params: &StrategyParameters) -> bool {
        value >= params.band_position_min
    }
}

/// Closing prices trending up across the window.
pub struct Slope;

impl Signal for Slope {
    fn name(&self) -> &'static str {
        "slope"
    }

    fn measure(&self, window: &[Candle]) -> Option<f64> {
        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        slope_pct(&closes)
    }

    fn passes(&self, value: f64, params: &StrategyParameters) -> bool {
        value >= params.slope_min_pct
    }
}

/// Enough movement in the window for the take-profit to be reachable.
pub struct Range;

impl Signal for Range {
    fn name(&self) -> &'static str {
        "range"
    }

    fn measure(&self, window: &[Candle]) -> Option<f64> {
        range_pct(window)
    }

    fn passes(&self, value: f64, params: &StrategyParameters) -> bool {
        value >= params.range_min_pct
    }
}

/// Last candle closed green and above the previous close.
///
/// Measured as the smaller of the candle body and the close-to-close gain,
/// in percent of the previous close, so it is positive only when both hold.
pub struct BullishCandle;

impl Signal for BullishCandle {
    fn name(&self) -> &'static str {
        "bullish_candle"
    }

    fn measure(&self, window: &[Candle]) -> Option<f64> {
        let [.., prev, last] = window else {
            return None;
        };
        if !(prev.close > 0.0) {
            return None;
        }
        let body = last.close - last.open;
        let gain = last.close - prev.close;
        Some(body.min(gain) / prev.close * 100.0)
    }

    fn passes(&self, value: f64, _params: &StrategyParameters) -> bool {
        value > 0.0
    }
}

/// Recent volume well above the trailing average. Counts double.
pub struct VolumeSpike {
    pub lookback: usize,
}

impl Signal for VolumeSpike {
    fn name(&self) -> &'static str {
        "volume_spike"
    }

    fn weight(&self) -> u32 {
        2
    }

    fn measure(&self, window: &[Candle]) -> Option<f64> {
        volume_spike_ratio(window, self.lookback)
    }

    fn passes(&self, value: f64, params: &StrategyParameters) -> bool {
        value >= params.volume_spike_ratio
    }
}

/// Not overbought.
pub struct Rsi {
    pub indicator: RsiIndicator,
}

impl Signal for Rsi {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn measure(&self, window: &[Candle]) -> Option<f64> {
        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        self.indicator.compute(&closes)
    }

    fn passes(&self, value: f64, params: &StrategyParameters) -> bool {
        value <= params.rsi_ceiling
    }
}
