use serde::{Deserialize, Serialize};

/// Entry thresholds read by the scanner on every scan and adjusted by the
/// tuner after every closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParameters {
    /// Minimum position of the last close inside the window's low/high band (0..1).
    pub band_position_min: f64,
    /// Minimum closing-price slope, percent of mean close per candle.
    pub slope_min_pct: f64,
    /// Minimum window range as a percent of the window low.
    pub range_min_pct: f64,
    /// Minimum ratio of recent volume to trailing average volume.
    pub volume_spike_ratio: f64,
    /// Maximum RSI accepted for an entry.
    pub rsi_ceiling: f64,
    /// Minimum composite score to trigger an entry.
    pub min_score: u32,
}

impl Default for StrategyParameters {
    fn default() -> Self {
        Self {
            band_position_min: 0.6,
            slope_min_pct: 0.02,
            range_min_pct: 0.8,
            volume_spike_ratio: 1.5,
            rsi_ceiling: 70.0,
            min_score: 3,
        }
    }
}

/// Inclusive range and tuning step for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Clamp into `[min, max]`. NaN collapses to `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() || value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBound {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

impl ScoreBound {
    pub fn clamp(&self, value: u32) -> u32 {
        value.clamp(self.min, self.max)
    }
}

/// Safe ranges for every tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterBounds {
    pub band_position_min: Bound,
    pub slope_min_pct: Bound,
    pub range_min_pct: Bound,
    pub volume_spike_ratio: Bound,
    pub rsi_ceiling: Bound,
    pub min_score: ScoreBound,
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            band_position_min: Bound::new(0.3, 0.95, 0.05),
            slope_min_pct: Bound::new(0.0, 0.2, 0.01),
            range_min_pct: Bound::new(0.3, 3.0, 0.1),
            volume_spike_ratio: Bound::new(1.1, 4.0, 0.1),
            rsi_ceiling: Bound::new(40.0, 80.0, 2.0),
            min_score: ScoreBound {
                min: 2,
                max: 6,
                step: 1,
            },
        }
    }
}

impl ParameterBounds {
    /// Reject bounds that could never hold a value.
    pub fn validate(&self) -> crate::Result<()> {
        let floats = [
            ("band_position_min", self.band_position_min),
            ("slope_min_pct", self.slope_min_pct),
            ("range_min_pct", self.range_min_pct),
            ("volume_spike_ratio", self.volume_spike_ratio),
            ("rsi_ceiling", self.rsi_ceiling),
        ];
        for (name, bound) in floats {
            if !(bound.min <= bound.max) || bound.step < 0.0 {
                return Err(crate::Error::Config(format!(
                    "invalid bound for {name}: [{}, {}] step {}",
                    bound.min, bound.max, bound.step
                )));
            }
        }
        if self.min_score.min > self.min_score.max {
            return Err(crate::Error::Config(format!(
                "invalid bound for min_score: [{}, {}]",
                self.min_score.min, self.min_score.max
            )));
        }
        Ok(())
    }
}

impl StrategyParameters {
    /// Every field pulled into its configured range.
    pub fn clamped(&self, bounds: &ParameterBounds) -> Self {
        Self {
            band_position_min: bounds.band_position_min.clamp(self.band_position_min),
            slope_min_pct: bounds.slope_min_pct.clamp(self.slope_min_pct),
            range_min_pct: bounds.range_min_pct.clamp(self.range_min_pct),
            volume_spike_ratio: bounds.volume_spike_ratio.clamp(self.volume_spike_ratio),
            rsi_ceiling: bounds.rsi_ceiling.clamp(self.rsi_ceiling),
            min_score: bounds.min_score.clamp(self.min_score),
        }
    }

    pub fn within(&self, bounds: &ParameterBounds) -> bool {
        self.clamped(bounds) == *self
    }
}
