pub mod band;
pub mod rsi;
pub mod trend;
pub mod volume;

pub use band::{band_position, range_pct};
pub use rsi::RsiIndicator;
pub use trend::slope_pct;
pub use volume::volume_spike_ratio;
