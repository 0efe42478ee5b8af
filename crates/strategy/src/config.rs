use serde::{Deserialize, Serialize};

/// `[scanner]` section of the bot config file.
///
/// ```toml
/// [scanner]
/// quote_currency = "EUR"
/// universe_size = 25
/// window = 30
/// signals = ["price_band", "slope", "range", "bullish_candle", "volume_spike", "rsi"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Only markets quoted in this currency are scanned.
    pub quote_currency: String,
    /// Number of markets kept in the universe, by descending 24h quote volume.
    pub universe_size: usize,
    /// Markets trading less than this (quote currency, 24h) are ignored.
    pub min_quote_volume: f64,
    /// When set, markets whose 24h price change (percent) is not above this
    /// are left out of the universe.
    pub min_price_change_pct: Option<f64>,
    /// How often the universe is rebuilt from the 24h tickers.
    pub universe_refresh_secs: u64,
    /// Candle interval passed to the venue, e.g. "1m".
    pub candle_interval: String,
    /// Candles per scoring window.
    pub window: usize,
    /// Recent candles compared against the trailing volume average.
    pub spike_lookback: usize,
    pub rsi_period: usize,
    /// Maximum concurrent candle requests.
    pub fetch_concurrency: usize,
    pub fetch_timeout_ms: u64,
    /// Enabled signals, in scoring order.
    pub signals: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            quote_currency: "EUR".to_string(),
            universe_size: 25,
            min_quote_volume: 10_000.0,
            min_price_change_pct: None,
            universe_refresh_secs: 900,
            candle_interval: "1m".to_string(),
            window: 30,
            spike_lookback: 3,
            rsi_period: 14,
            fetch_concurrency: 8,
            fetch_timeout_ms: 5_000,
            signals: ["price_band", "slope", "range", "bullish_candle", "volume_spike", "rsi"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
