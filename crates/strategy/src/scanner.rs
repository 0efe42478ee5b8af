use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use common::{with_timeout, MarketData, MarketTicker, Result, StrategyParameters};

use crate::config::ScannerConfig;
use crate::registry::SignalRegistry;
use crate::scoring::{pick_best, ScoreResult};

#[derive(Default)]
struct Universe {
    markets: Vec<String>,
    refreshed_at: Option<Instant>,
}

/// Ranks the candidate universe and recommends at most one market per scan.
pub struct Scanner {
    config: ScannerConfig,
    registry: SignalRegistry,
    market: Arc<dyn MarketData>,
    universe: Mutex<Universe>,
}

impl Scanner {
    pub fn new(
        config: ScannerConfig,
        registry: SignalRegistry,
        market: Arc<dyn MarketData>,
    ) -> Self {
        Self {
            config,
            registry,
            market,
            universe: Mutex::new(Universe::default()),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Current universe, rebuilt from the 24h tickers when older than
    /// `universe_refresh_secs`. A failed rebuild keeps the previous universe.
    pub async fn universe(&self) -> Vec<String> {
        let refresh_every = Duration::from_secs(self.config.universe_refresh_secs);
        let mut universe = self.universe.lock().await;

        let stale = universe
            .refreshed_at
            .map(|at| at.elapsed() >= refresh_every)
            .unwrap_or(true);
        if stale {
            let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
            match with_timeout("markets", timeout, self.market.markets()).await {
                Ok(tickers) => {
                    universe.markets = rank_universe(&tickers, &self.config);
                    universe.refreshed_at = Some(Instant::now());
                    info!(size = universe.markets.len(), "Universe refreshed");
                }
                Err(e) => {
                    warn!(error = %e, kept = universe.markets.len(), "Universe refresh failed");
                }
            }
        }
        universe.markets.clone()
    }

    /// Score every non-excluded market in the universe and return the best
    /// one at or above `params.min_score`.
    ///
    /// Markets whose candles cannot be fetched, or whose window is short, are
    /// skipped for this scan.
    #[instrument(skip_all, fields(excluded = excluded.len()))]
    pub async fn select_candidate(
        &self,
        excluded: &HashSet<String>,
        params: &StrategyParameters,
    ) -> Result<Option<ScoreResult>> {
        let candidates: Vec<String> = self
            .universe()
            .await
            .into_iter()
            .filter(|m| !excluded.contains(m))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
        let interval = self.config.candle_interval.as_str();
        let window = self.config.window;

        // `buffered` keeps universe order, which the tie-break relies on.
        let windows: Vec<_> = stream::iter(candidates)
            .map(|market| async move {
                let candles =
                    with_timeout("candles", timeout, self.market.candles(&market, interval, window))
                        .await;
                (market, candles)
            })
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let scored = windows.into_iter().filter_map(|(market, candles)| match candles {
            Ok(candles) if candles.len() >= window => {
                let result = self.registry.score(&market, &candles, params);
                debug!(market = %market, score = result.score, reason = %result.reason(), "Scored");
                Some(result)
            }
            Ok(candles) => {
                debug!(market = %market, got = candles.len(), want = window, "Short window, skipped");
                None
            }
            Err(e) => {
                debug!(market = %market, error = %e, "Candles unavailable, skipped");
                None
            }
        });

        let best = pick_best(scored, params.min_score);
        if let Some(best) = &best {
            info!(market = %best.market, score = best.score, reason = %best.reason(), "Candidate selected");
        }
        Ok(best)
    }
}

/// Markets in the configured quote currency with enough volume and, when
/// configured, enough 24h price change. Highest 24h quote volume first, truncated to `universe_size`. Equal volumes are ordered
/// by market name.
pub fn rank_universe(tickers: &[MarketTicker], config: &ScannerConfig) -> Vec<String> {
    let suffix = format!("-{}", config.quote_currency);
    let mut eligible: Vec<&MarketTicker> = tickers
        .iter()
        .filter(|t| t.market.ends_with(&suffix))
        .filter(|t| t.quote_volume >= config.min_quote_volume)
        .filter(|t| {
            config
                .min_price_change_pct
                .map_or(true, |min| t.price_change_pct > min)
        })
        .collect();

    eligible.sort_by(|a, b| {
        b.quote_volume
            .total_cmp(&a.quote_volume)
            .then_with(|| a.market.cmp(&b.market))
    });

    eligible
        .into_iter()
        .take(config.universe_size)
        .map(|t| t.market.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{flat_window, rising_window};
    use paper::SimulatedMarket;

    fn ticker(market: &str, quote_volume: f64) -> MarketTicker {
        MarketTicker {
            market: market.into(),
            last_price: 1.0,
            quote_volume,
            price_change_pct: 0.0,
        }
    }

    async fn market_with(windows: &[(&str, f64, bool)]) -> Arc<SimulatedMarket> {
        let market = Arc::new(SimulatedMarket::new());
        for (name, volume, hot) in windows {
            market.set_ticker(ticker(name, *volume)).await;
            let candles = if *hot {
                rising_window(30, true)
            } else {
                flat_window(30)
            };
            market.set_candles(name, candles).await;
        }
        market
    }

    fn scanner(market: Arc<SimulatedMarket>) -> Scanner {
        let config = ScannerConfig::default();
        let registry = SignalRegistry::from_config(&config).unwrap();
        Scanner::new(config, registry, market)
    }

    #[test]
    fn universe_is_filtered_and_volume_sorted() {
        let config = ScannerConfig {
            universe_size: 2,
            min_quote_volume: 100.0,
            ..ScannerConfig::default()
        };
        let tickers = vec![
            ticker("BTC-EUR", 500.0),
            ticker("ETH-USDC", 9_000.0),
            ticker("ADA-EUR", 50.0),
            ticker("SOL-EUR", 800.0),
            ticker("XRP-EUR", 700.0),
        ];
        assert_eq!(rank_universe(&tickers, &config), vec!["SOL-EUR", "XRP-EUR"]);
    }

    #[test]
    fn price_change_floor_drops_quiet_markets() {
        let moving = |market: &str, quote_volume: f64, change: f64| MarketTicker {
            price_change_pct: change,
            ..ticker(market, quote_volume)
        };
        let tickers = vec![
            moving("BTC-EUR", 9_000.0, 0.4),
            moving("DOGE-EUR", 5_000.0, 3.2),
            moving("SHIB-EUR", 4_000.0, 1.0),
            moving("PEPE-EUR", 3_000.0, -2.5),
            moving("SOL-EUR", 2_000.0, 1.1),
        ];
        let min_volume = ScannerConfig {
            min_quote_volume: 0.0,
            ..ScannerConfig::default()
        };
        assert_eq!(rank_universe(&tickers, &min_volume).len(), 5);

        let config = ScannerConfig {
            min_price_change_pct: Some(1.0),
            ..min_volume
        };
        assert_eq!(rank_universe(&tickers, &config), vec!["DOGE-EUR", "SOL-EUR"]);
    }

    #[tokio::test]
    async fn selects_the_hot_market() {
        let market = market_with(&[
            ("BTC-EUR", 90_000.0, false),
            ("DOGE-EUR", 50_000.0, true),
            ("ETH-EUR", 40_000.0, false),
        ])
        .await;
        let scanner = scanner(market);
        let params = StrategyParameters {
            min_score: 3,
            ..StrategyParameters::default()
        };

        let best = scanner
            .select_candidate(&HashSet::new(), &params)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.market, "DOGE-EUR");
        assert!(best.score >= 3);
    }

    #[tokio::test]
    async fn excluded_markets_are_never_selected() {
        let market = market_with(&[("DOGE-EUR", 50_000.0, true), ("BTC-EUR", 90_000.0, false)]).await;
        let scanner = scanner(market);
        let excluded: HashSet<String> = ["DOGE-EUR".to_string()].into_iter().collect();

        let best = scanner
            .select_candidate(&excluded, &StrategyParameters::default())
            .await
            .unwrap();
        assert!(best.is_none());
    }

    #[tokio::test]
    async fn selection_is_deterministic_and_ties_favour_volume_order() {
        let market = market_with(&[
            ("PEPE-EUR", 20_000.0, true),
            ("DOGE-EUR", 50_000.0, true),
            ("SHIB-EUR", 30_000.0, true),
        ])
        .await;
        let scanner = scanner(market);
        let params = StrategyParameters::default();

        let first = scanner
            .select_candidate(&HashSet::new(), &params)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.market, "DOGE-EUR");

        for _ in 0..10 {
            let again = scanner
                .select_candidate(&HashSet::new(), &params)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[tokio::test]
    async fn unavailable_candles_skip_only_that_market() {
        let market = market_with(&[("DOGE-EUR", 50_000.0, true), ("SHIB-EUR", 30_000.0, true)]).await;
        market.set_unavailable("DOGE-EUR", true).await;
        let scanner = scanner(market);

        let best = scanner
            .select_candidate(&HashSet::new(), &StrategyParameters::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.market, "SHIB-EUR");
    }

    #[tokio::test]
    async fn raising_min_score_rejects_everything() {
        let market = market_with(&[("DOGE-EUR", 50_000.0, true)]).await;
        let scanner = scanner(market);
        let params = StrategyParameters {
            min_score: 99,
            ..StrategyParameters::default()
        };
        assert!(scanner
            .select_candidate(&HashSet::new(), &params)
            .await
            .unwrap()
            .is_none());
    }
}
