use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use common::{
    ClosedTrade, ParameterBounds, PositionStore, Result, StrategyParameters, TradeOutcome,
};

/// Move every threshold one step after a closed trade.
///
/// A loss tightens entry (higher minimums, lower RSI ceiling, higher
/// `min_score`); a win loosens by the same steps. The result is always
/// clamped to `bounds`.
pub fn adjust(
    params: &StrategyParameters,
    outcome: TradeOutcome,
    bounds: &ParameterBounds,
) -> StrategyParameters {
    let dir = match outcome {
        TradeOutcome::Loss => 1.0,
        TradeOutcome::Win => -1.0,
    };
    let min_score = match outcome {
        TradeOutcome::Loss => params.min_score.saturating_add(bounds.min_score.step),
        TradeOutcome::Win => params.min_score.saturating_sub(bounds.min_score.step),
    };

    StrategyParameters {
        band_position_min: params.band_position_min + dir * bounds.band_position_min.step,
        slope_min_pct: params.slope_min_pct + dir * bounds.slope_min_pct.step,
        range_min_pct: params.range_min_pct + dir * bounds.range_min_pct.step,
        volume_spike_ratio: params.volume_spike_ratio + dir * bounds.volume_spike_ratio.step,
        rsi_ceiling: params.rsi_ceiling - dir * bounds.rsi_ceiling.step,
        min_score,
    }
    .clamped(bounds)
}

/// Feeds closed-trade outcomes back into the stored parameters.
pub struct ParameterTuner {
    store: Arc<dyn PositionStore>,
    bounds: ParameterBounds,
    // Serializes read-modify-write when several monitors close at once.
    lock: Mutex<()>,
}

impl ParameterTuner {
    pub fn new(store: Arc<dyn PositionStore>, bounds: ParameterBounds) -> Self {
        Self {
            store,
            bounds,
            lock: Mutex::new(()),
        }
    }

    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    #[instrument(skip_all, fields(market = %trade.market, outcome = %trade.outcome))]
    pub async fn on_trade_closed(&self, trade: &ClosedTrade) -> Result<StrategyParameters> {
        let _guard = self.lock.lock().await;
        let current = self.store.parameters().await?;
        let next = adjust(&current, trade.outcome, &self.bounds);
        let stored = self.store.set_parameters(&next).await?;
        info!(
            band_position_min = stored.band_position_min,
            slope_min_pct = stored.slope_min_pct,
            range_min_pct = stored.range_min_pct,
            volume_spike_ratio = stored.volume_spike_ratio,
            rsi_ceiling = stored.rsi_ceiling,
            min_score = stored.min_score,
            "Parameters tuned"
        );
        Ok(stored)
    }
}

/// How trades entered on one signal turned out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalPerformance {
    pub wins: usize,
    pub losses: usize,
    /// `(wins - losses) / total`, in `[-1, 1]`.
    pub weight: f64,
}

/// Per-signal outcome tally, keyed by the signal names recorded in each
/// trade's entry reason.
pub fn signal_performance(trades: &[ClosedTrade]) -> BTreeMap<String, SignalPerformance> {
    let mut perf: BTreeMap<String, SignalPerformance> = BTreeMap::new();
    for trade in trades {
        for name in trade.entry_signals() {
            let entry = perf.entry(name.to_string()).or_default();
            match trade.outcome {
                TradeOutcome::Win => entry.wins += 1,
                TradeOutcome::Loss => entry.losses += 1,
            }
        }
    }
    for p in perf.values_mut() {
        let total = (p.wins + p.losses) as f64;
        p.weight = (p.wins as f64 - p.losses as f64) / total;
    }
    perf
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::ExitReason;

    fn trade(reason: &str, outcome: TradeOutcome) -> ClosedTrade {
        ClosedTrade {
            market: "X-EUR".into(),
            entry_price: 1.0,
            exit_price: 1.0,
            change_pct: 0.0,
            entry_reason: reason.into(),
            exit_reason: ExitReason::TakeProfit,
            outcome,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn loss_tightens_and_win_loosens() {
        let bounds = ParameterBounds::default();
        let start = StrategyParameters::default();

        let tighter = adjust(&start, TradeOutcome::Loss, &bounds);
        assert!(tighter.band_position_min > start.band_position_min);
        assert!(tighter.slope_min_pct > start.slope_min_pct);
        assert!(tighter.range_min_pct > start.range_min_pct);
        assert!(tighter.volume_spike_ratio > start.volume_spike_ratio);
        assert!(tighter.rsi_ceiling < start.rsi_ceiling);
        assert_eq!(tighter.min_score, start.min_score + 1);

        let looser = adjust(&start, TradeOutcome::Win, &bounds);
        assert!(looser.band_position_min < start.band_position_min);
        assert!(looser.rsi_ceiling > start.rsi_ceiling);
        assert_eq!(looser.min_score, start.min_score - 1);
    }

    #[test]
    fn performance_weights_signals_by_outcome() {
        let trades = vec![
            trade("slope + volume_spike", TradeOutcome::Win),
            trade("slope", TradeOutcome::Loss),
            trade("slope + rsi", TradeOutcome::Win),
        ];
        let perf = signal_performance(&trades);

        let slope = perf["slope"];
        assert_eq!((slope.wins, slope.losses), (2, 1));
        assert!((slope.weight - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(perf["volume_spike"].weight, 1.0);
        assert!(!perf.contains_key("range"));
        assert!(signal_performance(&[]).is_empty());
    }

    #[tokio::test]
    async fn tuner_writes_back_through_the_store() {
        let store = Arc::new(store::MemoryStore::new(store::StoreSettings::default()));
        let tuner = ParameterTuner::new(store.clone(), ParameterBounds::default());

        let after = tuner
            .on_trade_closed(&trade("slope", TradeOutcome::Loss))
            .await
            .unwrap();
        assert_eq!(store.parameters().await.unwrap(), after);
        assert_eq!(after.min_score, StrategyParameters::default().min_score + 1);
    }
}
