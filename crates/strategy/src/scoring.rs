use serde::{Deserialize, Serialize};

use common::{Candle, StrategyParameters};

use crate::signals::Signal;

/// One signal's contribution to a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub name: String,
    pub value: Option<f64>,
    pub passed: bool,
    pub weight: u32,
}

/// Composite score of one market for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub market: String,
    pub score: u32,
    /// In signal registration order.
    pub signals: Vec<SignalOutcome>,
}

impl ScoreResult {
    /// Passed signal names joined with `" + "`, stored as the entry reason.
    pub fn reason(&self) -> String {
        self.signals
            .iter()
            .filter(|s| s.passed)
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// Evaluate every signal against `window`. A signal that cannot be measured
/// does not pass.
pub fn score_window(
    market: &str,
    window: &[Candle],
    signals: &[Box<dyn Signal>],
    params: &StrategyParameters,
) -> ScoreResult {
    let outcomes: Vec<SignalOutcome> = signals
        .iter()
        .map(|signal| {
            let value = signal.measure(window);
            SignalOutcome {
                name: signal.name().to_string(),
                value,
                passed: value.map(|v| signal.passes(v, params)).unwrap_or(false),
                weight: signal.weight(),
            }
        })
        .collect();

    ScoreResult {
        market: market.to_string(),
        score: outcomes.iter().filter(|o| o.passed).map(|o| o.weight).sum(),
        signals: outcomes,
    }
}

/// Highest score at or above `min_score`. Ties go to the earliest result, so
/// feeding results in universe order makes the choice deterministic.
pub fn pick_best(
    results: impl IntoIterator<Item = ScoreResult>,
    min_score: u32,
) -> Option<ScoreResult> {
    let mut best: Option<ScoreResult> = None;
    for result in results {
        if result.score < min_score {
            continue;
        }
        match &best {
            Some(current) if current.score >= result.score => {}
            _ => best = Some(result),
        }
    }
    best
}
