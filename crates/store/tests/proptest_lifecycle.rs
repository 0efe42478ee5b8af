use std::collections::HashMap;

use chrono::Utc;
use proptest::prelude::*;
use common::{Position, PositionStatus, PositionStore};
use store::{MemoryStore, StoreSettings};

const MARKETS: [&str; 3] = ["A-EUR", "B-EUR", "C-EUR"];

#[derive(Debug, Clone, Copy)]
enum Step {
    Claim,
    Fill,
    Abort,
    BeginExit,
    Close,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Claim),
        Just(Step::Fill),
        Just(Step::Abort),
        Just(Step::BeginExit),
        Just(Step::Close),
    ]
}

/// Expected status and replacement for a step. Some of these are deliberately
/// stale relative to the store, so the CAS must reject them.
fn plan(step: Step, market: &str) -> (Option<PositionStatus>, Option<Position>) {
    let base = Position::entering(market, 10.0, "slope", Utc::now());
    match step {
        Step::Claim => (None, Some(base)),
        Step::Fill => (
            Some(PositionStatus::Entering),
            Some(base.with_status(PositionStatus::Open)),
        ),
        Step::Abort => (Some(PositionStatus::Entering), None),
        Step::BeginExit => (
            Some(PositionStatus::Open),
            Some(base.with_status(PositionStatus::Exiting)),
        ),
        Step::Close => (Some(PositionStatus::Exiting), None),
    }
}

proptest! {
    /// Whatever order steps arrive in, the store only ever moves a market
    /// along the lifecycle and never exceeds its capacity.
    #[test]
    fn only_lifecycle_transitions_are_observed(
        steps in prop::collection::vec((0usize..MARKETS.len(), step()), 1..200),
        capacity in 1usize..3,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MemoryStore::new(StoreSettings {
                max_open_positions: capacity,
                ..StoreSettings::default()
            });
            let mut observed: HashMap<&str, Option<PositionStatus>> =
                MARKETS.iter().map(|m| (*m, None)).collect();

            for (idx, step) in steps {
                let market = MARKETS[idx];
                let (expected, new) = plan(step, market);
                store
                    .compare_and_set_position(market, expected, new.as_ref())
                    .await
                    .unwrap();

                for m in MARKETS {
                    let now = store.position(m).await.unwrap().map(|p| p.status);
                    let before = observed[m];
                    if now != before {
                        assert!(
                            PositionStatus::is_valid_transition(before, now),
                            "illegal transition {before:?} -> {now:?} on {m}"
                        );
                    }
                    observed.insert(m, now);
                }
                assert!(store.positions().await.unwrap().len() <= capacity);
            }
        });
    }
}
