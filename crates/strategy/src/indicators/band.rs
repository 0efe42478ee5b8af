use common::Candle;

/// Lowest low and highest high of the window.
fn extremes(candles: &[Candle]) -> Option<(f64, f64)> {
    let first = candles.first()?;
    Some(
        candles
            .iter()
            .fold((first.low, first.high), |(lo, hi), c| (lo.min(c.low), hi.max(c.high))),
    )
}

/// Where the last close sits inside the window's `[low, high]` band:
/// 0.0 at the low, 1.0 at the high. `None` for an empty or flat window.
pub fn band_position(candles: &[Candle]) -> Option<f64> {
    let last = candles.last()?;
    let (low, high) = extremes(candles)?;
    if high <= low {
        return None;
    }
    Some(((last.close - low) / (high - low)).clamp(0.0, 1.0))
}

/// Window range (highest high minus lowest low) as a percent of the lowest low.
pub fn range_pct(candles: &[Candle]) -> Option<f64> {
    let (low, high) = extremes(candles)?;
    if low <= 0.0 {
        return None;
    }
    Some((high - low) / low * 100.0)
}
