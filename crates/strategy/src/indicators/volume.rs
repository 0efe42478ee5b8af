use common::Candle;

/// Mean volume of the last `lookback` candles divided by the mean volume of
/// the candles before them. `None` when either side is empty or the trailing
/// average is zero.
pub fn volume_spike_ratio(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback == 0 || candles.len() <= lookback {
        return None;
    }
    let (trailing, recent) = candles.split_at(candles.len() - lookback);

    let mean = |cs: &[Candle]| cs.iter().map(|c| c.volume).sum::<f64>() / cs.len() as f64;
    let trailing_avg = mean(trailing);
    if trailing_avg <= 0.0 {
        return None;
    }
    Some(mean(recent) / trailing_avg)
}
