/// Least-squares slope of `closes` against their index, as a percent of the
/// mean close per candle. Positive means rising.
pub fn slope_pct(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let n = closes.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = closes.iter().sum::<f64>() / n;
    if mean_y <= 0.0 {
        return None;
    }

    let (num, den) = closes
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    Some(num / den / mean_y * 100.0)
}
