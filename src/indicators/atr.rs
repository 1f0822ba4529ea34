use rust_decimal::Decimal;

/// Average True Range in price units. True range is
/// `max(high - low, |high - prev_close|, |low - prev_close|)`; the series is
/// seeded with the simple mean of the first `period` true ranges, then
/// Wilder-smoothed: `atr = (atr * (period - 1) + tr) / period`.
pub fn atr(high: &[Decimal], low: &[Decimal], close: &[Decimal], period: usize) -> Vec<Decimal> {
    let len = high.len().min(low.len()).min(close.len());
    if period == 0 || len < period + 1 {
        return Vec::new();
    }

    let mut true_ranges = Vec::with_capacity(len - 1);
    for i in 1..len {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        true_ranges.push(hl.max(hc).max(lc));
    }

    if true_ranges.len() < period {
        return Vec::new();
    }

    let period_dec = Decimal::from(period as u32);
    let mut values = Vec::with_capacity(true_ranges.len() - period + 1);
    let seed: Decimal = true_ranges[..period].iter().sum::<Decimal>() / period_dec;
    values.push(seed);

    for tr in &true_ranges[period..] {
        let prev = *values.last().expect("seeded above");
        values.push((prev * (period_dec - Decimal::ONE) + *tr) / period_dec);
    }

    values
}

/// Mean of the trailing `period` ATR values, or of the whole series when it
/// is shorter.
pub fn atr_average(atr_values: &[Decimal], period: usize) -> Decimal {
    if atr_values.is_empty() {
        return Decimal::ZERO;
    }
    let window = if atr_values.len() < period {
        atr_values
    } else {
        &atr_values[atr_values.len() - period..]
    };
    window.iter().sum::<Decimal>() / Decimal::from(window.len() as u32)
}
