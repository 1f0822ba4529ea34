use rust_decimal::Decimal;

/// Relative Strength Index over trailing windows of `period` deltas. Empty
/// when there are fewer than `period + 1` prices. A window of all-zero
/// deltas emits 50 (flat market); a window with no losses emits 100.
pub fn rsi(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || prices.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<Decimal> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let hundred = Decimal::from(100);
    let mut values = Vec::with_capacity(deltas.len() - period + 1);

    for window in deltas.windows(period) {
        if window.iter().all(|d| d.is_zero()) {
            values.push(Decimal::from(50));
            continue;
        }

        let avg_gain: Decimal = window
            .iter()
            .filter(|d| **d > Decimal::ZERO)
            .sum::<Decimal>()
            / Decimal::from(period as u32);
        let avg_loss: Decimal = window
            .iter()
            .filter(|d| **d < Decimal::ZERO)
            .map(|d| d.abs())
            .sum::<Decimal>()
            / Decimal::from(period as u32);

        if avg_loss.is_zero() {
            values.push(hundred);
        } else {
            let rs = avg_gain / avg_loss;
            values.push(hundred - hundred / (Decimal::ONE + rs));
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_below_period_plus_one() {
        let prices: Vec<Decimal> = (1..=14).map(Decimal::from).collect();
        assert!(rsi(&prices, 14).is_empty());
    }

    #[test]
    fn flat_market_emits_fifty() {
        let prices = vec![dec!(2000); 20];
        let values = rsi(&prices, 14);
        assert!(!values.is_empty());
        assert!(values.iter().all(|v| *v == dec!(50)));
    }

    #[test]
    fn all_gains_emit_one_hundred() {
        let prices: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        let values = rsi(&prices, 14);
        assert!(values.iter().all(|v| *v == dec!(100)));
    }

    #[test]
    fn balanced_gains_and_losses_sit_at_fifty() {
        // alternate +1 / -1 over an even window
        let mut prices = vec![dec!(100)];
        for i in 0..20 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + dec!(1) } else { last - dec!(1) });
        }
        let values = rsi(&prices, 14);
        for v in values {
            assert!(v >= dec!(45) && v <= dec!(55), "rsi {} outside band", v);
        }
    }

    #[test]
    fn values_stay_in_range() {
        let prices = vec![
            dec!(2000), dec!(2003), dec!(2001), dec!(2004), dec!(2002), dec!(2006),
            dec!(2005), dec!(2008), dec!(2007), dec!(2010), dec!(2009), dec!(2012),
            dec!(2011), dec!(2013), dec!(2012), dec!(2015),
        ];
        for v in rsi(&prices, 14) {
            assert!(v >= Decimal::ZERO && v <= dec!(100));
        }
    }
}
