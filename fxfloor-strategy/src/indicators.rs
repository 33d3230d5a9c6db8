use rust_decimal::Decimal;

/// Simple moving average of the provided window.
///
/// Returns zero for an empty window.
pub fn sma(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().sum::<Decimal>() / Decimal::from(values.len() as u64)
}

/// Exponential moving average over the provided window, seeded from the first value.
pub fn ema(values: &[Decimal], period: usize) -> Decimal {
    let Some(first) = values.first() else {
        return Decimal::ZERO;
    };
    let k = Decimal::TWO / (Decimal::from(period as u64) + Decimal::ONE);
    values
        .iter()
        .skip(1)
        .fold(*first, |ema, value| (*value * k) + (ema * (Decimal::ONE - k)))
}

/// Relative strength index over the trailing `period` deltas.
///
/// Returns the neutral 50 when the window is too short, and 100 when there are no
/// losses in the window.
pub fn rsi(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period + 1 {
        return Decimal::from(50);
    }

    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;
    let start = values.len() - period;
    for i in start..values.len() {
        let delta = values[i] - values[i - 1];
        if delta >= Decimal::ZERO {
            gains += delta;
        } else {
            losses -= delta;
        }
    }

    let period = Decimal::from(period as u64);
    let avg_gain = gains / period;
    let avg_loss = losses / period;
    if avg_loss.is_zero() {
        return Decimal::ONE_HUNDRED;
    }

    let rs = avg_gain / avg_loss;
    Decimal::ONE_HUNDRED - (Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}
