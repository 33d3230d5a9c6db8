use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One fixed-interval OHLC candle aggregated from mid prices.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Bucket start for the candle containing `time`.
fn bucket_start(time: DateTime<Utc>, interval_secs: u64) -> DateTime<Utc> {
    let interval = interval_secs.max(1) as i64;
    let secs = time.timestamp().div_euclid(interval) * interval;
    Utc.timestamp_opt(secs, 0).single().unwrap_or(time)
}

/// Fold a mid price into the candle series, trimming retention to `max_candles`.
pub fn update(
    candles: &mut Vec<Candle>,
    interval_secs: u64,
    time: DateTime<Utc>,
    mid: Decimal,
    max_candles: usize,
) {
    let start = bucket_start(time, interval_secs);

    match candles.last_mut() {
        Some(last) if last.start == start => {
            last.high = last.high.max(mid);
            last.low = last.low.min(mid);
            last.close = mid;
        }
        _ => {
            candles.push(Candle {
                start,
                open: mid,
                high: mid,
                low: mid,
                close: mid,
            });
            if candles.len() > max_candles {
                let excess = candles.len() - max_candles;
                candles.drain(..excess);
            }
        }
    }
}

/// Average true range over the trailing `period` candles, in pips.
///
/// Returns zero when fewer than two candles exist.
pub fn atr_pips(candles: &[Candle], period: u32, pip_size: Decimal) -> Decimal {
    if candles.len() < 2 || pip_size.is_zero() {
        return Decimal::ZERO;
    }

    let true_ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let current = &pair[1];
            let range = current.high - current.low;
            let high_gap = (current.high - prev_close).abs();
            let low_gap = (current.low - prev_close).abs();
            range.max(high_gap).max(low_gap) / pip_size
        })
        .collect();

    let window_len = (period.max(1) as usize).min(true_ranges.len());
    let window = &true_ranges[true_ranges.len() - window_len..];
    window.iter().sum::<Decimal>() / Decimal::from(window_len as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    fn time(secs: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_update_aggregates_within_bucket() {
        let mut candles = Vec::new();
        update(&mut candles, 60, time(0), dec!(100), 10);
        update(&mut candles, 60, time(30), dec!(102), 10);
        update(&mut candles, 60, time(59), dec!(99), 10);

        assert_eq!(candles.len(), 1);
        let candle = &candles[0];
        assert_eq!(candle.open, dec!(100));
        assert_eq!(candle.high, dec!(102));
        assert_eq!(candle.low, dec!(99));
        assert_eq!(candle.close, dec!(99));
    }

    #[test]
    fn test_update_rolls_to_new_bucket_and_trims() {
        let mut candles = Vec::new();
        for minute in 0..5 {
            update(&mut candles, 60, time(minute * 60), dec!(100), 3);
        }
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].start, time(120));
    }

    #[test]
    fn test_atr_over_constant_range() {
        let mut candles = Vec::new();
        for minute in 0..10 {
            update(&mut candles, 60, time(minute * 60), dec!(1.0850), 20);
            update(&mut candles, 60, time(minute * 60 + 30), dec!(1.0860), 20);
        }
        // Each candle spans 10 pips; consecutive closes leave TR at 10 pips.
        let atr = atr_pips(&candles, 5, dec!(0.0001));
        assert_eq!(atr, dec!(10));
    }

    #[test]
    fn test_atr_zero_without_history() {
        assert_eq!(atr_pips(&[], 14, dec!(0.0001)), Decimal::ZERO);
    }
}
