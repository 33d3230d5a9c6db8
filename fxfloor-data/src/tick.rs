use crate::error::DataError;
use chrono::{DateTime, Utc};
use fxfloor_instrument::InstrumentSymbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One quote sample for an instrument.
///
/// Invariant: `bid <= mid <= ask`, with `mid = (bid + ask) / 2` when the feed does
/// not supply one. All prices are arbitrary-precision decimals.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Tick {
    pub instrument: InstrumentSymbol,
    pub time: DateTime<Utc>,
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
}

impl Tick {
    /// Construct a [`Tick`], deriving the mid price from bid and ask.
    pub fn new(
        instrument: InstrumentSymbol,
        time: DateTime<Utc>,
        bid: Decimal,
        ask: Decimal,
    ) -> Result<Self, DataError> {
        if bid > ask {
            return Err(DataError::InvalidSpread { bid, ask });
        }
        Ok(Self {
            instrument,
            time,
            bid,
            ask,
            mid: (bid + ask) / Decimal::TWO,
        })
    }

    /// Construct a [`Tick`] with a feed-supplied mid price.
    pub fn with_mid(
        instrument: InstrumentSymbol,
        time: DateTime<Utc>,
        bid: Decimal,
        ask: Decimal,
        mid: Decimal,
    ) -> Result<Self, DataError> {
        if bid > ask {
            return Err(DataError::InvalidSpread { bid, ask });
        }
        if mid < bid || mid > ask {
            return Err(DataError::MidOutsideSpread { bid, mid, ask });
        }
        Ok(Self {
            instrument,
            time,
            bid,
            ask,
            mid,
        })
    }

    /// Construct a [`Tick`] from a mid-only quote (older history sets), treating the
    /// mid as both bid and ask.
    pub fn from_mid(instrument: InstrumentSymbol, time: DateTime<Utc>, mid: Decimal) -> Self {
        Self {
            instrument,
            time,
            bid: mid,
            ask: mid,
            mid,
        }
    }

    /// Absolute bid/ask spread.
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn symbol() -> InstrumentSymbol {
        InstrumentSymbol::new("EUR_USD")
    }

    #[test]
    fn test_mid_derived_from_bid_ask() {
        let tick = Tick::new(symbol(), Utc::now(), dec!(1.0848), dec!(1.0852)).unwrap();
        assert_eq!(tick.mid, dec!(1.0850));
        assert_eq!(tick.spread(), dec!(0.0004));
    }

    #[test]
    fn test_inverted_spread_rejected() {
        let error = Tick::new(symbol(), Utc::now(), dec!(1.0852), dec!(1.0848)).unwrap_err();
        assert!(matches!(error, DataError::InvalidSpread { .. }));
    }

    #[test]
    fn test_supplied_mid_must_sit_inside_spread() {
        let error = Tick::with_mid(
            symbol(),
            Utc::now(),
            dec!(1.0848),
            dec!(1.0852),
            dec!(1.0860),
        )
        .unwrap_err();
        assert!(matches!(error, DataError::MidOutsideSpread { .. }));
    }

    #[test]
    fn test_tick_serde_round_trip() {
        let tick = Tick::new(symbol(), Utc::now(), dec!(1.0848), dec!(1.0852)).unwrap();
        let json = serde_json::to_string(&tick).unwrap();
        assert_eq!(serde_json::from_str::<Tick>(&json).unwrap(), tick);
    }
}
