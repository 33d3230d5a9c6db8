use derive_more::{Constructor, Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Unique identifier for a currency pair, in broker notation.
///
/// eg/ InstrumentSymbol("EUR_USD")
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct InstrumentSymbol(pub SmolStr);

impl InstrumentSymbol {
    pub fn new<S>(symbol: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self(symbol.into())
    }

    pub fn name(&self) -> &str {
        self.0.as_str()
    }

    /// Construct from a base and quote currency.
    ///
    /// eg/ InstrumentSymbol::from_base_quote("EUR", "USD") -> "EUR_USD"
    pub fn from_base_quote(base: &str, quote: &str) -> Self {
        Self(format_smolstr!(
            "{}_{}",
            base.to_uppercase(),
            quote.to_uppercase()
        ))
    }

    /// Quote currency of the pair, if the symbol is in BASE_QUOTE notation.
    pub fn quote_currency(&self) -> Option<&str> {
        self.0.as_str().split('_').nth(1)
    }
}

impl From<&str> for InstrumentSymbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Immutable configuration of a tradeable currency pair.
///
/// `pip_size` is the conventional smallest price increment (0.0001 for most pairs,
/// 0.01 for JPY-quoted pairs). `lot_unit_size` converts strategy lot sizes into
/// broker units.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Instrument {
    pub symbol: InstrumentSymbol,
    pub pip_size: Decimal,
    pub lot_unit_size: Decimal,
}

impl Instrument {
    /// Standard lot unit size used by the OANDA v20 brokerage.
    pub const DEFAULT_LOT_UNIT_SIZE: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

    /// Construct a forex [`Instrument`], deriving the pip size from the quote currency.
    pub fn forex<S>(symbol: S) -> Self
    where
        S: Into<InstrumentSymbol>,
    {
        let symbol = symbol.into();
        let pip_size = pip_size_for(&symbol);
        Self {
            symbol,
            pip_size,
            lot_unit_size: Self::DEFAULT_LOT_UNIT_SIZE,
        }
    }

    /// Pips between two prices for this [`Instrument`].
    ///
    /// Positive when `to > from`.
    pub fn pips_between(&self, from: Decimal, to: Decimal) -> Decimal {
        (to - from) / self.pip_size
    }

    /// Price distance of the provided number of pips.
    pub fn pips_to_price(&self, pips: Decimal) -> Decimal {
        pips * self.pip_size
    }
}

/// Conventional pip size for a currency pair - 0.01 for JPY-quoted pairs,
/// 0.0001 otherwise.
pub fn pip_size_for(symbol: &InstrumentSymbol) -> Decimal {
    match symbol.quote_currency() {
        Some("JPY") => Decimal::new(1, 2),
        _ => Decimal::new(1, 4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pip_size_for_standard_pair() {
        assert_eq!(pip_size_for(&InstrumentSymbol::new("EUR_USD")), dec!(0.0001));
        assert_eq!(pip_size_for(&InstrumentSymbol::new("GBP_USD")), dec!(0.0001));
    }

    #[test]
    fn test_pip_size_for_jpy_pair() {
        assert_eq!(pip_size_for(&InstrumentSymbol::new("USD_JPY")), dec!(0.01));
        assert_eq!(pip_size_for(&InstrumentSymbol::new("EUR_JPY")), dec!(0.01));
    }

    #[test]
    fn test_pips_between() {
        let instrument = Instrument::forex("EUR_USD");
        assert_eq!(instrument.pips_between(dec!(1.0850), dec!(1.0870)), dec!(20));
        assert_eq!(instrument.pips_between(dec!(1.0870), dec!(1.0850)), dec!(-20));

        let jpy = Instrument::forex("USD_JPY");
        assert_eq!(jpy.pips_between(dec!(149.50), dec!(149.70)), dec!(20));
    }

    #[test]
    fn test_symbol_from_base_quote() {
        assert_eq!(
            InstrumentSymbol::from_base_quote("eur", "usd"),
            InstrumentSymbol::new("EUR_USD")
        );
    }

    #[test]
    fn test_instrument_serde_round_trip() {
        let instrument = Instrument::forex("USD_JPY");
        let json = serde_json::to_string(&instrument).unwrap();
        let decoded: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(instrument, decoded);
    }
}
