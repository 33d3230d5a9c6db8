use fxfloor_instrument::InstrumentSymbol;
use rust_decimal::Decimal;

/// Rate converting one unit of the instrument's quote currency into the account
/// currency at the provided mid price.
///
/// Identity when the pair is quoted in the account currency (eg/ EUR_USD on a USD
/// account); `1 / mid` when the account currency is the pair's base (eg/ USD_JPY on
/// a USD account). Cross pairs fall back to identity - the margin and NAV figures
/// derived from them are estimates, not booking values.
pub fn quote_to_account_rate(
    instrument: &InstrumentSymbol,
    mid: Decimal,
    account_currency: &str,
) -> Decimal {
    let mut parts = instrument.name().split('_');
    let base = parts.next().unwrap_or_default();
    let quote = parts.next().unwrap_or_default();

    if quote.eq_ignore_ascii_case(account_currency) {
        Decimal::ONE
    } else if base.eq_ignore_ascii_case(account_currency) && !mid.is_zero() {
        Decimal::ONE / mid
    } else {
        Decimal::ONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_currency_account_is_identity() {
        let rate = quote_to_account_rate(&InstrumentSymbol::new("EUR_USD"), dec!(1.0850), "USD");
        assert_eq!(rate, Decimal::ONE);
    }

    #[test]
    fn test_base_currency_account_inverts_mid() {
        let rate = quote_to_account_rate(&InstrumentSymbol::new("USD_JPY"), dec!(150), "USD");
        assert_eq!(rate, Decimal::ONE / dec!(150));
    }

    #[test]
    fn test_cross_pair_falls_back_to_identity() {
        let rate = quote_to_account_rate(&InstrumentSymbol::new("EUR_GBP"), dec!(0.8550), "USD");
        assert_eq!(rate, Decimal::ONE);
    }
}
