use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Broker API environment.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[display("practice")]
    Practice,
    #[display("live")]
    Live,
}

/// Regulatory jurisdiction the account trades under.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Jurisdiction {
    /// Hedging permitted, LIFO closes allowed.
    #[display("japan")]
    Japan,
    /// FIFO close ordering enforced, no hedging (NFA rules).
    #[display("united_states")]
    #[serde(rename = "united_states")]
    UnitedStates,
    #[display("other")]
    Other,
}

impl Jurisdiction {
    /// Whether simultaneous long/short exposure must be netted (FIFO closes).
    pub fn is_netting(&self) -> bool {
        matches!(self, Jurisdiction::UnitedStates)
    }
}

/// A brokerage account a trading task executes against.
///
/// The API token is decrypted by the persistence layer before this struct is built;
/// it never appears in Debug output or logs.
#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BrokerAccount {
    pub id: SmolStr,
    pub owner: SmolStr,
    pub broker_account_id: SmolStr,
    pub api_token: String,
    pub environment: Environment,
    pub jurisdiction: Jurisdiction,
    pub currency: SmolStr,
    pub balance: Decimal,
    pub is_active: bool,
}

impl std::fmt::Debug for BrokerAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAccount")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("broker_account_id", &self.broker_account_id)
            .field("api_token", &"<redacted>")
            .field("environment", &self.environment)
            .field("jurisdiction", &self.jurisdiction)
            .field("currency", &self.currency)
            .field("balance", &self.balance)
            .field("is_active", &self.is_active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn account() -> BrokerAccount {
        BrokerAccount {
            id: SmolStr::new("acct-1"),
            owner: SmolStr::new("user-1"),
            broker_account_id: SmolStr::new("001-001-1234567-001"),
            api_token: "s3cret-api-token".into(),
            environment: Environment::Practice,
            jurisdiction: Jurisdiction::Japan,
            currency: SmolStr::new("USD"),
            balance: dec!(10000),
            is_active: true,
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let output = format!("{:?}", account());
        assert!(output.contains("<redacted>"));
        assert!(!output.contains("s3cret"));
    }

    #[test]
    fn test_us_jurisdiction_is_netting() {
        assert!(Jurisdiction::UnitedStates.is_netting());
        assert!(!Jurisdiction::Japan.is_netting());
    }
}
