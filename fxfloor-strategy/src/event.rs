use chrono::{DateTime, Utc};
use derive_more::From;
use fxfloor_instrument::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::Error as DeError};
use serde_json::Value;
use smol_str::SmolStr;

/// Initial entry opened on a layer.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct InitialEntryEvent {
    pub time: DateTime<Utc>,
    pub layer: u32,
    pub direction: Direction,
    pub price: Decimal,
    pub units: i64,
    pub retracement_count: u32,
}

/// Scale-in entry opened after an adverse move hit the retracement trigger.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RetracementEvent {
    pub time: DateTime<Utc>,
    pub layer: u32,
    pub direction: Direction,
    pub price: Decimal,
    pub units: i64,
    pub retracement_count: u32,
}

/// Entry closed at its take-profit threshold, with realised P&L.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct TakeProfitEvent {
    pub time: DateTime<Utc>,
    pub layer: u32,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub units: i64,
    pub pnl: Decimal,
    pub pips: Decimal,
    pub retracement_count: u32,
}

/// New layer pushed after the active layer exhausted its retracements.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AddLayerEvent {
    pub time: DateTime<Utc>,
    pub layer: u32,
}

/// Emptied non-home layer removed; control returns down the return stack.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RemoveLayerEvent {
    pub time: DateTime<Utc>,
    pub layer: u32,
}

/// Volatility regime lock engaged or unwound.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct VolatilityLockEvent {
    pub time: DateTime<Utc>,
    pub reason: String,
    pub atr: Decimal,
    pub threshold: Decimal,
}

/// One mirror entry instruction produced by a hedge-neutralize.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct HedgeInstruction {
    pub source_entry_id: u64,
    pub layer: u32,
    pub direction: Direction,
    pub units: i64,
}

/// Mirror entries opened to zero net exposure during a volatility lock.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct VolatilityHedgeNeutralizeEvent {
    pub time: DateTime<Utc>,
    pub reason: String,
    pub atr: Decimal,
    pub threshold: Decimal,
    pub hedges: Vec<HedgeInstruction>,
}

/// Oldest entries force-closed to bring the margin ratio back to target.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct MarginProtectionEvent {
    pub time: DateTime<Utc>,
    pub reason: String,
    pub margin_ratio: Decimal,
    pub threshold: Decimal,
    pub positions_closed: u32,
    pub units_closed: i64,
}

/// Catch-all signal for event kinds without a dedicated value object.
///
/// Also the decode target for unknown event tags, so old persisted events never fail
/// to deserialise.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GenericSignalEvent {
    pub time: DateTime<Utc>,
    pub kind: SmolStr,
    #[serde(default)]
    pub data: Value,
}

/// Closed set of events a strategy can emit.
///
/// Serialised as a tagged union on `type`; decoding an unknown tag yields
/// [`StrategyEvent::GenericSignal`] rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, From)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyEvent {
    InitialEntry(InitialEntryEvent),
    Retracement(RetracementEvent),
    TakeProfit(TakeProfitEvent),
    AddLayer(AddLayerEvent),
    RemoveLayer(RemoveLayerEvent),
    VolatilityLock(VolatilityLockEvent),
    VolatilityHedgeNeutralize(VolatilityHedgeNeutralizeEvent),
    MarginProtection(MarginProtectionEvent),
    GenericSignal(GenericSignalEvent),
}

impl StrategyEvent {
    /// Event tag as serialised in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyEvent::InitialEntry(_) => "initial_entry",
            StrategyEvent::Retracement(_) => "retracement",
            StrategyEvent::TakeProfit(_) => "take_profit",
            StrategyEvent::AddLayer(_) => "add_layer",
            StrategyEvent::RemoveLayer(_) => "remove_layer",
            StrategyEvent::VolatilityLock(_) => "volatility_lock",
            StrategyEvent::VolatilityHedgeNeutralize(_) => "volatility_hedge_neutralize",
            StrategyEvent::MarginProtection(_) => "margin_protection",
            StrategyEvent::GenericSignal(_) => "generic_signal",
        }
    }

    /// Whether this event opens an entry (initial or scale-in).
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            StrategyEvent::InitialEntry(_) | StrategyEvent::Retracement(_)
        )
    }

    pub fn generic(
        time: DateTime<Utc>,
        kind: impl Into<SmolStr>,
        data: Value,
    ) -> Self {
        Self::GenericSignal(GenericSignalEvent {
            time,
            kind: kind.into(),
            data,
        })
    }
}

impl<'de> Deserialize<'de> for StrategyEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::missing_field("type"))?
            .to_owned();

        let decoded = match tag.as_str() {
            "initial_entry" => serde_json::from_value(value).map(StrategyEvent::InitialEntry),
            "retracement" => serde_json::from_value(value).map(StrategyEvent::Retracement),
            "take_profit" => serde_json::from_value(value).map(StrategyEvent::TakeProfit),
            "add_layer" => serde_json::from_value(value).map(StrategyEvent::AddLayer),
            "remove_layer" => serde_json::from_value(value).map(StrategyEvent::RemoveLayer),
            "volatility_lock" => serde_json::from_value(value).map(StrategyEvent::VolatilityLock),
            "volatility_hedge_neutralize" => {
                serde_json::from_value(value).map(StrategyEvent::VolatilityHedgeNeutralize)
            }
            "margin_protection" => {
                serde_json::from_value(value).map(StrategyEvent::MarginProtection)
            }
            "generic_signal" => serde_json::from_value(value).map(StrategyEvent::GenericSignal),
            // Unknown tags decode to a GenericSignal carrying the raw payload.
            _ => {
                let time = value
                    .get("time")
                    .and_then(|time| serde_json::from_value(time.clone()).ok())
                    .unwrap_or(DateTime::UNIX_EPOCH);
                return Ok(StrategyEvent::GenericSignal(GenericSignalEvent {
                    time,
                    kind: SmolStr::new(tag),
                    data: value,
                }));
            }
        };

        decoded.map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tagged_round_trip() {
        let event = StrategyEvent::InitialEntry(InitialEntryEvent {
            time: Utc::now(),
            layer: 0,
            direction: Direction::Long,
            price: dec!(1.0852),
            units: 1000,
            retracement_count: 0,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"initial_entry""#));
        assert_eq!(serde_json::from_str::<StrategyEvent>(&json).unwrap(), event);
    }

    #[test]
    fn test_unknown_tag_decodes_to_generic_signal() {
        let json = r#"{"type":"trailing_stop_moved","time":"2024-03-01T00:00:00Z","distance":"15"}"#;
        let event: StrategyEvent = serde_json::from_str(json).unwrap();

        let StrategyEvent::GenericSignal(signal) = event else {
            panic!("expected GenericSignal fallback");
        };
        assert_eq!(signal.kind, "trailing_stop_moved");
        assert_eq!(signal.data["distance"], "15");
    }

    #[test]
    fn test_missing_tag_is_an_error() {
        let json = r#"{"time":"2024-03-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<StrategyEvent>(json).is_err());
    }

    #[test]
    fn test_take_profit_round_trip_preserves_decimals() {
        let event = StrategyEvent::TakeProfit(TakeProfitEvent {
            time: Utc::now(),
            layer: 1,
            direction: Direction::Short,
            entry_price: dec!(149.500),
            exit_price: dec!(149.300),
            units: 2000,
            pnl: dec!(400.00),
            pips: dec!(20),
            retracement_count: 2,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(serde_json::from_value::<StrategyEvent>(json).unwrap(), event);
    }
}
