use crate::{error::StrategyError, floor::candle::Candle};
use chrono::{DateTime, Utc};
use fxfloor_instrument::Direction;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run status of a strategy instance.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    #[default]
    Running,
    Paused,
    Stopped,
}

/// One open entry on a layer.
///
/// Hedge entries mirror a source entry during a volatility lock; they reference the
/// source by id (never by owning reference - entry links are always ids).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OpenEntry {
    pub entry_id: u64,
    pub layer_index: u32,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub units: i64,
    pub take_profit_pips: Decimal,
    pub opened_at: DateTime<Utc>,
    pub is_initial: bool,
    #[serde(default)]
    pub is_hedge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entry_id: Option<u64>,
}

/// Per-tick observability written back into the state for replay visualisation.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct FloorMetrics {
    #[serde(default)]
    pub take_profit_count: u64,
    #[serde(default)]
    pub retracement_entry_count: u64,
    #[serde(default)]
    pub margin_ratio: Decimal,
    #[serde(default)]
    pub current_atr: Decimal,
    #[serde(default)]
    pub baseline_atr: Decimal,
    #[serde(default)]
    pub volatility_threshold: Decimal,
}

/// Complete Floor strategy state.
///
/// Opaque to the engine: checkpointed to the task record as JSON after every tick
/// and restored losslessly (`from_value . to_value = id`).
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct FloorState {
    #[serde(default)]
    pub status: StrategyStatus,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub ticks_seen: u64,

    /// Recent mid prices, trimmed to the largest indicator window.
    #[serde(default)]
    pub price_history: Vec<Decimal>,
    /// Fixed-interval candles retained for ATR estimation.
    #[serde(default)]
    pub candles: Vec<Candle>,

    #[serde(default)]
    pub open_entries: Vec<OpenEntry>,
    #[serde(default)]
    pub next_entry_id: u64,

    #[serde(default)]
    pub layer_directions: IndexMap<u32, Direction>,
    #[serde(default)]
    pub layer_retracement_counts: IndexMap<u32, u32>,
    /// Weighted-average entry price per layer. Indicator input only - booking
    /// always uses per-entry prices.
    #[serde(default)]
    pub layer_entry_prices: IndexMap<u32, Decimal>,

    #[serde(default)]
    pub active_layer_index: u32,
    #[serde(default)]
    pub home_layer_index: u32,
    #[serde(default)]
    pub return_stack: Vec<u32>,

    #[serde(default)]
    pub volatility_locked: bool,
    #[serde(default)]
    pub hedge_neutralized: bool,
    #[serde(default)]
    pub hedge_entry_ids: Vec<u64>,
    #[serde(default)]
    pub lock_reason: String,

    #[serde(default)]
    pub account_balance: Decimal,
    #[serde(default)]
    pub account_nav: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bid: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ask: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mid: Option<Decimal>,

    #[serde(default)]
    pub metrics: FloorMetrics,
}

impl FloorState {
    /// Restore state from its checkpointed JSON form. `Null` yields a fresh state.
    pub fn from_value(value: Value) -> Result<Self, StrategyError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|error| StrategyError::CorruptState(error.to_string()))
    }

    /// Checkpoint the state to its JSON form.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Allocate the next entry id.
    pub fn allocate_entry_id(&mut self) -> u64 {
        let id = self.next_entry_id;
        self.next_entry_id += 1;
        id
    }

    /// Open entries on the provided layer.
    pub fn layer_entries(&self, layer_index: u32) -> Vec<&OpenEntry> {
        self.open_entries
            .iter()
            .filter(|entry| entry.layer_index == layer_index)
            .collect()
    }

    /// Remove the entry with the provided id, if present.
    pub fn remove_entry(&mut self, entry_id: u64) {
        self.open_entries.retain(|entry| entry.entry_id != entry_id);
    }

    /// Recompute per-layer retracement counts from the remaining entries, so closed
    /// entries subtract without resetting the count to zero.
    pub fn recompute_layer_retracements(&mut self) {
        let mut counts: IndexMap<u32, u32> = IndexMap::new();
        let mut initials: IndexMap<u32, u32> = IndexMap::new();
        for entry in &self.open_entries {
            *counts.entry(entry.layer_index).or_default() += 1;
            if entry.is_initial {
                *initials.entry(entry.layer_index).or_default() += 1;
            }
        }
        for (layer, total) in counts {
            let initial = initials.get(&layer).copied().unwrap_or_default();
            self.layer_retracement_counts
                .insert(layer, total.saturating_sub(initial));
        }
    }

    /// Refresh the weighted-average entry price for the provided layer.
    pub fn update_layer_entry_price(&mut self, layer_index: u32) {
        let mut weighted = Decimal::ZERO;
        let mut total_units = Decimal::ZERO;
        for entry in self.open_entries.iter().filter(|entry| {
            entry.layer_index == layer_index && !entry.is_hedge
        }) {
            let units = Decimal::from(entry.units);
            weighted += entry.entry_price * units;
            total_units += units;
        }
        if total_units > Decimal::ZERO {
            self.layer_entry_prices
                .insert(layer_index, weighted / total_units);
        } else {
            self.layer_entry_prices.shift_remove(&layer_index);
        }
    }

    /// Reset layer bookkeeping so the strategy re-enters fresh.
    pub fn reset_layers(&mut self) {
        self.layer_retracement_counts.clear();
        self.layer_directions.clear();
        self.layer_entry_prices.clear();
        self.return_stack.clear();
        self.active_layer_index = 0;
        self.home_layer_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(entry_id: u64, layer_index: u32, is_initial: bool) -> OpenEntry {
        OpenEntry {
            entry_id,
            layer_index,
            direction: Direction::Long,
            entry_price: dec!(1.0850),
            units: 1000,
            take_profit_pips: dec!(20),
            opened_at: Utc::now(),
            is_initial,
            is_hedge: false,
            source_entry_id: None,
        }
    }

    #[test]
    fn test_null_state_is_fresh() {
        let state = FloorState::from_value(Value::Null).unwrap();
        assert_eq!(state, FloorState::default());
        assert_eq!(state.status, StrategyStatus::Running);
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let mut state = FloorState::default();
        state.ticks_seen = 42;
        state.price_history = vec![dec!(1.0850), dec!(1.0851)];
        state.open_entries = vec![entry(0, 0, true), entry(1, 0, false)];
        state.next_entry_id = 2;
        state.layer_directions.insert(0, Direction::Long);
        state.layer_retracement_counts.insert(0, 1);
        state.return_stack = vec![0];
        state.active_layer_index = 1;
        state.lock_reason = "[CLOSE] atr spike".into();
        state.account_balance = dec!(10000);
        state.last_mid = Some(dec!(1.0850));
        state.metrics.take_profit_count = 3;

        let restored = FloorState::from_value(state.to_value()).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_recompute_layer_retracements_counts_non_initials() {
        let mut state = FloorState::default();
        state.open_entries = vec![
            entry(0, 0, true),
            entry(1, 0, false),
            entry(2, 0, false),
            entry(3, 1, true),
        ];
        state.recompute_layer_retracements();

        assert_eq!(state.layer_retracement_counts.get(&0), Some(&2));
        assert_eq!(state.layer_retracement_counts.get(&1), Some(&0));
    }

    #[test]
    fn test_weighted_average_layer_entry_price() {
        let mut state = FloorState::default();
        let mut cheap = entry(0, 0, true);
        cheap.entry_price = dec!(1.0000);
        cheap.units = 1000;
        let mut dear = entry(1, 0, false);
        dear.entry_price = dec!(1.0100);
        dear.units = 3000;
        state.open_entries = vec![cheap, dear];

        state.update_layer_entry_price(0);
        assert_eq!(state.layer_entry_prices.get(&0), Some(&dec!(1.0075)));
    }
}
