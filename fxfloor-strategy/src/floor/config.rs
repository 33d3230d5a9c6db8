use crate::error::StrategyError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use smol_str::SmolStr;

/// Parameter progression across an index (layer number or retracement count).
///
/// | mode | value at index i (0-based) |
/// |---|---|
/// | constant | base |
/// | additive | base + inc * i |
/// | subtractive | max(base - inc * i, floor) |
/// | multiplicative | base * 2^i |
/// | divisive | base / 2^i, clamped to floor |
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Progression {
    #[default]
    Constant,
    Additive,
    Subtractive,
    Multiplicative,
    Divisive,
}

impl Progression {
    /// Value of the progression at `index`, clamped below at `min`.
    pub fn value(&self, base: Decimal, increment: Decimal, index: u32, min: Decimal) -> Decimal {
        let result = match self {
            Progression::Constant => base,
            Progression::Additive => base + increment * Decimal::from(index),
            Progression::Subtractive => base - increment * Decimal::from(index),
            Progression::Multiplicative => base * Decimal::from(2u64.pow(index.min(62))),
            Progression::Divisive => base / Decimal::from(2u64.pow(index.min(62))),
        };
        result.max(min)
    }
}

/// Lot sizing mode for the Nth retracement scale-in of a layer.
pub type RetracementLotMode = Progression;

/// Technical method used to decide long vs short on entry.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMethod {
    #[default]
    Momentum,
    SmaCrossover,
    EmaCrossover,
    PriceVsSma,
    Rsi,
}

fn default_account_currency() -> SmolStr {
    SmolStr::new("USD")
}

fn default_max_layers() -> u32 {
    3
}

fn default_max_retracements() -> u32 {
    2
}

fn default_lookback() -> u32 {
    20
}

fn default_sma_fast() -> u32 {
    5
}

fn default_sma_slow() -> u32 {
    20
}

fn default_rsi_period() -> u32 {
    14
}

fn default_rsi_overbought() -> u32 {
    70
}

fn default_rsi_oversold() -> u32 {
    30
}

fn default_atr_period() -> u32 {
    14
}

fn default_atr_baseline_period() -> u32 {
    50
}

fn default_lock_multiplier() -> Decimal {
    Decimal::TWO
}

fn default_unlock_multiplier() -> Decimal {
    Decimal::new(12, 1)
}

fn default_margin_rate() -> Decimal {
    Decimal::new(4, 2)
}

fn default_margin_cut_start() -> Decimal {
    Decimal::new(6, 1)
}

fn default_margin_cut_target() -> Decimal {
    Decimal::new(5, 1)
}

fn default_spread_limit() -> Decimal {
    Decimal::from(5)
}

fn default_candle_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Floor strategy configuration.
///
/// Parsed from the schema-validated parameter map of a `StrategyConfig`. Required
/// fields mirror the declared schema; everything else falls back to the defaults
/// below.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FloorConfig {
    pub instrument: SmolStr,

    pub base_lot_size: Decimal,
    pub retracement_lot_mode: RetracementLotMode,
    pub retracement_lot_amount: Decimal,

    pub retracement_pips: Decimal,
    pub take_profit_pips: Decimal,
    #[serde(default = "default_max_layers")]
    pub max_layers: u32,
    #[serde(default = "default_max_retracements")]
    pub max_retracements_per_layer: u32,

    #[serde(default)]
    pub retracement_trigger_progression: Progression,
    #[serde(default)]
    pub retracement_trigger_increment: Decimal,
    #[serde(default)]
    pub lot_size_progression: Progression,
    #[serde(default)]
    pub lot_size_increment: Decimal,
    #[serde(default)]
    pub take_profit_progression: Progression,
    #[serde(default)]
    pub take_profit_increment: Decimal,

    #[serde(default = "default_lookback")]
    pub entry_signal_lookback_ticks: u32,
    #[serde(default)]
    pub direction_method: DirectionMethod,
    #[serde(default = "default_sma_fast")]
    pub sma_fast_period: u32,
    #[serde(default = "default_sma_slow")]
    pub sma_slow_period: u32,
    #[serde(default = "default_sma_fast")]
    pub ema_fast_period: u32,
    #[serde(default = "default_sma_slow")]
    pub ema_slow_period: u32,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: u32,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: u32,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: u32,

    #[serde(default)]
    pub volatility_check_enabled: bool,
    #[serde(default = "default_atr_period")]
    pub atr_period: u32,
    #[serde(default = "default_atr_baseline_period")]
    pub atr_baseline_period: u32,
    #[serde(default = "default_lock_multiplier")]
    pub volatility_lock_multiplier: Decimal,
    #[serde(default = "default_unlock_multiplier")]
    pub volatility_unlock_multiplier: Decimal,
    #[serde(default = "default_true")]
    pub hedging_enabled: bool,

    #[serde(default)]
    pub margin_protection_enabled: bool,
    #[serde(default = "default_margin_rate")]
    pub margin_rate: Decimal,
    #[serde(default = "default_margin_cut_start")]
    pub margin_cut_start_ratio: Decimal,
    #[serde(default = "default_margin_cut_target")]
    pub margin_cut_target_ratio: Decimal,

    #[serde(default)]
    pub dynamic_parameter_adjustment_enabled: bool,

    #[serde(default)]
    pub market_condition_override_enabled: bool,
    #[serde(default = "default_spread_limit")]
    pub market_condition_spread_limit_pips: Decimal,

    #[serde(default)]
    pub allow_duplicate_units: bool,

    #[serde(default = "default_candle_interval")]
    pub candle_interval_secs: u64,

    #[serde(default = "default_account_currency")]
    pub account_currency: SmolStr,
}

impl FloorConfig {
    /// Parse and sanity-check a configuration from its parameter map.
    pub fn from_params(params: &Value) -> Result<Self, StrategyError> {
        let config: FloorConfig = serde_json::from_value(params.clone())
            .map_err(|error| StrategyError::InvalidConfig(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StrategyError> {
        if self.base_lot_size <= Decimal::ZERO {
            return Err(StrategyError::field("base_lot_size"));
        }
        if self.retracement_pips <= Decimal::ZERO {
            return Err(StrategyError::field("retracement_pips"));
        }
        if self.take_profit_pips <= Decimal::ZERO {
            return Err(StrategyError::field("take_profit_pips"));
        }
        if self.max_layers == 0 {
            return Err(StrategyError::field("max_layers"));
        }
        if self.volatility_unlock_multiplier > self.volatility_lock_multiplier {
            return Err(StrategyError::InvalidConfig(
                "volatility_unlock_multiplier must not exceed volatility_lock_multiplier".into(),
            ));
        }
        if self.margin_cut_target_ratio > self.margin_cut_start_ratio {
            return Err(StrategyError::InvalidConfig(
                "margin_cut_target_ratio must not exceed margin_cut_start_ratio".into(),
            ));
        }
        Ok(())
    }

    /// Base lot size for a layer, before intra-layer retracement sizing.
    pub fn lot_size_for_layer(&self, layer_index: u32) -> Decimal {
        self.lot_size_progression.value(
            self.base_lot_size,
            self.lot_size_increment,
            layer_index,
            Decimal::new(1, 2),
        )
    }

    /// Retracement trigger threshold (pips) for a layer.
    pub fn retracement_trigger_for_layer(&self, layer_index: u32) -> Decimal {
        self.retracement_trigger_progression.value(
            self.retracement_pips,
            self.retracement_trigger_increment,
            layer_index,
            Decimal::ONE,
        )
    }

    /// Base take-profit threshold (pips) for a layer.
    pub fn take_profit_for_layer(&self, layer_index: u32) -> Decimal {
        self.take_profit_progression.value(
            self.take_profit_pips,
            self.take_profit_increment,
            layer_index,
            Decimal::ONE,
        )
    }

    /// Lot size for the Nth retracement scale-in (0-based retracement index).
    pub fn retracement_lots(&self, retracement_index: u32) -> Decimal {
        self.retracement_lot_mode.value(
            self.base_lot_size,
            self.retracement_lot_amount,
            retracement_index + 1,
            Decimal::new(1, 2),
        )
    }

    /// Longest indicator window the strategy reads, used to bound `price_history`.
    pub fn max_history_window(&self) -> usize {
        [
            self.entry_signal_lookback_ticks,
            self.sma_slow_period,
            self.ema_slow_period,
            self.rsi_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
        .max(2) as usize
    }

    /// Bound on retained candles - enough for the baseline ATR window.
    pub fn max_candles(&self) -> usize {
        (self.atr_baseline_period.max(self.atr_period) + 1) as usize
    }

    /// Declared parameter schema for Floor.
    pub fn schema() -> Value {
        json!({
            "display_name": "Floor Strategy",
            "type": "object",
            "properties": {
                "instrument": {"type": "string", "title": "Instrument"},
                "base_lot_size": {"type": "number", "title": "Base Lot Size"},
                "retracement_lot_mode": {
                    "type": "string",
                    "title": "Retracement Lot Mode",
                    "enum": ["constant", "additive", "subtractive", "multiplicative", "divisive"],
                },
                "retracement_lot_amount": {"type": "number", "title": "Retracement Lot Amount"},
                "retracement_pips": {"type": "number", "title": "Retracement Pips"},
                "take_profit_pips": {"type": "number", "title": "Take Profit Pips"},
                "max_layers": {"type": "integer", "title": "Maximum Layers"},
                "max_retracements_per_layer": {"type": "integer", "title": "Max Retracements Per Layer"},
                "retracement_trigger_progression": {
                    "type": "string",
                    "enum": ["constant", "additive", "subtractive", "multiplicative", "divisive"],
                },
                "retracement_trigger_increment": {"type": "number"},
                "lot_size_progression": {
                    "type": "string",
                    "enum": ["constant", "additive", "subtractive", "multiplicative", "divisive"],
                },
                "lot_size_increment": {"type": "number"},
                "take_profit_progression": {
                    "type": "string",
                    "enum": ["constant", "additive", "subtractive", "multiplicative", "divisive"],
                },
                "take_profit_increment": {"type": "number"},
                "entry_signal_lookback_ticks": {"type": "integer"},
                "direction_method": {
                    "type": "string",
                    "enum": ["momentum", "sma_crossover", "ema_crossover", "price_vs_sma", "rsi"],
                },
                "sma_fast_period": {"type": "integer"},
                "sma_slow_period": {"type": "integer"},
                "ema_fast_period": {"type": "integer"},
                "ema_slow_period": {"type": "integer"},
                "rsi_period": {"type": "integer"},
                "rsi_overbought": {"type": "integer"},
                "rsi_oversold": {"type": "integer"},
                "volatility_check_enabled": {"type": "boolean"},
                "atr_period": {"type": "integer"},
                "atr_baseline_period": {"type": "integer"},
                "volatility_lock_multiplier": {"type": "number"},
                "volatility_unlock_multiplier": {"type": "number"},
                "hedging_enabled": {"type": "boolean"},
                "margin_protection_enabled": {"type": "boolean"},
                "margin_rate": {"type": "number"},
                "margin_cut_start_ratio": {"type": "number"},
                "margin_cut_target_ratio": {"type": "number"},
                "dynamic_parameter_adjustment_enabled": {"type": "boolean"},
                "market_condition_override_enabled": {"type": "boolean"},
                "market_condition_spread_limit_pips": {"type": "number"},
                "allow_duplicate_units": {"type": "boolean"},
                "candle_interval_secs": {"type": "integer"},
                "account_currency": {"type": "string"},
            },
            "required": [
                "instrument",
                "base_lot_size",
                "retracement_lot_mode",
                "retracement_lot_amount",
                "retracement_pips",
                "take_profit_pips",
            ],
        })
    }
}
