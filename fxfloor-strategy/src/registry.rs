use crate::{
    Strategy, TradingMode,
    error::StrategyError,
    floor::{FLOOR_STRATEGY_TYPE, FloorStrategy, config::FloorConfig},
    schema,
};
use serde_json::Value;
use smol_str::SmolStr;
use std::{collections::HashMap, fmt, sync::Arc};

/// Factory building a strategy instance from its validated parameter map.
pub type StrategyBuilder =
    Arc<dyn Fn(&Value, TradingMode) -> Result<Arc<dyn Strategy>, StrategyError> + Send + Sync>;

/// One registered strategy: display metadata, declared parameter schema, builder.
#[derive(Clone)]
pub struct StrategyDefinition {
    pub strategy_type: SmolStr,
    pub display_name: SmolStr,
    pub schema: Value,
    builder: StrategyBuilder,
}

impl fmt::Debug for StrategyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyDefinition")
            .field("strategy_type", &self.strategy_type)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Registry of available strategies keyed by strategy type.
///
/// Dispatch is data-driven - no inheritance, just a tagged lookup from the
/// `strategy_type` stored on a `StrategyConfig` to a definition.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<SmolStr, StrategyDefinition>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with every built-in strategy.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(StrategyDefinition {
            strategy_type: SmolStr::new(FLOOR_STRATEGY_TYPE),
            display_name: SmolStr::new("Floor Strategy"),
            schema: FloorConfig::schema(),
            builder: Arc::new(|params, trading_mode| {
                Ok(Arc::new(FloorStrategy::from_params(params, trading_mode)?))
            }),
        });
        registry
    }

    pub fn register(&mut self, definition: StrategyDefinition) {
        self.strategies
            .insert(definition.strategy_type.clone(), definition);
    }

    pub fn get(&self, strategy_type: &str) -> Option<&StrategyDefinition> {
        self.strategies.get(strategy_type)
    }

    pub fn strategy_types(&self) -> impl Iterator<Item = &SmolStr> {
        self.strategies.keys()
    }

    /// Validate a parameter map against the declared schema of `strategy_type`.
    pub fn validate_params(&self, strategy_type: &str, params: &Value) -> Result<(), StrategyError> {
        let definition = self
            .get(strategy_type)
            .ok_or_else(|| StrategyError::UnknownStrategyType(strategy_type.to_string()))?;
        schema::validate(&definition.schema, params)
    }

    /// Validate and build a strategy instance.
    pub fn build(
        &self,
        strategy_type: &str,
        params: &Value,
        trading_mode: TradingMode,
    ) -> Result<Arc<dyn Strategy>, StrategyError> {
        let definition = self
            .get(strategy_type)
            .ok_or_else(|| StrategyError::UnknownStrategyType(strategy_type.to_string()))?;
        schema::validate(&definition.schema, params)?;
        (definition.builder)(params, trading_mode)
    }
}
