use crate::{
    Strategy, StrategyResult, TradingMode,
    convert::quote_to_account_rate,
    error::StrategyError,
    event::{
        AddLayerEvent, HedgeInstruction, InitialEntryEvent, MarginProtectionEvent,
        RemoveLayerEvent, RetracementEvent, StrategyEvent, TakeProfitEvent,
        VolatilityHedgeNeutralizeEvent, VolatilityLockEvent,
    },
    floor::{
        candle,
        config::{DirectionMethod, FloorConfig},
        state::{FloorState, OpenEntry, StrategyStatus},
    },
    indicators::{ema, rsi, sma},
};
use fxfloor_data::Tick;
use fxfloor_instrument::{Direction, Instrument};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Layered Floor strategy engine.
///
/// Pure per-tick transition: all side effects are realised by downstream handlers
/// consuming the emitted events. Reads no clock other than `tick.time`.
#[derive(Debug, Clone)]
pub struct FloorStrategy {
    instrument: Instrument,
    config: FloorConfig,
    trading_mode: TradingMode,
}

impl FloorStrategy {
    pub fn new(config: FloorConfig, trading_mode: TradingMode) -> Self {
        let instrument = Instrument::forex(config.instrument.as_str());
        Self {
            instrument,
            config,
            trading_mode,
        }
    }

    /// Build from a schema-validated parameter map.
    pub fn from_params(params: &Value, trading_mode: TradingMode) -> Result<Self, StrategyError> {
        Ok(Self::new(FloorConfig::from_params(params)?, trading_mode))
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn config(&self) -> &FloorConfig {
        &self.config
    }

    fn price_for_open(&self, direction: Direction, tick: &Tick) -> Decimal {
        match direction {
            Direction::Long => tick.ask,
            Direction::Short => tick.bid,
        }
    }

    fn price_for_close(&self, direction: Direction, tick: &Tick) -> Decimal {
        match direction {
            Direction::Long => tick.bid,
            Direction::Short => tick.ask,
        }
    }

    /// Unrealised pips of an entry, marked at the closing side of the book.
    fn pips_for_entry(&self, direction: Direction, entry_price: Decimal, tick: &Tick) -> Decimal {
        match direction {
            Direction::Long => self.instrument.pips_between(entry_price, tick.bid),
            Direction::Short => self.instrument.pips_between(tick.ask, entry_price),
        }
    }

    /// Adverse pips from an entry, marked at the opening side of the book.
    fn adverse_pips(&self, direction: Direction, entry_price: Decimal, tick: &Tick) -> Decimal {
        match direction {
            Direction::Long => self.instrument.pips_between(tick.ask, entry_price),
            Direction::Short => self.instrument.pips_between(entry_price, tick.bid),
        }
    }

    fn spread_pips(&self, tick: &Tick) -> Decimal {
        tick.spread() / self.instrument.pip_size
    }

    fn conversion_rate(&self, tick: &Tick) -> Decimal {
        quote_to_account_rate(
            &self.instrument.symbol,
            tick.mid,
            self.config.account_currency.as_str(),
        )
    }

    fn choose_direction(&self, state: &FloorState) -> Direction {
        let history = &state.price_history;
        let momentum = |history: &[Decimal]| {
            if history.len() < 2 || history[history.len() - 1] >= history[0] {
                Direction::Long
            } else {
                Direction::Short
            }
        };

        match self.config.direction_method {
            DirectionMethod::SmaCrossover => {
                let slow = self.config.sma_slow_period as usize;
                let fast = self.config.sma_fast_period as usize;
                if history.len() < slow {
                    return Direction::Long;
                }
                if sma(&history[history.len() - fast..]) >= sma(&history[history.len() - slow..]) {
                    Direction::Long
                } else {
                    Direction::Short
                }
            }
            DirectionMethod::EmaCrossover => {
                let slow = self.config.ema_slow_period as usize;
                let fast = self.config.ema_fast_period as usize;
                if history.len() < slow {
                    return Direction::Long;
                }
                let fast_ema = ema(&history[history.len() - fast..], fast);
                let slow_ema = ema(&history[history.len() - slow..], slow);
                if fast_ema >= slow_ema {
                    Direction::Long
                } else {
                    Direction::Short
                }
            }
            DirectionMethod::PriceVsSma => {
                let slow = self.config.sma_slow_period as usize;
                if history.len() < slow {
                    return Direction::Long;
                }
                if history[history.len() - 1] >= sma(&history[history.len() - slow..]) {
                    Direction::Long
                } else {
                    Direction::Short
                }
            }
            DirectionMethod::Rsi => {
                let value = rsi(history, self.config.rsi_period as usize);
                if value <= Decimal::from(self.config.rsi_oversold) {
                    Direction::Long
                } else if value >= Decimal::from(self.config.rsi_overbought) {
                    Direction::Short
                } else {
                    momentum(history)
                }
            }
            DirectionMethod::Momentum => momentum(history),
        }
    }

    fn lots_to_units(&self, lots: Decimal) -> i64 {
        let raw = lots * self.instrument.lot_unit_size;
        raw.trunc().try_into().unwrap_or(i64::MAX).max(1)
    }

    /// Units for a new entry, bumped to avoid colliding with an existing entry of
    /// the same size on the same layer unless duplicates are allowed.
    fn entry_units(&self, state: &FloorState, layer_index: u32, lots: Decimal) -> i64 {
        let mut units = self.lots_to_units(lots);
        if self.config.allow_duplicate_units {
            return units;
        }

        let existing: Vec<i64> = state
            .layer_entries(layer_index)
            .iter()
            .map(|entry| entry.units)
            .collect();
        while existing.contains(&units) {
            units += 1;
        }
        units
    }

    fn estimate_unrealized(&self, state: &FloorState, tick: &Tick) -> Decimal {
        let conversion = self.conversion_rate(tick);
        state
            .open_entries
            .iter()
            .map(|entry| {
                let pnl_pips = self.pips_for_entry(entry.direction, entry.entry_price, tick);
                pnl_pips * self.instrument.pip_size * Decimal::from(entry.units) * conversion
            })
            .sum()
    }

    /// NAV = balance + sum of unrealised P&L per entry. Refreshed into the state.
    fn estimate_nav(&self, state: &mut FloorState, tick: &Tick) -> Decimal {
        state.account_nav = state.account_balance + self.estimate_unrealized(state, tick);
        state.account_nav
    }

    /// Margin ratio = required margin / NAV. 0 with no exposure; saturated high when
    /// NAV is non-positive.
    fn margin_ratio(&self, state: &mut FloorState, tick: &Tick) -> Decimal {
        let total_units: i64 = state.open_entries.iter().map(|entry| entry.units.abs()).sum();
        if total_units <= 0 {
            return Decimal::ZERO;
        }
        let nav = self.estimate_nav(state, tick);
        if nav <= Decimal::ZERO {
            return Decimal::from(999);
        }
        let conversion = self.conversion_rate(tick);
        let required =
            tick.mid * Decimal::from(total_units) * self.config.margin_rate * conversion;
        required / nav
    }

    fn current_atr(&self, state: &FloorState) -> Decimal {
        candle::atr_pips(
            &state.candles,
            self.config.atr_period,
            self.instrument.pip_size,
        )
    }

    fn baseline_atr(&self, state: &FloorState) -> Decimal {
        candle::atr_pips(
            &state.candles,
            self.config.atr_baseline_period,
            self.instrument.pip_size,
        )
    }

    /// ATR-regime scale applied to take-profit and retracement thresholds when
    /// dynamic parameter adjustment is enabled.
    fn dynamic_scale(&self, state: &FloorState) -> Decimal {
        if !self.config.dynamic_parameter_adjustment_enabled {
            return Decimal::ONE;
        }
        let baseline = self.baseline_atr(state);
        if baseline <= Decimal::ZERO {
            return Decimal::ONE;
        }
        let ratio = self.current_atr(state) / baseline;
        if ratio >= Decimal::TWO {
            Decimal::new(15, 1)
        } else if ratio <= Decimal::new(7, 1) {
            Decimal::new(8, 1)
        } else {
            Decimal::ONE
        }
    }

    fn effective_take_profit(&self, state: &FloorState, layer_index: u32) -> Decimal {
        self.config.take_profit_for_layer(layer_index) * self.dynamic_scale(state)
    }

    fn effective_retracement_trigger(&self, state: &FloorState, layer_index: u32) -> Decimal {
        self.config.retracement_trigger_for_layer(layer_index) * self.dynamic_scale(state)
    }

    fn is_bad_market_condition(&self, tick: &Tick) -> bool {
        self.config.market_condition_override_enabled
            && self.spread_pips(tick) >= self.config.market_condition_spread_limit_pips
    }

    /// Open an entry on a layer, returning the matching event.
    fn open_entry(
        &self,
        state: &mut FloorState,
        tick: &Tick,
        layer_index: u32,
        direction: Direction,
        units: i64,
        take_profit_pips: Decimal,
        is_initial: bool,
    ) -> StrategyEvent {
        let entry_price = self.price_for_open(direction, tick);
        let entry_id = state.allocate_entry_id();

        state.layer_directions.insert(layer_index, direction);
        state.open_entries.push(OpenEntry {
            entry_id,
            layer_index,
            direction,
            entry_price,
            units,
            take_profit_pips,
            opened_at: tick.time,
            is_initial,
            is_hedge: false,
            source_entry_id: None,
        });
        state.update_layer_entry_price(layer_index);

        if is_initial {
            StrategyEvent::InitialEntry(InitialEntryEvent {
                time: tick.time,
                layer: layer_index,
                direction,
                price: entry_price,
                units,
                retracement_count: 0,
            })
        } else {
            StrategyEvent::Retracement(RetracementEvent {
                time: tick.time,
                layer: layer_index,
                direction,
                price: entry_price,
                units,
                retracement_count: state
                    .layer_retracement_counts
                    .get(&layer_index)
                    .copied()
                    .unwrap_or_default(),
            })
        }
    }

    /// Volatility regime control: lock on an ATR spike (closing or hedge-neutralizing
    /// exposure), unwind once the regime calms.
    fn apply_volatility_control(
        &self,
        state: &mut FloorState,
        tick: &Tick,
        events: &mut Vec<StrategyEvent>,
    ) {
        if !self.config.volatility_check_enabled {
            if state.volatility_locked {
                // Operator disabled the check mid-run: unlock immediately.
                state.volatility_locked = false;
                state.status = StrategyStatus::Running;
                state.lock_reason.clear();
                events.push(StrategyEvent::generic(
                    tick.time,
                    "volatility_check_disabled_unlock",
                    Value::Null,
                ));
            }
            return;
        }

        let current_atr = self.current_atr(state);
        let baseline_atr = self.baseline_atr(state);
        if baseline_atr <= Decimal::ZERO {
            return;
        }

        let lock_threshold = baseline_atr * self.config.volatility_lock_multiplier;
        let unlock_threshold = baseline_atr * self.config.volatility_unlock_multiplier;

        if !state.volatility_locked
            && current_atr >= lock_threshold
            && !state.open_entries.is_empty()
        {
            state.volatility_locked = true;
            state.status = StrategyStatus::Paused;

            if self.config.hedging_enabled {
                // Hedge-neutralize: open mirror positions to zero-out net exposure
                // without realizing losses.
                let instructions: Vec<HedgeInstruction> = state
                    .open_entries
                    .iter()
                    .filter(|entry| !entry.is_hedge)
                    .map(|entry| HedgeInstruction {
                        source_entry_id: entry.entry_id,
                        layer: entry.layer_index,
                        direction: entry.direction.opposite(),
                        units: entry.units,
                    })
                    .collect();

                state.hedge_neutralized = true;
                state.lock_reason = format!(
                    "[HEDGE_NEUTRALIZE] atr={current_atr:.2} >= threshold={lock_threshold:.2}"
                );

                let mut hedge_ids = Vec::with_capacity(instructions.len());
                for instruction in &instructions {
                    let entry_id = state.allocate_entry_id();
                    hedge_ids.push(entry_id);
                    state.open_entries.push(OpenEntry {
                        entry_id,
                        layer_index: instruction.layer,
                        direction: instruction.direction,
                        entry_price: tick.mid,
                        units: instruction.units,
                        take_profit_pips: Decimal::ZERO,
                        opened_at: tick.time,
                        is_initial: false,
                        is_hedge: true,
                        source_entry_id: Some(instruction.source_entry_id),
                    });
                }
                state.hedge_entry_ids = hedge_ids;

                events.push(StrategyEvent::VolatilityHedgeNeutralize(
                    VolatilityHedgeNeutralizeEvent {
                        time: tick.time,
                        reason: state.lock_reason.clone(),
                        atr: current_atr,
                        threshold: lock_threshold,
                        hedges: instructions,
                    },
                ));
            } else {
                // Non-hedging: close all positions outright via the event handler.
                state.lock_reason =
                    format!("[CLOSE] atr={current_atr:.2} >= threshold={lock_threshold:.2}");
                events.push(StrategyEvent::VolatilityLock(VolatilityLockEvent {
                    time: tick.time,
                    reason: state.lock_reason.clone(),
                    atr: current_atr,
                    threshold: lock_threshold,
                }));
            }
        } else if state.volatility_locked && current_atr <= unlock_threshold {
            let was_hedge_neutralized = state.hedge_neutralized;
            state.volatility_locked = false;
            state.status = StrategyStatus::Running;
            state.lock_reason.clear();

            if was_hedge_neutralized {
                // Unwind: drop the hedges and their source originals from state so
                // the strategy restarts with a clean slate, and emit a close event
                // so the handler flattens the broker side. Both paths run; they are
                // intentionally not deduplicated.
                let hedge_ids: Vec<u64> = state.hedge_entry_ids.clone();
                let source_ids: Vec<u64> = state
                    .open_entries
                    .iter()
                    .filter(|entry| hedge_ids.contains(&entry.entry_id))
                    .filter_map(|entry| entry.source_entry_id)
                    .collect();

                state.open_entries.retain(|entry| {
                    !hedge_ids.contains(&entry.entry_id) && !source_ids.contains(&entry.entry_id)
                });
                state.hedge_neutralized = false;
                state.hedge_entry_ids.clear();

                events.push(StrategyEvent::VolatilityLock(VolatilityLockEvent {
                    time: tick.time,
                    reason: "[CLOSE] unwind hedge-neutralized positions".into(),
                    atr: current_atr,
                    threshold: unlock_threshold,
                }));

                state.reset_layers();
            }

            events.push(StrategyEvent::generic(
                tick.time,
                "volatility_unlock",
                json!({
                    "atr": current_atr.to_string(),
                    "threshold": unlock_threshold.to_string(),
                    "was_hedge_neutralized": was_hedge_neutralized,
                }),
            ));
        }
    }

    /// Close oldest entries (layer index, opened_at, entry id) until the margin
    /// ratio would return to the target.
    fn apply_margin_protection(
        &self,
        state: &mut FloorState,
        tick: &Tick,
    ) -> Option<StrategyEvent> {
        let margin_ratio = self.margin_ratio(state, tick);
        if margin_ratio < self.config.margin_cut_start_ratio {
            return None;
        }

        let total_units: i64 = state.open_entries.iter().map(|entry| entry.units).sum();
        if total_units <= 0 {
            return None;
        }

        let nav = state.account_nav.max(Decimal::ONE);
        let conversion = self.conversion_rate(tick);
        let target_required_margin = self.config.margin_cut_target_ratio * nav;
        let target_units = (target_required_margin
            / (tick.mid * self.config.margin_rate * conversion))
            .trunc()
            .try_into()
            .unwrap_or(0i64);
        let units_to_close = (total_units - target_units).max(0);
        if units_to_close <= 0 {
            return None;
        }

        let mut ordered: Vec<OpenEntry> = state.open_entries.clone();
        ordered.sort_by(|a, b| {
            (a.layer_index, a.opened_at, a.entry_id).cmp(&(b.layer_index, b.opened_at, b.entry_id))
        });

        let mut closed_positions = 0u32;
        let mut closed_units = 0i64;
        let mut updated: Vec<OpenEntry> = Vec::with_capacity(ordered.len());
        for mut entry in ordered {
            if entry.units <= 0 {
                continue;
            }
            let remaining_to_close = units_to_close - closed_units;
            if remaining_to_close <= 0 {
                updated.push(entry);
                continue;
            }

            let close_now = entry.units.min(remaining_to_close);
            closed_units += close_now;
            closed_positions += 1;

            if entry.units > close_now {
                entry.units -= close_now;
                updated.push(entry);
            }
        }

        state.open_entries = updated;
        state.recompute_layer_retracements();

        warn!(
            %margin_ratio,
            closed_positions,
            closed_units,
            "margin protection closed entries"
        );

        Some(StrategyEvent::MarginProtection(MarginProtectionEvent {
            time: tick.time,
            reason: format!(
                "margin_ratio={margin_ratio:.4} reached cut_start={:.4}",
                self.config.margin_cut_start_ratio
            ),
            margin_ratio,
            threshold: self.config.margin_cut_start_ratio,
            positions_closed: closed_positions,
            units_closed: closed_units,
        }))
    }

    /// With no entries left, stop the task outright if even a minimum-lot entry
    /// would blow past the margin target - prevents an open-then-close loop.
    fn check_margin_blowout(
        &self,
        state: &mut FloorState,
        tick: &Tick,
    ) -> Option<(StrategyEvent, String)> {
        if !self.config.margin_protection_enabled || !state.open_entries.is_empty() {
            return None;
        }

        let min_units = self.lots_to_units(self.config.base_lot_size);
        let nav = self.estimate_nav(state, tick).max(Decimal::ONE);
        let conversion = self.conversion_rate(tick);
        let hypothetical = (tick.mid
            * Decimal::from(min_units)
            * self.config.margin_rate
            * conversion)
            / nav;

        if hypothetical < self.config.margin_cut_target_ratio {
            return None;
        }

        warn!(
            %hypothetical,
            target = %self.config.margin_cut_target_ratio,
            "margin blow-out with no open positions, requesting stop"
        );

        let event = StrategyEvent::generic(
            tick.time,
            "margin_blowout_stop",
            json!({
                "hypothetical_margin_ratio": hypothetical.to_string(),
                "margin_cut_target_ratio": self.config.margin_cut_target_ratio.to_string(),
                "nav": nav.to_string(),
            }),
        );
        let reason = format!(
            "margin blow-out: hypothetical margin ratio {hypothetical:.4} >= target {:.4} \
             with no open positions",
            self.config.margin_cut_target_ratio
        );
        Some((event, reason))
    }

    /// Take-profit pass over the active layer. Returns whether any entry closed.
    fn apply_take_profits(
        &self,
        state: &mut FloorState,
        tick: &Tick,
        active_layer: u32,
        events: &mut Vec<StrategyEvent>,
    ) -> bool {
        // LIFO (newest first) in hedging mode, FIFO (oldest first) in netting mode.
        let mut candidates: Vec<OpenEntry> = state
            .layer_entries(active_layer)
            .into_iter()
            .cloned()
            .collect();
        match self.trading_mode {
            TradingMode::Hedging => candidates.sort_by(|a, b| b.entry_id.cmp(&a.entry_id)),
            TradingMode::Netting => candidates.sort_by(|a, b| a.entry_id.cmp(&b.entry_id)),
        }

        let conversion = self.conversion_rate(tick);
        let mut closed_any = false;
        for entry in candidates {
            let pnl_pips = self.pips_for_entry(entry.direction, entry.entry_price, tick);
            if pnl_pips < entry.take_profit_pips {
                continue;
            }

            let exit_price = self.price_for_close(entry.direction, tick);
            let mut pnl =
                (exit_price - entry.entry_price) * Decimal::from(entry.units) * conversion;
            if entry.direction == Direction::Short {
                pnl = -pnl;
            }

            events.push(StrategyEvent::TakeProfit(TakeProfitEvent {
                time: tick.time,
                layer: active_layer,
                direction: entry.direction,
                entry_price: entry.entry_price,
                exit_price,
                units: entry.units,
                pnl,
                pips: pnl_pips,
                retracement_count: state
                    .layer_retracement_counts
                    .get(&active_layer)
                    .copied()
                    .unwrap_or_default(),
            }));

            state.remove_entry(entry.entry_id);
            state.account_balance += pnl;
            state.metrics.take_profit_count += 1;
            closed_any = true;
        }

        if closed_any {
            state.recompute_layer_retracements();
            state.update_layer_entry_price(active_layer);
        }
        closed_any
    }

    fn lifecycle(
        &self,
        state: Value,
        target: StrategyStatus,
        signal: &'static str,
    ) -> Result<StrategyResult, StrategyError> {
        let mut state = FloorState::from_value(state)?;
        let mut events = Vec::new();
        if state.status != target {
            state.status = target;
            events.push(StrategyEvent::generic(
                state
                    .candles
                    .last()
                    .map(|candle| candle.start)
                    .unwrap_or(chrono::DateTime::UNIX_EPOCH),
                signal,
                Value::Null,
            ));
        }
        Ok(StrategyResult::new(state.to_value(), events))
    }
}

impl Strategy for FloorStrategy {
    fn on_tick(&self, tick: &Tick, state: Value) -> Result<StrategyResult, StrategyError> {
        let mut state = FloorState::from_value(state)?;
        let mut events: Vec<StrategyEvent> = Vec::new();

        // 1) Update state: history, candles, NAV, tick counters.
        let derived_mid = (tick.bid + tick.ask) / Decimal::TWO;
        state.last_bid = Some(tick.bid);
        state.last_ask = Some(tick.ask);
        state.last_mid = Some(derived_mid);
        state.ticks_seen += 1;
        state.price_history.push(derived_mid);
        let max_window = self.config.max_history_window();
        if state.price_history.len() > max_window {
            let excess = state.price_history.len() - max_window;
            state.price_history.drain(..excess);
        }
        candle::update(
            &mut state.candles,
            self.config.candle_interval_secs,
            tick.time,
            derived_mid,
            self.config.max_candles(),
        );
        self.estimate_nav(&mut state, tick);

        // 2) Volatility regime control.
        self.apply_volatility_control(&mut state, tick, &mut events);

        // 3) Margin protection; bail out of this tick once it fires.
        if self.config.margin_protection_enabled
            && let Some(event) = self.apply_margin_protection(&mut state, tick)
        {
            events.push(event);
            debug!(time = %tick.time, "early return: margin protection fired");
            return Ok(StrategyResult::new(state.to_value(), events));
        }

        // Locked state: monitoring only.
        if state.volatility_locked {
            debug!(time = %tick.time, "early return: volatility locked");
            return Ok(StrategyResult::new(state.to_value(), events));
        }

        // Paused or stopped externally: track ticks but never trade.
        if state.status != StrategyStatus::Running {
            return Ok(StrategyResult::new(state.to_value(), events));
        }

        let active_layer = state.active_layer_index;
        state.layer_retracement_counts.entry(active_layer).or_insert(0);

        // 4) Blow-out guard.
        if let Some((event, reason)) = self.check_margin_blowout(&mut state, tick) {
            events.push(event);
            return Ok(StrategyResult::new(state.to_value(), events).with_stop(reason));
        }

        // 5) Entry / take-profit / retracement / layer transitions.
        let active_entries = state.layer_entries(active_layer).len();
        if active_entries == 0 {
            if state.ticks_seen < u64::from(self.config.entry_signal_lookback_ticks) {
                return Ok(StrategyResult::new(state.to_value(), events));
            }
            if self.is_bad_market_condition(tick) {
                events.push(StrategyEvent::generic(
                    tick.time,
                    "entry_skipped",
                    json!({
                        "reason": "market_condition_override",
                        "spread_pips": self.spread_pips(tick).to_string(),
                    }),
                ));
                return Ok(StrategyResult::new(state.to_value(), events));
            }

            let direction = self.choose_direction(&state);
            let units = self.entry_units(&state, active_layer, self.config.base_lot_size);
            let take_profit = self.effective_take_profit(&state, active_layer);
            events.push(self.open_entry(
                &mut state,
                tick,
                active_layer,
                direction,
                units,
                take_profit,
                true,
            ));
            state.initialized = true;
            return Ok(StrategyResult::new(state.to_value(), events));
        }

        if self.apply_take_profits(&mut state, tick, active_layer, &mut events) {
            let remaining = state.layer_entries(active_layer).len();
            if remaining == 0 && active_layer != state.home_layer_index {
                events.push(StrategyEvent::RemoveLayer(RemoveLayerEvent {
                    time: tick.time,
                    layer: active_layer,
                }));
                state.active_layer_index = state
                    .return_stack
                    .pop()
                    .unwrap_or(state.home_layer_index);
            }
            // After taking profit, wait for the next tick before re-entering.
            debug!(time = %tick.time, "early return: take profit");
            return Ok(StrategyResult::new(state.to_value(), events));
        }

        // Scale in when the adverse move from the latest entry hits the trigger.
        let latest = state
            .layer_entries(active_layer)
            .into_iter()
            .max_by_key(|entry| entry.entry_id)
            .cloned();
        let Some(latest) = latest else {
            return Ok(StrategyResult::new(state.to_value(), events));
        };

        let adverse = self.adverse_pips(latest.direction, latest.entry_price, tick);
        let trigger = self.effective_retracement_trigger(&state, active_layer);
        let retracements = state
            .layer_retracement_counts
            .get(&active_layer)
            .copied()
            .unwrap_or_default();

        if adverse >= trigger
            && retracements < self.config.max_retracements_per_layer
            && !self.is_bad_market_condition(tick)
        {
            let lots = self.config.retracement_lots(retracements);
            let units = self.entry_units(&state, active_layer, lots);
            state
                .layer_retracement_counts
                .insert(active_layer, retracements + 1);
            let take_profit = self.effective_take_profit(&state, active_layer);
            events.push(self.open_entry(
                &mut state,
                tick,
                active_layer,
                latest.direction,
                units,
                take_profit,
                false,
            ));
            state.metrics.retracement_entry_count += 1;
        } else if self.is_bad_market_condition(tick) {
            events.push(StrategyEvent::generic(
                tick.time,
                "retracement_skipped",
                json!({
                    "reason": "market_condition_override",
                    "spread_pips": self.spread_pips(tick).to_string(),
                }),
            ));
        } else if adverse >= trigger
            && retracements >= self.config.max_retracements_per_layer
            && state.active_layer_index < self.config.max_layers - 1
        {
            // Move to a new layer and restart from the initial lot.
            let new_layer = state.active_layer_index + 1;
            state.return_stack.push(state.active_layer_index);
            state.active_layer_index = new_layer;
            state.layer_retracement_counts.entry(new_layer).or_insert(0);
            events.push(StrategyEvent::AddLayer(AddLayerEvent {
                time: tick.time,
                layer: new_layer,
            }));

            let direction = self.choose_direction(&state);
            let units = self.entry_units(&state, new_layer, self.config.lot_size_for_layer(new_layer));
            let take_profit = self.effective_take_profit(&state, new_layer);
            events.push(self.open_entry(
                &mut state,
                tick,
                new_layer,
                direction,
                units,
                take_profit,
                true,
            ));
        }

        // 6) Record per-tick metrics for replay visualisation.
        let margin_ratio = self.margin_ratio(&mut state, tick);
        let current_atr = self.current_atr(&state);
        let baseline_atr = self.baseline_atr(&state);
        state.metrics.margin_ratio = margin_ratio;
        state.metrics.current_atr = current_atr;
        state.metrics.baseline_atr = baseline_atr;
        state.metrics.volatility_threshold = if baseline_atr > Decimal::ZERO {
            baseline_atr * self.config.volatility_lock_multiplier
        } else {
            Decimal::ZERO
        };

        Ok(StrategyResult::new(state.to_value(), events))
    }

    fn on_start(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        self.lifecycle(state, StrategyStatus::Running, "strategy_started")
    }

    fn on_pause(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        self.lifecycle(state, StrategyStatus::Paused, "strategy_paused")
    }

    fn on_resume(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        self.lifecycle(state, StrategyStatus::Running, "strategy_resumed")
    }

    fn on_stop(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        self.lifecycle(state, StrategyStatus::Stopped, "strategy_stopped")
    }
}
