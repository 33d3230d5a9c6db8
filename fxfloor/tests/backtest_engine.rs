use chrono::{DateTime, TimeDelta, Utc};
use fxfloor::backtest::{BacktestConfig, BacktestEngine, BacktestRunStatus};
use fxfloor_data::{Tick, historical::HistoricalTicks};
use fxfloor_instrument::{Direction, InstrumentSymbol};
use fxfloor_strategy::{
    Strategy, StrategyResult, TradingMode,
    error::StrategyError,
    event::{InitialEntryEvent, StrategyEvent, TakeProfitEvent},
    floor::FloorStrategy,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use smol_str::SmolStr;
use std::sync::Arc;

fn start_time() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

fn tick_at(step: i64, bid: Decimal, ask: Decimal) -> Tick {
    Tick::new(
        InstrumentSymbol::new("EUR_USD"),
        start_time() + TimeDelta::seconds(step),
        bid,
        ask,
    )
    .unwrap()
}

fn history(ticks: Vec<Tick>) -> HistoricalTicks {
    HistoricalTicks::new(InstrumentSymbol::new("EUR_USD"), ticks).unwrap()
}

/// Emits a pre-scripted batch of events per tick; state passes through untouched.
#[derive(Debug)]
struct ScriptedStrategy {
    script: Mutex<Vec<Vec<StrategyEvent>>>,
}

impl ScriptedStrategy {
    fn new(mut script: Vec<Vec<StrategyEvent>>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
        }
    }
}

impl Strategy for ScriptedStrategy {
    fn on_tick(&self, _: &Tick, state: Value) -> Result<StrategyResult, StrategyError> {
        let events = self.script.lock().pop().unwrap_or_default();
        Ok(StrategyResult::new(state, events))
    }

    fn on_start(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        Ok(StrategyResult::new(state, vec![]))
    }

    fn on_pause(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        Ok(StrategyResult::new(state, vec![]))
    }

    fn on_resume(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        Ok(StrategyResult::new(state, vec![]))
    }

    fn on_stop(&self, state: Value) -> Result<StrategyResult, StrategyError> {
        Ok(StrategyResult::new(state, vec![]))
    }
}

fn open(time: DateTime<Utc>, price: Decimal, units: i64) -> StrategyEvent {
    StrategyEvent::InitialEntry(InitialEntryEvent {
        time,
        layer: 0,
        direction: Direction::Long,
        price,
        units,
        retracement_count: 0,
    })
}

fn take_profit(time: DateTime<Utc>, entry_price: Decimal, units: i64) -> StrategyEvent {
    StrategyEvent::TakeProfit(TakeProfitEvent {
        time,
        layer: 0,
        direction: Direction::Long,
        entry_price,
        exit_price: Decimal::ZERO,
        units,
        pnl: Decimal::ZERO,
        pips: Decimal::ZERO,
        retracement_count: 0,
    })
}

fn engine_config(commission: Decimal) -> BacktestConfig {
    BacktestConfig {
        strategy_type: SmolStr::new("scripted"),
        parameters: json!({}),
        instrument: InstrumentSymbol::new("EUR_USD"),
        initial_balance: dec!(1000),
        commission_per_trade: commission,
        equity_sample_interval: 1,
    }
}

/// Three scripted trades of +5, -2 and +7 balance units.
fn scripted_three_trades() -> (ScriptedStrategy, HistoricalTicks) {
    let t = start_time;
    let script = vec![
        // Tick 0: open 1000 units at 1.0000.
        vec![open(t(), dec!(1.0000), 1000)],
        // Tick 1 (bid 1.0050): close -> +5. Reopen at 1.0100.
        vec![
            take_profit(t() + TimeDelta::seconds(1), dec!(1.0000), 1000),
            open(t() + TimeDelta::seconds(1), dec!(1.0100), 1000),
        ],
        // Tick 2 (bid 1.0080): close -> -2. Reopen at 1.0080.
        vec![
            take_profit(t() + TimeDelta::seconds(2), dec!(1.0100), 1000),
            open(t() + TimeDelta::seconds(2), dec!(1.0080), 1000),
        ],
        // Tick 3 (bid 1.0150): close -> +7.
        vec![take_profit(t() + TimeDelta::seconds(3), dec!(1.0080), 1000)],
    ];
    let ticks = vec![
        tick_at(0, dec!(1.0000), dec!(1.0002)),
        tick_at(1, dec!(1.0050), dec!(1.0052)),
        tick_at(2, dec!(1.0080), dec!(1.0082)),
        tick_at(3, dec!(1.0150), dec!(1.0152)),
    ];
    (ScriptedStrategy::new(script), history(ticks))
}

#[test]
fn test_backtest_conservation_with_zero_commission() {
    let (strategy, ticks) = scripted_three_trades();
    let engine = BacktestEngine::new(Arc::new(strategy), engine_config(Decimal::ZERO));

    let report = engine.run(ticks, || false, |_| {}).unwrap();

    assert_eq!(report.status, BacktestRunStatus::Completed);
    assert_eq!(report.trade_log.len(), 3);
    let pnls: Vec<Decimal> = report.trade_log.iter().map(|trade| trade.pnl).collect();
    assert_eq!(pnls, vec![dec!(5.0000), dec!(-2.0000), dec!(7.0000)]);

    assert_eq!(report.metrics.total_pnl, dec!(10.0000));
    // Conservation: final - initial = sum of realised P&L - sum of commissions.
    assert_eq!(report.final_balance - dec!(1000), dec!(10.0000));
}

#[test]
fn test_backtest_conservation_with_commission() {
    let (strategy, ticks) = scripted_three_trades();
    let engine = BacktestEngine::new(Arc::new(strategy), engine_config(dec!(0.5)));

    let report = engine.run(ticks, || false, |_| {}).unwrap();

    let gross: Decimal = report.trade_log.iter().map(|trade| trade.pnl).sum();
    let commissions: Decimal = report.trade_log.iter().map(|trade| trade.commission).sum();
    assert_eq!(gross, dec!(10.0000));
    assert_eq!(commissions, dec!(1.5));
    assert_eq!(report.final_balance - dec!(1000), gross - commissions);
}

#[test]
fn test_backtest_metrics_summarise_trades() {
    let (strategy, ticks) = scripted_three_trades();
    let engine = BacktestEngine::new(Arc::new(strategy), engine_config(Decimal::ZERO));

    let report = engine.run(ticks, || false, |_| {}).unwrap();

    assert_eq!(report.metrics.total_trades, 3);
    assert_eq!(report.metrics.winning_trades, 2);
    assert_eq!(report.metrics.losing_trades, 1);
    assert_eq!(report.metrics.total_return, dec!(1.00000));
    assert_eq!(report.metrics.profit_factor, Some(dec!(6)));
    assert_eq!(report.metrics.average_win, dec!(6.0000));
    assert_eq!(report.metrics.average_loss, dec!(2.0000));
}

#[test]
fn test_backtest_reports_progress_and_cancels_cooperatively() {
    let ticks: Vec<Tick> = (0..100i64)
        .map(|step| tick_at(step, dec!(1.0000), dec!(1.0002)))
        .collect();
    let strategy = ScriptedStrategy::new(vec![]);
    let engine = BacktestEngine::new(Arc::new(strategy), engine_config(Decimal::ZERO));

    let mut progress_values = Vec::new();
    let mut polls = 0usize;
    let report = engine
        .run(
            history(ticks),
            move || {
                polls += 1;
                polls > 50
            },
            |progress| progress_values.push(progress),
        )
        .unwrap();

    assert_eq!(report.status, BacktestRunStatus::Stopped);
    assert_eq!(report.stop_reason.as_deref(), Some("cancelled"));
    assert_eq!(report.ticks_processed, 50);
    assert!(progress_values.iter().all(|value| *value <= 50));
}

#[test]
fn test_floor_strategy_backtest_preserves_conservation() {
    // Rising then falling mids drive real Floor entries and take-profits.
    let mut mids = Vec::new();
    for step in 0..40i64 {
        mids.push(dec!(1.0850) + Decimal::new(step, 4));
    }
    for step in 0..40i64 {
        mids.push(dec!(1.0890) - Decimal::new(step, 4));
    }
    let ticks: Vec<Tick> = mids
        .iter()
        .enumerate()
        .map(|(step, mid)| tick_at(step as i64, *mid - dec!(0.0001), *mid + dec!(0.0001)))
        .collect();

    let strategy = FloorStrategy::from_params(
        &json!({
            "instrument": "EUR_USD",
            "base_lot_size": 1,
            "retracement_lot_mode": "constant",
            "retracement_lot_amount": 0,
            "retracement_pips": 20,
            "take_profit_pips": 10,
            "max_layers": 2,
            "max_retracements_per_layer": 1,
            "entry_signal_lookback_ticks": 2,
        }),
        TradingMode::Hedging,
    )
    .unwrap();

    let engine = BacktestEngine::new(
        Arc::new(strategy),
        BacktestConfig {
            strategy_type: SmolStr::new("floor"),
            parameters: json!({}),
            instrument: InstrumentSymbol::new("EUR_USD"),
            initial_balance: dec!(10000),
            commission_per_trade: dec!(0.1),
            equity_sample_interval: 10,
        },
    );

    let report = engine.run(history(ticks), || false, |_| {}).unwrap();

    assert!(!report.trade_log.is_empty());
    let net: Decimal = report.trade_log.iter().map(|trade| trade.net_pnl()).sum();
    assert_eq!(report.final_balance - dec!(10000), net);

    // The equity curve ends at the final balance.
    assert_eq!(
        report.equity_curve.last().unwrap().balance,
        report.final_balance
    );
}
