use crate::{
    error::FxFloorError,
    statistic::{self, PerformanceMetrics},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use fxfloor_data::{Tick, historical::HistoricalTicks};
use fxfloor_instrument::{Direction, Instrument, InstrumentSymbol};
use fxfloor_strategy::{Strategy, event::StrategyEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Backtest run parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BacktestConfig {
    pub strategy_type: SmolStr,
    pub parameters: Value,
    pub instrument: InstrumentSymbol,
    pub initial_balance: Decimal,
    pub commission_per_trade: Decimal,
    /// Equity is sampled at least every this many ticks (and at every
    /// realisation) to keep memory bounded.
    pub equity_sample_interval: usize,
}

/// Why a booked trade closed.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    #[display("take_profit")]
    TakeProfit,
    #[display("volatility_lock")]
    VolatilityLock,
    #[display("margin_protection")]
    MarginProtection,
}

/// One realised trade in the backtest log.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BacktestTrade {
    pub time: DateTime<Utc>,
    pub layer: u32,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub units: i64,
    /// Gross P&L before commission.
    pub pnl: Decimal,
    pub commission: Decimal,
    pub reason: CloseReason,
}

impl BacktestTrade {
    pub fn net_pnl(&self) -> Decimal {
        self.pnl - self.commission
    }
}

/// One sampled point on the equity curve.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub balance: Decimal,
}

/// Terminal status of a backtest run.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum BacktestRunStatus {
    #[display("completed")]
    Completed,
    /// Cancelled cooperatively or stopped by the strategy; the report carries the
    /// partial results.
    #[display("stopped")]
    Stopped,
}

/// Complete output of one backtest run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BacktestReport {
    pub status: BacktestRunStatus,
    pub final_balance: Decimal,
    pub trade_log: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub ticks_processed: usize,
    /// Final strategy state checkpoint.
    pub final_state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Entry in the engine's own open-position ledger, keyed for matching close
/// events. Independent of the strategy state so booking stays authoritative.
#[derive(Debug, Clone, Eq, PartialEq)]
struct LedgerEntry {
    sequence: u64,
    layer: u32,
    direction: Direction,
    entry_price: Decimal,
    units: i64,
}

/// Drives a strategy over a bounded historical tick stream, booking fills at
/// bid/ask and producing a trade log, equity curve and performance metrics.
///
/// The engine holds no raw ticks - it consumes the stream lazily - and samples the
/// equity curve at a configurable density. Cancellation is polled between ticks;
/// a cancelled run returns partial results marked `Stopped`.
pub struct BacktestEngine {
    strategy: Arc<dyn Strategy>,
    instrument: Instrument,
    config: BacktestConfig,
    balance: Decimal,
    ledger: Vec<LedgerEntry>,
    next_sequence: u64,
    trades: Vec<BacktestTrade>,
    equity: Vec<EquityPoint>,
}

impl std::fmt::Debug for BacktestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestEngine")
            .field("instrument", &self.instrument.symbol)
            .field("balance", &self.balance)
            .field("open_entries", &self.ledger.len())
            .finish()
    }
}

impl BacktestEngine {
    pub fn new(strategy: Arc<dyn Strategy>, config: BacktestConfig) -> Self {
        let instrument = Instrument::forex(config.instrument.clone());
        Self {
            strategy,
            instrument,
            balance: config.initial_balance,
            ledger: Vec::new(),
            next_sequence: 0,
            trades: Vec::new(),
            equity: Vec::new(),
            config,
        }
    }

    /// Current account balance (initial balance plus realised P&L net of
    /// commissions).
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Run the strategy over the tick sequence.
    ///
    /// `cancel` is polled between ticks; `on_progress` receives integer percent of
    /// ticks consumed.
    pub fn run(
        mut self,
        ticks: HistoricalTicks,
        mut cancel: impl FnMut() -> bool,
        mut on_progress: impl FnMut(u8),
    ) -> Result<BacktestReport, FxFloorError> {
        let total_ticks = ticks.len();
        // Seed the strategy state with the starting balance so NAV and margin
        // estimates are meaningful from the first tick.
        let mut state = json!({"account_balance": self.config.initial_balance});
        let mut status = BacktestRunStatus::Completed;
        let mut stop_reason = None;
        let mut last_progress = 0u8;
        let mut ticks_processed = 0usize;
        let mut last_time = None;

        info!(
            instrument = %self.config.instrument,
            ticks = total_ticks,
            initial_balance = %self.config.initial_balance,
            "backtest run starting"
        );

        for (index, tick) in ticks.into_iter().enumerate() {
            if cancel() {
                status = BacktestRunStatus::Stopped;
                stop_reason = Some("cancelled".to_string());
                break;
            }

            let result = self.strategy.on_tick(&tick, state)?;
            state = result.state;
            for event in &result.events {
                self.apply_event(event, &tick);
            }

            ticks_processed = index + 1;
            last_time = Some(tick.time);

            if self.config.equity_sample_interval > 0
                && ticks_processed % self.config.equity_sample_interval == 0
            {
                self.sample_equity(tick.time);
            }

            let progress = (ticks_processed * 100 / total_ticks.max(1)) as u8;
            if progress != last_progress {
                last_progress = progress;
                on_progress(progress);
            }

            if result.should_stop {
                status = BacktestRunStatus::Stopped;
                stop_reason = result.stop_reason;
                break;
            }
        }

        if let Some(time) = last_time {
            self.sample_equity(time);
        }

        let metrics = statistic::generate(
            self.config.initial_balance,
            &self
                .trades
                .iter()
                .map(BacktestTrade::net_pnl)
                .collect::<Vec<_>>(),
            &self
                .equity
                .iter()
                .map(|point| (point.time, point.balance))
                .collect::<Vec<_>>(),
        );

        info!(
            %status,
            trades = self.trades.len(),
            final_balance = %self.balance,
            "backtest run finished"
        );

        Ok(BacktestReport {
            status,
            final_balance: self.balance,
            trade_log: self.trades,
            equity_curve: self.equity,
            metrics,
            ticks_processed,
            final_state: state,
            stop_reason,
        })
    }

    /// Book one strategy event against the engine ledger.
    fn apply_event(&mut self, event: &StrategyEvent, tick: &Tick) {
        match event {
            StrategyEvent::InitialEntry(open) => {
                self.open_entry(open.layer, open.direction, open.price, open.units);
            }
            StrategyEvent::Retracement(open) => {
                self.open_entry(open.layer, open.direction, open.price, open.units);
            }
            StrategyEvent::TakeProfit(close) => {
                let matched = self.ledger.iter().position(|entry| {
                    entry.layer == close.layer
                        && entry.direction == close.direction
                        && entry.entry_price == close.entry_price
                        && entry.units == close.units
                });
                match matched {
                    Some(index) => {
                        let entry = self.ledger.remove(index);
                        self.realise(&entry, tick, CloseReason::TakeProfit);
                    }
                    None => {
                        // The strategy closed an entry the ledger never saw; book
                        // from the event so balances stay conservative.
                        warn!(layer = close.layer, "take profit without a ledger entry");
                        let entry = LedgerEntry {
                            sequence: 0,
                            layer: close.layer,
                            direction: close.direction,
                            entry_price: close.entry_price,
                            units: close.units,
                        };
                        self.realise(&entry, tick, CloseReason::TakeProfit);
                    }
                }
            }
            StrategyEvent::VolatilityHedgeNeutralize(hedge) => {
                // Mirror entries are booked at mid so the later unwind nets out.
                for instruction in &hedge.hedges {
                    self.open_entry(
                        instruction.layer,
                        instruction.direction,
                        tick.mid,
                        instruction.units,
                    );
                }
            }
            StrategyEvent::VolatilityLock(lock) if lock.reason.starts_with("[CLOSE]") => {
                // Lock close (or hedge unwind): flatten everything at this tick.
                let entries = std::mem::take(&mut self.ledger);
                for entry in &entries {
                    self.realise(entry, tick, CloseReason::VolatilityLock);
                }
            }
            StrategyEvent::VolatilityLock(_) => {}
            StrategyEvent::MarginProtection(protection) => {
                self.close_oldest_units(protection.units_closed, tick);
            }
            StrategyEvent::AddLayer(_)
            | StrategyEvent::RemoveLayer(_)
            | StrategyEvent::GenericSignal(_) => {}
        }
    }

    fn open_entry(&mut self, layer: u32, direction: Direction, price: Decimal, units: i64) {
        self.ledger.push(LedgerEntry {
            sequence: self.next_sequence,
            layer,
            direction,
            entry_price: price,
            units,
        });
        self.next_sequence += 1;
    }

    /// Close the oldest entries until `units_to_close` is consumed, splitting the
    /// final entry where necessary.
    fn close_oldest_units(&mut self, units_to_close: i64, tick: &Tick) {
        let mut remaining = units_to_close;
        self.ledger.sort_by_key(|entry| entry.sequence);

        let mut index = 0;
        while remaining > 0 && index < self.ledger.len() {
            if self.ledger[index].units <= remaining {
                let entry = self.ledger.remove(index);
                remaining -= entry.units;
                self.realise(&entry, tick, CloseReason::MarginProtection);
            } else {
                let mut closed = self.ledger[index].clone();
                closed.units = remaining;
                self.ledger[index].units -= remaining;
                remaining = 0;
                self.realise(&closed, tick, CloseReason::MarginProtection);
            }
        }
    }

    /// Realise an entry at the opposite side of the current tick.
    fn realise(&mut self, entry: &LedgerEntry, tick: &Tick, reason: CloseReason) {
        let exit_price = match entry.direction {
            Direction::Long => tick.bid,
            Direction::Short => tick.ask,
        };
        let mut pnl = (exit_price - entry.entry_price) * Decimal::from(entry.units);
        if entry.direction == Direction::Short {
            pnl = -pnl;
        }

        self.balance += pnl - self.config.commission_per_trade;
        self.trades.push(BacktestTrade {
            time: tick.time,
            layer: entry.layer,
            direction: entry.direction,
            entry_price: entry.entry_price,
            exit_price,
            units: entry.units,
            pnl,
            commission: self.config.commission_per_trade,
            reason,
        });
        self.sample_equity(tick.time);
    }

    fn sample_equity(&mut self, time: DateTime<Utc>) {
        match self.equity.last_mut() {
            Some(last) if last.time == time => last.balance = self.balance,
            _ => self.equity.push(EquityPoint {
                time,
                balance: self.balance,
            }),
        }
    }
}
