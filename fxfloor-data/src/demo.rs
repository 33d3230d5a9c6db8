use crate::tick::Tick;
use chrono::Utc;
use fnv::FnvHashMap;
use fxfloor_instrument::{Instrument, InstrumentSymbol};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Number of synthetic ticks between "this stream is synthetic" reminders.
pub const DEMO_REMINDER_EVERY: u64 = 60;

/// Base mid prices for the demo random walk, per currency pair.
static BASE_PRICES: LazyLock<FnvHashMap<&'static str, Decimal>> = LazyLock::new(|| {
    FnvHashMap::from_iter([
        ("USD_JPY", Decimal::new(14950, 2)),
        ("EUR_USD", Decimal::new(10850, 4)),
        ("GBP_USD", Decimal::new(12650, 4)),
        ("AUD_USD", Decimal::new(6550, 4)),
        ("USD_CAD", Decimal::new(13850, 4)),
        ("USD_CHF", Decimal::new(8850, 4)),
        ("NZD_USD", Decimal::new(5950, 4)),
        ("EUR_JPY", Decimal::new(16225, 2)),
    ])
});

/// Typical spreads per currency pair.
static SPREADS: LazyLock<FnvHashMap<&'static str, Decimal>> = LazyLock::new(|| {
    FnvHashMap::from_iter([
        ("USD_JPY", Decimal::new(15, 3)),
        ("EUR_USD", Decimal::new(15, 5)),
        ("GBP_USD", Decimal::new(20, 5)),
        ("AUD_USD", Decimal::new(18, 5)),
        ("USD_CAD", Decimal::new(20, 5)),
        ("USD_CHF", Decimal::new(18, 5)),
        ("NZD_USD", Decimal::new(25, 5)),
        ("EUR_JPY", Decimal::new(20, 3)),
    ])
});

/// One synthetic quote, with simulated liquidity figures.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct DemoTick {
    pub tick: Tick,
    pub spread: Decimal,
    pub bid_liquidity: u64,
    pub ask_liquidity: u64,
}

/// Synthetic tick generator for the `default` demo account.
///
/// Produces a bounded random walk (±0.05% per step) around a per-pair base price
/// with that pair's typical spread, so the realtime layer is usable before a
/// brokerage account is onboarded.
#[derive(Debug)]
pub struct DemoTickGenerator {
    instrument: Instrument,
    current_mid: Decimal,
    spread: Decimal,
    ticks_emitted: u64,
    rng: StdRng,
}

impl DemoTickGenerator {
    pub fn new(symbol: InstrumentSymbol) -> Self {
        Self::with_seed(symbol, rand::rng().random())
    }

    /// Seeded constructor for deterministic test runs.
    pub fn with_seed(symbol: InstrumentSymbol, seed: u64) -> Self {
        let current_mid = BASE_PRICES
            .get(symbol.name())
            .copied()
            .unwrap_or(Decimal::ONE_HUNDRED);
        let spread = SPREADS
            .get(symbol.name())
            .copied()
            .unwrap_or(Decimal::new(2, 4));

        Self {
            instrument: Instrument::forex(symbol),
            current_mid,
            spread,
            ticks_emitted: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn instrument(&self) -> &InstrumentSymbol {
        &self.instrument.symbol
    }

    /// Generate the next synthetic tick.
    pub fn next_tick(&mut self) -> DemoTick {
        // Random walk between -0.05% and +0.05% per step.
        let movement_millionths: i64 = self.rng.random_range(-500..=500);
        let movement = Decimal::new(movement_millionths, 6);
        self.current_mid *= Decimal::ONE + movement;

        let half_spread = self.spread / Decimal::TWO;
        let scale = self.instrument.pip_size.scale() + 1;
        let mid = self.current_mid.round_dp(scale);
        let bid = (mid - half_spread).round_dp(scale);
        let ask = (mid + half_spread).round_dp(scale);

        self.ticks_emitted += 1;

        DemoTick {
            tick: Tick {
                instrument: self.instrument.symbol.clone(),
                time: Utc::now(),
                bid,
                ask,
                mid,
            },
            spread: self.spread,
            bid_liquidity: self.rng.random_range(1_000_000..=10_000_000),
            ask_liquidity: self.rng.random_range(1_000_000..=10_000_000),
        }
    }

    /// Whether the tick just emitted should be followed by a demo-mode reminder.
    pub fn should_remind(&self) -> bool {
        self.ticks_emitted > 0 && self.ticks_emitted % DEMO_REMINDER_EVERY == 0
    }

    /// Total synthetic ticks emitted so far.
    pub fn ticks_emitted(&self) -> u64 {
        self.ticks_emitted
    }
}
