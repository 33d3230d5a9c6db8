use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Individual financial metrics.
///
/// eg/ `SharpeRatio`, `MaxDrawdown`, `ProfitFactor`, `WinRate`.
pub mod metric;

use metric::{
    drawdown::MaxDrawdown, profit_factor::ProfitFactor, sharpe::SharpeRatio, win_rate::WinRate,
};

/// Seconds in a Gregorian year, used to annualise periodic returns.
const SECONDS_PER_YEAR: f64 = 31_557_600.0;

/// Performance summary of one backtest run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PerformanceMetrics {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Percentage of winning trades.
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
    /// Net return over the initial balance, as a percentage.
    pub total_return: Decimal,
    /// Largest peak-to-trough equity decline, as a percentage.
    pub max_drawdown: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharpe_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_factor: Option<Decimal>,
    pub average_win: Decimal,
    pub average_loss: Decimal,
}

/// Compute the performance summary from realised trade P&Ls (net of commission)
/// and the sampled equity curve.
pub fn generate(
    initial_balance: Decimal,
    trade_pnls: &[Decimal],
    equity: &[(DateTime<Utc>, Decimal)],
) -> PerformanceMetrics {
    let total_trades = trade_pnls.len() as u64;
    let wins: Vec<Decimal> = trade_pnls
        .iter()
        .copied()
        .filter(|pnl| *pnl > Decimal::ZERO)
        .collect();
    let losses: Vec<Decimal> = trade_pnls
        .iter()
        .copied()
        .filter(|pnl| *pnl < Decimal::ZERO)
        .collect();

    let total_pnl: Decimal = trade_pnls.iter().sum();
    let gross_wins: Decimal = wins.iter().sum();
    let gross_losses: Decimal = -losses.iter().sum::<Decimal>();

    let total_return = if initial_balance.is_zero() {
        Decimal::ZERO
    } else {
        total_pnl / initial_balance * Decimal::ONE_HUNDRED
    };

    let average_win = if wins.is_empty() {
        Decimal::ZERO
    } else {
        gross_wins / Decimal::from(wins.len() as u64)
    };
    let average_loss = if losses.is_empty() {
        Decimal::ZERO
    } else {
        gross_losses / Decimal::from(losses.len() as u64)
    };

    PerformanceMetrics {
        total_trades,
        winning_trades: wins.len() as u64,
        losing_trades: losses.len() as u64,
        win_rate: WinRate::calculate(wins.len() as u64, total_trades).value,
        total_pnl,
        total_return,
        max_drawdown: MaxDrawdown::calculate(equity.iter().map(|(_, balance)| *balance)).value,
        sharpe_ratio: sharpe_from_equity(equity),
        profit_factor: ProfitFactor::calculate(gross_wins, gross_losses).map(|ratio| ratio.value),
        average_win,
        average_loss,
    }
}

/// Annualised Sharpe ratio of the periodic returns between equity samples.
///
/// The annualisation factor is derived from the observed sampling density, so
/// denser equity curves do not inflate the ratio.
fn sharpe_from_equity(equity: &[(DateTime<Utc>, Decimal)]) -> Option<f64> {
    if equity.len() < 3 {
        return None;
    }

    let mut returns = Vec::with_capacity(equity.len() - 1);
    for pair in equity.windows(2) {
        let previous: f64 = pair[0].1.try_into().ok()?;
        let current: f64 = pair[1].1.try_into().ok()?;
        if previous <= 0.0 {
            return None;
        }
        returns.push(current / previous - 1.0);
    }

    let span_seconds = (equity[equity.len() - 1].0 - equity[0].0).num_seconds();
    if span_seconds <= 0 {
        return None;
    }
    let period_seconds = span_seconds as f64 / returns.len() as f64;
    let periods_per_year = SECONDS_PER_YEAR / period_seconds;

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    let std_dev = variance.sqrt();

    Some(SharpeRatio::calculate(0.0, mean, std_dev).annualise(periods_per_year).value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    fn equity(balances: &[Decimal]) -> Vec<(DateTime<Utc>, Decimal)> {
        let base = DateTime::UNIX_EPOCH;
        balances
            .iter()
            .enumerate()
            .map(|(index, balance)| (base + TimeDelta::hours(index as i64), *balance))
            .collect()
    }

    #[test]
    fn test_generate_counts_and_averages() {
        let pnls = [dec!(5), dec!(-2), dec!(7)];
        let curve = equity(&[dec!(1000), dec!(1005), dec!(1003), dec!(1010)]);

        let metrics = generate(dec!(1000), &pnls, &curve);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(metrics.total_pnl, dec!(10));
        assert_eq!(metrics.total_return, dec!(1));
        assert_eq!(metrics.average_win, dec!(6));
        assert_eq!(metrics.average_loss, dec!(2));
        assert_eq!(metrics.profit_factor, Some(dec!(6)));
        assert!(metrics.sharpe_ratio.is_some());
    }

    #[test]
    fn test_generate_with_no_trades() {
        let metrics = generate(dec!(1000), &[], &equity(&[dec!(1000)]));
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, Decimal::ZERO);
        assert_eq!(metrics.total_pnl, Decimal::ZERO);
        assert_eq!(metrics.profit_factor, None);
        assert_eq!(metrics.sharpe_ratio, None);
    }

    #[test]
    fn test_drawdown_reflects_equity_trough() {
        let curve = equity(&[dec!(1000), dec!(1100), dec!(880), dec!(1200)]);
        let metrics = generate(dec!(1000), &[dec!(200)], &curve);
        // Peak 1100 -> trough 880 = 20% drawdown.
        assert_eq!(metrics.max_drawdown, dec!(20));
    }
}
