/// Maximum peak-to-trough drawdown over an equity curve.
pub mod drawdown;

/// Gross profit over gross loss.
pub mod profit_factor;

/// Risk-adjusted return.
pub mod sharpe;

/// Percentage of winning trades.
pub mod win_rate;
