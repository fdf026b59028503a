//! Summary metrics over closed trades and the equity curve.

use crate::domain::models::{EquityPoint, Metrics, Trade};

/// Compute the canonical metric set.
///
/// - `expectancy` is mean net profit per trade.
/// - `sharpe_ratio` is mean over standard deviation of per-bar equity
///   returns, unannualized.
/// - `profit_factor` is gross wins over absolute gross losses; infinite when
///   there are wins but no losses (serialized as null in JSON).
pub fn compute_metrics(
    trades: &[Trade],
    equity_curve: &[EquityPoint],
    starting_balance: f64,
) -> Metrics {
    let total_trades = trades.len();
    let winners: Vec<&Trade> = trades.iter().filter(|t| t.net_profit > 0.0).collect();
    let losers: Vec<&Trade> = trades.iter().filter(|t| t.net_profit <= 0.0).collect();

    let total_gross_pnl: f64 = trades.iter().map(|t| t.gross_profit).sum();
    let total_commissions: f64 = trades.iter().map(|t| t.commission).sum();
    let total_net_pnl: f64 = trades.iter().map(|t| t.net_profit).sum();

    let avg_profit = if winners.is_empty() {
        0.0
    } else {
        winners.iter().map(|t| t.net_profit).sum::<f64>() / winners.len() as f64
    };
    let avg_loss = if losers.is_empty() {
        0.0
    } else {
        losers.iter().map(|t| t.net_profit).sum::<f64>() / losers.len() as f64
    };

    let win_rate = if total_trades == 0 {
        0.0
    } else {
        winners.len() as f64 / total_trades as f64
    };
    let expectancy = if total_trades == 0 {
        0.0
    } else {
        total_net_pnl / total_trades as f64
    };

    let gross_wins: f64 = winners.iter().map(|t| t.net_profit).sum();
    let gross_losses: f64 = losers.iter().map(|t| t.net_profit.abs()).sum();
    let profit_factor = if gross_losses > 0.0 {
        gross_wins / gross_losses
    } else if gross_wins > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let (max_drawdown, max_drawdown_pct) = drawdown(equity_curve);
    let return_pct = if starting_balance > 0.0 {
        total_net_pnl / starting_balance * 100.0
    } else {
        0.0
    };

    Metrics {
        total_trades,
        winning_trades: winners.len(),
        losing_trades: losers.len(),
        win_rate,
        avg_profit,
        avg_loss,
        expectancy,
        total_gross_pnl,
        total_commissions,
        total_net_pnl,
        return_pct,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio: sharpe(equity_curve),
        profit_factor,
    }
}

/// Peak-to-trough drawdown over the equity curve, absolute and as a
/// percentage of the peak.
fn drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    let mut max_dd_pct = 0.0_f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        let dd = peak - point.equity;
        if dd > max_dd {
            max_dd = dd;
            max_dd_pct = if peak > 0.0 { dd / peak * 100.0 } else { 0.0 };
        }
    }
    (max_dd, max_dd_pct)
}

fn sharpe(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].equity != 0.0)
        .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        0.0
    } else {
        mean / std_dev
    }
}
