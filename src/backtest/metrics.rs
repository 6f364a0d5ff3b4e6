use super::{BacktestMetrics, BacktestTrade};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Compute aggregate metrics from the closed-trade log.
///
/// Drawdown is measured over the post-trade capital series with the peak
/// tracked from initial capital. Sharpe annualizes per-trade returns
/// (relative to initial capital) by √252 and is zero with fewer than two
/// trades or zero dispersion. Profit factor is `None` when there are no
/// losing trades.
pub fn compute(trades: &[BacktestTrade], initial_capital: f64) -> BacktestMetrics {
    let total_trades = trades.len();
    let mut winning_trades = 0usize;
    let mut losing_trades = 0usize;
    let mut win_sum = 0.0_f64;
    let mut loss_sum = 0.0_f64;
    let mut largest_win = 0.0_f64;
    let mut largest_loss = 0.0_f64;
    let mut r_sum = 0.0_f64;

    let mut capital = initial_capital;
    let mut peak = initial_capital;
    let mut max_drawdown = 0.0_f64;

    for trade in trades {
        if trade.pnl > 0.0 {
            winning_trades += 1;
            win_sum += trade.pnl;
            largest_win = largest_win.max(trade.pnl);
        } else if trade.pnl < 0.0 {
            losing_trades += 1;
            loss_sum += trade.pnl;
            largest_loss = largest_loss.min(trade.pnl);
        }
        r_sum += trade.r_multiple;

        capital += trade.pnl;
        peak = peak.max(capital);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - capital) / peak);
        }
    }

    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64
    } else {
        0.0
    };
    let profit_factor = if loss_sum < 0.0 {
        Some(win_sum / loss_sum.abs())
    } else {
        None
    };
    let total_return = capital - initial_capital;

    BacktestMetrics {
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        total_return,
        total_return_pct: total_return / initial_capital,
        max_drawdown,
        sharpe: sharpe(trades, initial_capital),
        profit_factor,
        avg_win: mean_or_zero(win_sum, winning_trades),
        avg_loss: mean_or_zero(loss_sum, losing_trades),
        avg_r_multiple: mean_or_zero(r_sum, total_trades),
        largest_win,
        largest_loss,
    }
}

fn mean_or_zero(sum: f64, count: usize) -> f64 {
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

fn sharpe(trades: &[BacktestTrade], initial_capital: f64) -> f64 {
    if trades.len() < 2 || initial_capital <= 0.0 {
        return 0.0;
    }
    let returns: Vec<f64> = trades.iter().map(|t| t.pnl / initial_capital).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let std = std_dev(&returns);
    if std > 0.0 {
        mean / std * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}
