use crate::models::*;
use statrs::statistics::Statistics;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Derive summary statistics from a finished simulation.
    ///
    /// Statistics run over `[initial_equity, points...]`, so a fee charged on
    /// the first bar already counts as a drawdown from the starting capital.
    pub fn evaluate(
        equity_curve: &EquityCurve,
        trades: &[Trade],
        bars_per_year: f64,
    ) -> PerformanceMetrics {
        let equity = equity_curve.values();
        let periods = equity_curve.len();

        let total_return = Self::calculate_total_return(&equity);
        let annualized_return =
            Self::calculate_annualized_return(total_return, periods, bars_per_year);
        let max_drawdown = Self::calculate_max_drawdown(&equity);
        let sharpe_ratio = Self::calculate_sharpe_ratio(&equity, bars_per_year);

        let trade_count = trades.len();
        let winning_trades = trades.iter().filter(|trade| trade.pnl > 0.0).count();
        let win_rate = if trade_count > 0 {
            winning_trades as f64 / trade_count as f64
        } else {
            0.0
        };
        let avg_trade_pnl = Self::average(trades.iter().map(|trade| trade.pnl));

        PerformanceMetrics {
            total_return,
            annualized_return,
            max_drawdown,
            sharpe_ratio,
            win_rate,
            trade_count,
            avg_trade_pnl,
        }
    }

    pub fn calculate_total_return(equity: &[f64]) -> f64 {
        match (equity.first(), equity.last()) {
            (Some(&first), Some(&last)) if first > 0.0 && last.is_finite() => last / first - 1.0,
            _ => 0.0,
        }
    }

    fn calculate_annualized_return(total_return: f64, periods: usize, bars_per_year: f64) -> f64 {
        if periods == 0 || bars_per_year <= 0.0 || !total_return.is_finite() {
            return 0.0;
        }
        let growth = 1.0 + total_return;
        if growth <= 0.0 {
            return -1.0;
        }
        growth.powf(bars_per_year / periods as f64) - 1.0
    }

    /// Largest peak-to-trough decline as a positive fraction of the peak.
    pub fn calculate_max_drawdown(equity: &[f64]) -> f64 {
        let Some(&first) = equity.first() else {
            return 0.0;
        };

        let mut peak_value = first;
        let mut max_drawdown = 0.0;
        for &value in equity {
            if value > peak_value {
                peak_value = value;
            } else if peak_value > 0.0 {
                let drawdown = (peak_value - value) / peak_value;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }
        max_drawdown
    }

    pub fn calculate_sharpe_ratio(equity: &[f64], bars_per_year: f64) -> f64 {
        if equity.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = equity
            .windows(2)
            .map(|window| {
                let prev_value = window[0];
                let curr_value = window[1];
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.iter().mean();
        let std_dev = returns.iter().std_dev();

        if !std_dev.is_finite() || std_dev <= 0.0 || !mean_return.is_finite() {
            return 0.0;
        }

        mean_return / std_dev * bars_per_year.max(0.0).sqrt()
    }

    fn average(values: impl Iterator<Item = f64>) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;

        for value in values {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::engine::run_simulation;
    use chrono::{Duration, TimeZone, Utc};

    fn curve(initial: f64, values: &[f64]) -> EquityCurve {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let mut curve = EquityCurve::new(initial);
        for (i, value) in values.iter().enumerate() {
            curve.push(start + Duration::days(i as i64), *value);
        }
        curve
    }

    fn trade_with_pnl(pnl: f64) -> Trade {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        Trade {
            entry_timestamp: start,
            exit_timestamp: start + Duration::days(1),
            entry_price: 100.0,
            exit_price: 100.0 + pnl / 10.0,
            quantity: 10.0,
            fee_paid: 0.0,
            pnl,
            exit_reason: ExitReason::Signal,
        }
    }

    #[test]
    fn flat_curve_has_zero_statistics() {
        let metrics = PerformanceCalculator::evaluate(&curve(1_000.0, &[1_000.0; 5]), &[], 252.0);
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.annualized_return, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.trade_count, 0);
    }

    #[test]
    fn drawdown_tracks_running_peak() {
        let equity = [100.0, 120.0, 90.0, 130.0, 117.0];
        let drawdown = PerformanceCalculator::calculate_max_drawdown(&equity);
        assert!((drawdown - 0.25).abs() < 1e-12);
    }

    #[test]
    fn annualizes_over_curve_length() {
        let metrics =
            PerformanceCalculator::evaluate(&curve(100.0, &[105.0, 110.0, 121.0]), &[], 3.0);
        assert!((metrics.total_return - 0.21).abs() < 1e-12);
        assert!((metrics.annualized_return - 0.21).abs() < 1e-12);

        let semi = PerformanceCalculator::evaluate(&curve(100.0, &[110.0, 121.0]), &[], 1.0);
        assert!((semi.annualized_return - 0.1).abs() < 1e-12);
    }

    #[test]
    fn sharpe_uses_sample_deviation() {
        let equity = [100.0, 110.0, 99.0, 108.9];
        let returns = [0.1, -0.1, 0.1];
        let mean = returns.iter().sum::<f64>() / 3.0;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 2.0;
        let expected = mean / variance.sqrt() * 252.0_f64.sqrt();

        let sharpe = PerformanceCalculator::calculate_sharpe_ratio(&equity, 252.0);
        assert!((sharpe - expected).abs() < 1e-9);
    }

    #[test]
    fn win_rate_and_average_pnl_from_trades() {
        let trades = vec![trade_with_pnl(50.0), trade_with_pnl(-10.0), trade_with_pnl(20.0)];
        let metrics = PerformanceCalculator::evaluate(&curve(1_000.0, &[1_060.0]), &trades, 252.0);
        assert_eq!(metrics.trade_count, 3);
        assert!((metrics.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.avg_trade_pnl - 20.0).abs() < 1e-12);
    }

    #[test]
    fn fee_only_round_trip_metrics() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..10)
            .map(|i| Bar {
                timestamp: start + Duration::days(i),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 0.0,
            })
            .collect();
        let mut signals: Vec<Signal> = bars.iter().map(|b| Signal::hold(b.timestamp)).collect();
        signals[0].action = SignalAction::Buy;
        signals[9].action = SignalAction::Sell;

        let run = run_simulation(&bars, &signals, &RunConfig::new(10_000.0, 0.001)).unwrap();
        let metrics = PerformanceCalculator::evaluate(&run.equity_curve, &run.trades, 252.0);

        assert_eq!(metrics.trade_count, 1);
        assert!((metrics.max_drawdown - 0.002).abs() < 1e-4);
        assert!((metrics.total_return + 0.002).abs() < 1e-4);
        assert_eq!(metrics.win_rate, 0.0);

        // Entry fee on the first bar, flat for eight bars, exit fee on the last.
        let mut returns = vec![-0.001 / 1.001];
        returns.extend([0.0; 8]);
        returns.push(-0.001);
        let mean = returns.iter().sum::<f64>() / 10.0;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 9.0;
        let expected = mean / variance.sqrt() * 252.0_f64.sqrt();
        assert!((metrics.sharpe_ratio - expected).abs() < 1e-6);
        assert!((metrics.sharpe_ratio + 7.5299).abs() < 1e-3);
    }
}
