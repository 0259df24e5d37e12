use crate::config::OptimizationObjective;
use crate::models::PerformanceMetrics;
use std::sync::Arc;

const COMPOSITE_RETURN_WEIGHT: f64 = 0.4;
const COMPOSITE_DRAWDOWN_WEIGHT: f64 = 0.3;
const COMPOSITE_TRADES_WEIGHT: f64 = 0.1;
const COMPOSITE_WIN_RATE_WEIGHT: f64 = 0.2;
const COMPOSITE_TRADES_REFERENCE: f64 = 200.0;

/// Maps metrics to a scalar; higher is better.
pub trait ScoringFn: Send + Sync {
    fn score(&self, metrics: &PerformanceMetrics) -> f64;

    fn label(&self) -> String {
        "custom".to_string()
    }
}

impl<F> ScoringFn for F
where
    F: Fn(&PerformanceMetrics) -> f64 + Send + Sync,
{
    fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        self(metrics)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SharpeScore;

impl ScoringFn for SharpeScore {
    fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        metrics.sharpe_ratio
    }

    fn label(&self) -> String {
        "sharpe".to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TotalReturnScore;

impl ScoringFn for TotalReturnScore {
    fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        metrics.total_return
    }

    fn label(&self) -> String {
        "total_return".to_string()
    }
}

/// Blend of bounded return, drawdown, activity and hit rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeScore;

impl ScoringFn for CompositeScore {
    fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        composite_score(metrics)
    }

    fn label(&self) -> String {
        "composite".to_string()
    }
}

pub fn composite_score(metrics: &PerformanceMetrics) -> f64 {
    let return_norm = metrics.total_return.tanh();
    let drawdown_norm = metrics.max_drawdown.tanh();
    let trades_norm = (metrics.trade_count as f64 / COMPOSITE_TRADES_REFERENCE).min(1.0);

    COMPOSITE_RETURN_WEIGHT * return_norm - COMPOSITE_DRAWDOWN_WEIGHT * drawdown_norm
        + COMPOSITE_TRADES_WEIGHT * trades_norm
        + COMPOSITE_WIN_RATE_WEIGHT * metrics.win_rate
}

pub fn scoring_for_objective(objective: OptimizationObjective) -> Arc<dyn ScoringFn> {
    match objective {
        OptimizationObjective::Sharpe => Arc::new(SharpeScore),
        OptimizationObjective::TotalReturn => Arc::new(TotalReturnScore),
        OptimizationObjective::Composite => Arc::new(CompositeScore),
    }
}

/// Non-finite scores sort below every finite one.
pub fn rank_value(score: f64) -> f64 {
    if score.is_finite() {
        score
    } else {
        f64::NEG_INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> PerformanceMetrics {
        PerformanceMetrics {
            total_return: 0.25,
            annualized_return: 0.1,
            max_drawdown: 0.1,
            sharpe_ratio: 1.3,
            win_rate: 0.6,
            trade_count: 50,
            avg_trade_pnl: 12.0,
        }
    }

    #[test]
    fn builtin_scores_pick_their_metric() {
        let m = metrics();
        assert_eq!(SharpeScore.score(&m), 1.3);
        assert_eq!(TotalReturnScore.score(&m), 0.25);
        let closure = |m: &PerformanceMetrics| m.win_rate * 2.0;
        assert_eq!(closure.score(&m), 1.2);
        assert_eq!(
            scoring_for_objective(OptimizationObjective::Composite).label(),
            "composite"
        );
    }

    #[test]
    fn composite_matches_weighted_blend() {
        let m = metrics();
        let expected = 0.4 * 0.25_f64.tanh() - 0.3 * 0.1_f64.tanh() + 0.1 * 0.25 + 0.2 * 0.6;
        assert!((composite_score(&m) - expected).abs() < 1e-12);

        let busy = PerformanceMetrics {
            trade_count: 1_000,
            ..m
        };
        let capped = PerformanceMetrics {
            trade_count: 200,
            ..m
        };
        assert_eq!(composite_score(&busy), composite_score(&capped));
    }

    #[test]
    fn non_finite_scores_rank_last() {
        assert_eq!(rank_value(f64::NAN), f64::NEG_INFINITY);
        assert!(rank_value(-1e9) > rank_value(f64::INFINITY));
    }
}
