use crate::config::{RunConfig, ValidationThresholds};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Bar, BestStrategyParams, DateWindow, PerformanceMetrics, StrategyValidation,
};
use crate::optimizer::backtest_parameters;
use crate::strategy::SignalGenerator;
use log::info;
use std::sync::Arc;

pub const VALID_REASON: &str = "OK";

/// Out-of-sample acceptance check for an optimized parameter set.
///
/// A failed threshold is a normal verdict, never an error. Errors are
/// reserved for setup problems such as overlapping windows.
pub struct StrategyValidator {
    generator: Arc<dyn SignalGenerator>,
    base_config: RunConfig,
    thresholds: ValidationThresholds,
    bars_per_year: f64,
}

impl StrategyValidator {
    pub fn new(
        generator: Arc<dyn SignalGenerator>,
        base_config: RunConfig,
        thresholds: ValidationThresholds,
    ) -> Self {
        Self {
            generator,
            base_config,
            thresholds,
            bars_per_year: 252.0,
        }
    }

    pub fn with_bars_per_year(mut self, bars_per_year: f64) -> Self {
        self.bars_per_year = bars_per_year;
        self
    }

    pub fn validate(
        &self,
        bars_out_of_sample: &[Bar],
        best_params: &BestStrategyParams,
    ) -> EngineResult<StrategyValidation> {
        if best_params.strategy_name != self.generator.name() {
            return Err(EngineError::configuration(format!(
                "parameters belong to `{}` but the validator runs `{}`",
                best_params.strategy_name,
                self.generator.name()
            )));
        }
        let validation_window = DateWindow::from_bars(bars_out_of_sample)
            .ok_or_else(|| EngineError::configuration("validation window has no bars"))?;
        ensure_disjoint(&best_params.train_window, &validation_window)?;

        let (_, metrics) = backtest_parameters(
            bars_out_of_sample,
            self.generator.as_ref(),
            &self.base_config,
            &best_params.params,
            self.bars_per_year,
        )?;
        let (is_valid, reason) = evaluate_thresholds(&metrics, &self.thresholds);
        let validation = StrategyValidation {
            ticker: best_params.ticker.clone(),
            strategy_name: best_params.strategy_name.clone(),
            params: best_params.params.clone(),
            is_valid,
            reason,
            validation_window,
            metrics,
        };

        info!(
            "Validation of {} {} on {}: {} ({})",
            validation.ticker,
            validation.strategy_name,
            validation.validation_window,
            validation.status().as_str(),
            validation.reason
        );
        Ok(validation)
    }
}

pub fn ensure_disjoint(train: &DateWindow, validation: &DateWindow) -> EngineResult<()> {
    if train.overlaps(validation) {
        return Err(EngineError::configuration(format!(
            "validation window {} overlaps training window {}",
            validation, train
        )));
    }
    Ok(())
}

/// Apply thresholds in priority order and name the first one that fails.
pub fn evaluate_thresholds(
    metrics: &PerformanceMetrics,
    thresholds: &ValidationThresholds,
) -> (bool, String) {
    if !(metrics.max_drawdown <= thresholds.max_drawdown_allowed) {
        return (
            false,
            format!(
                "High drawdown: {:.2}% exceeds {:.2}%",
                metrics.max_drawdown * 100.0,
                thresholds.max_drawdown_allowed * 100.0
            ),
        );
    }
    if !(metrics.sharpe_ratio >= thresholds.min_sharpe) {
        return (
            false,
            format!(
                "Low Sharpe ratio: {:.4} below {:.4}",
                metrics.sharpe_ratio, thresholds.min_sharpe
            ),
        );
    }
    if metrics.trade_count < thresholds.min_trade_count {
        return (
            false,
            format!(
                "Not enough trades: {} below {}",
                metrics.trade_count, thresholds.min_trade_count
            ),
        );
    }
    if let Some(min_return) = thresholds.min_total_return {
        if !(metrics.total_return >= min_return) {
            return (
                false,
                format!(
                    "Low return: {:.2}% below {:.2}%",
                    metrics.total_return * 100.0,
                    min_return * 100.0
                ),
            );
        }
    }
    (true, VALID_REASON.to_string())
}
