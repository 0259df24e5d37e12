use crate::error::EngineResult;
use crate::models::*;
use crate::param_utils::ParameterGrid;
use crate::strategy::SignalGenerator;
use crate::strategy_utils::{ensure_history, signals_from_actions};

/// Buy on the first bar and never sell; the engine closes at end of period.
pub struct BuyAndHoldStrategy;

impl SignalGenerator for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn generate(&self, bars: &[Bar], params: &ParameterSet) -> EngineResult<Vec<Signal>> {
        ensure_history(bars, self.min_data_points(params), self.name())?;
        let mut actions = vec![SignalAction::Hold; bars.len()];
        actions[0] = SignalAction::Buy;
        Ok(signals_from_actions(bars, &actions))
    }

    fn min_data_points(&self, _params: &ParameterSet) -> usize {
        1
    }

    fn default_grid(&self) -> ParameterGrid {
        let mut grid = ParameterGrid::new();
        grid.insert("position_fraction".to_string(), vec![1.0]);
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::engine::run_simulation;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn holds_until_end_of_period() {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = [100.0, 105.0, 110.0]
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 0.0,
            })
            .collect();
        let signals = BuyAndHoldStrategy
            .generate(&bars, &ParameterSet::new())
            .unwrap();
        let run = run_simulation(&bars, &signals, &RunConfig::new(1_000.0, 0.0)).unwrap();

        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.trades[0].exit_reason, ExitReason::EndOfPeriod);
        assert!((run.equity_curve.final_equity() - 1_100.0).abs() < 1e-9);
    }
}
