use crate::error::EngineResult;
use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_rounded_clamped, ParameterGrid};
use crate::strategy::SignalGenerator;
use crate::strategy_utils::{closes, ensure_history, signals_from_actions};

pub struct RSIStrategy;

impl RSIStrategy {
    fn period(params: &ParameterSet) -> usize {
        get_param_usize_rounded_clamped(params, "period", 14, 2, 500)
    }
}

impl SignalGenerator for RSIStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn generate(&self, bars: &[Bar], params: &ParameterSet) -> EngineResult<Vec<Signal>> {
        let period = Self::period(params);
        let oversold_level = get_param_f64(params, "oversold_level", 30.0);
        let overbought_level = get_param_f64(params, "overbought_level", 70.0);
        ensure_history(bars, self.min_data_points(params), self.name())?;

        let rsi = indicators::calculate_rsi(&closes(bars), period);
        let actions: Vec<SignalAction> = rsi
            .iter()
            .map(|&value| {
                if value < oversold_level {
                    SignalAction::Buy
                } else if value > overbought_level {
                    SignalAction::Sell
                } else {
                    SignalAction::Hold
                }
            })
            .collect();

        Ok(signals_from_actions(bars, &actions))
    }

    fn min_data_points(&self, params: &ParameterSet) -> usize {
        Self::period(params) + 1
    }

    fn default_grid(&self) -> ParameterGrid {
        let mut grid = ParameterGrid::new();
        grid.insert("period".to_string(), vec![7.0, 14.0, 21.0]);
        grid.insert("oversold_level".to_string(), vec![20.0, 25.0, 30.0, 35.0]);
        grid.insert("overbought_level".to_string(), vec![65.0, 70.0, 75.0, 80.0]);
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn falling_then_rising_prices_buy_then_sell() {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let prices: Vec<f64> = (0..20)
            .map(|i| 100.0 - i as f64)
            .chain((0..20).map(|i| 81.0 + 2.0 * i as f64))
            .collect();
        let bars: Vec<Bar> = prices
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

        let mut params = ParameterSet::new();
        params.insert("period".to_string(), 5.0);
        let signals = RSIStrategy.generate(&bars, &params).unwrap();

        assert_eq!(signals[4].action, SignalAction::Hold);
        assert_eq!(signals[10].action, SignalAction::Buy);
        assert_eq!(signals[39].action, SignalAction::Sell);
    }
}
