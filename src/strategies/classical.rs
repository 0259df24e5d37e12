use crate::error::EngineResult;
use crate::indicators::{calculate_bollinger_bands, calculate_macd, calculate_rsi};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_rounded_clamped, ParameterGrid};
use crate::strategy::SignalGenerator;
use crate::strategy_utils::{closes, ensure_history, signals_from_actions};

const MAX_WINDOW: usize = 500;

/// RSI, MACD and Bollinger confirmation rules.
///
/// Buy: RSI below `rsi_buy`, MACD above its signal line and the close at or
/// under the lower band. Sell: RSI above `rsi_sell`, or MACD below its signal
/// line with the close at or over the upper band. Sell wins when both match.
pub struct ClassicalStrategy;

#[derive(Debug, Clone, Copy)]
struct ClassicalParams {
    rsi_window: usize,
    rsi_buy: f64,
    rsi_sell: f64,
    macd_fast: usize,
    macd_slow: usize,
    macd_signal: usize,
    bollinger_window: usize,
    bollinger_std: f64,
}

impl ClassicalParams {
    fn from_parameters(params: &ParameterSet) -> Self {
        Self {
            rsi_window: get_param_usize_rounded_clamped(params, "rsi_window", 14, 2, MAX_WINDOW),
            rsi_buy: get_param_f64(params, "rsi_buy", 30.0),
            rsi_sell: get_param_f64(params, "rsi_sell", 70.0),
            macd_fast: get_param_usize_rounded_clamped(params, "macd_fast", 12, 1, MAX_WINDOW),
            macd_slow: get_param_usize_rounded_clamped(params, "macd_slow", 26, 1, MAX_WINDOW),
            macd_signal: get_param_usize_rounded_clamped(params, "macd_signal", 9, 1, MAX_WINDOW),
            bollinger_window: get_param_usize_rounded_clamped(
                params,
                "bollinger_window",
                20,
                2,
                MAX_WINDOW,
            ),
            bollinger_std: get_param_f64(params, "bollinger_std", 2.0),
        }
    }

    fn largest_window(&self) -> usize {
        self.rsi_window
            .max(self.macd_fast)
            .max(self.macd_slow)
            .max(self.bollinger_window)
    }
}

impl SignalGenerator for ClassicalStrategy {
    fn name(&self) -> &str {
        "classical"
    }

    fn generate(&self, bars: &[Bar], params: &ParameterSet) -> EngineResult<Vec<Signal>> {
        let p = ClassicalParams::from_parameters(params);
        ensure_history(bars, self.min_data_points(params), self.name())?;

        let prices = closes(bars);
        let rsi = calculate_rsi(&prices, p.rsi_window);
        let macd = calculate_macd(&prices, p.macd_fast, p.macd_slow, p.macd_signal);
        let bands = calculate_bollinger_bands(&prices, p.bollinger_window, p.bollinger_std);

        let actions: Vec<SignalAction> = (0..prices.len())
            .map(|i| {
                let close = prices[i];
                let macd_above = macd.macd[i] > macd.signal[i];
                let macd_below = macd.macd[i] < macd.signal[i];

                let sell = rsi[i] > p.rsi_sell || (macd_below && close >= bands.upper[i]);
                let buy = rsi[i] < p.rsi_buy && macd_above && close <= bands.lower[i];

                if sell {
                    SignalAction::Sell
                } else if buy {
                    SignalAction::Buy
                } else {
                    SignalAction::Hold
                }
            })
            .collect();

        Ok(signals_from_actions(bars, &actions))
    }

    fn min_data_points(&self, params: &ParameterSet) -> usize {
        ClassicalParams::from_parameters(params).largest_window()
    }

    fn default_grid(&self) -> ParameterGrid {
        let mut grid = ParameterGrid::new();
        grid.insert("rsi_window".to_string(), vec![7.0, 10.0, 14.0, 21.0]);
        grid.insert("rsi_buy".to_string(), vec![25.0, 30.0, 35.0]);
        grid.insert("rsi_sell".to_string(), vec![65.0, 70.0, 75.0]);
        grid.insert("macd_fast".to_string(), vec![8.0, 12.0, 16.0, 20.0]);
        grid.insert("macd_slow".to_string(), vec![21.0, 26.0, 30.0, 34.0]);
        grid.insert("macd_signal".to_string(), vec![7.0, 9.0, 11.0, 13.0]);
        grid.insert("bollinger_window".to_string(), vec![10.0, 15.0, 20.0, 25.0]);
        grid.insert("bollinger_std".to_string(), vec![1.0, 1.5, 2.0]);
        grid
    }
}
