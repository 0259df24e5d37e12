//! Indicator series aligned index-for-index with their input. Warm-up slots
//! hold `NaN`, so comparisons against them are always false.

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut sma_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return sma_values;
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values[period - 1] = window_sum / period as f64;
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values[i] = window_sum / period as f64;
    }

    sma_values
}

/// EMA seeded with the SMA of the first `period` values.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let mut ema_values = vec![f64::NAN; prices.len()];
    let Some(seed_index) = first_full_window(prices, period) else {
        return ema_values;
    };

    let seed_start = seed_index + 1 - period;
    let seed = prices[seed_start..=seed_index].iter().sum::<f64>() / period as f64;
    ema_values[seed_index] = seed;

    let multiplier = 2.0 / (period as f64 + 1.0);
    for i in (seed_index + 1)..prices.len() {
        ema_values[i] = (prices[i] - ema_values[i - 1]) * multiplier + ema_values[i - 1];
    }

    ema_values
}

// First index closing a run of `period` finite values, used to skip NaN warm-up
// when an EMA is chained onto another indicator.
fn first_full_window(values: &[f64], period: usize) -> Option<usize> {
    if period == 0 {
        return None;
    }
    let mut run = 0usize;
    for (i, value) in values.iter().enumerate() {
        if value.is_finite() {
            run += 1;
            if run == period {
                return Some(i);
            }
        } else {
            run = 0;
        }
    }
    None
}

pub struct MacdOutput {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdOutput {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal = calculate_ema(&macd, signal_period);
    let histogram = macd
        .iter()
        .zip(signal.iter())
        .map(|(line, signal)| line - signal)
        .collect();

    MacdOutput {
        macd,
        signal,
        histogram,
    }
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder RSI; the first value lands at index `period`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut rsi_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return rsi_values;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bands at `middle ± std_dev * σ`, σ being the population deviation of the window.
pub fn calculate_bollinger_bands(prices: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = calculate_sma(prices, period);
    let mut upper = vec![f64::NAN; prices.len()];
    let mut lower = vec![f64::NAN; prices.len()];

    if period > 0 && prices.len() >= period {
        for i in (period - 1)..prices.len() {
            let window = &prices[i + 1 - period..=i];
            let mean = middle[i];
            let variance =
                window.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / period as f64;
            let deviation = variance.sqrt();

            upper[i] = mean + std_dev * deviation;
            lower[i] = mean - std_dev * deviation;
        }
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}
