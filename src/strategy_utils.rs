use crate::error::{EngineError, EngineResult};
use crate::models::{Bar, Signal, SignalAction};

/// Pair each bar with the action decided for it.
pub fn signals_from_actions(bars: &[Bar], actions: &[SignalAction]) -> Vec<Signal> {
    bars.iter()
        .zip(actions.iter())
        .map(|(bar, action)| Signal::new(bar.timestamp, *action))
        .collect()
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|bar| bar.close).collect()
}

/// Fail with a data-quality error when the series is too short for a generator.
pub fn ensure_history(bars: &[Bar], required: usize, generator: &str) -> EngineResult<()> {
    if bars.len() < required {
        return Err(EngineError::data_quality(format!(
            "{} needs at least {} bars, {} provided",
            generator,
            required,
            bars.len()
        )));
    }
    Ok(())
}
