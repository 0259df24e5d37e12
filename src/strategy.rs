use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::param_utils::ParameterGrid;
use std::sync::Arc;

/// Turns a bar series plus a parameter set into one signal per bar.
///
/// Generators are stateless so one instance can serve every optimizer worker.
pub trait SignalGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, bars: &[Bar], params: &ParameterSet) -> EngineResult<Vec<Signal>>;

    fn min_data_points(&self, params: &ParameterSet) -> usize;

    /// Search space used when no grid file is supplied.
    fn default_grid(&self) -> ParameterGrid;
}

#[path = "strategies/classical.rs"]
pub mod classical;

pub use classical::ClassicalStrategy;

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::RSIStrategy;

#[path = "strategies/buy_and_hold.rs"]
pub mod buy_and_hold;

pub use buy_and_hold::BuyAndHoldStrategy;

pub const STRATEGY_NAMES: [&str; 3] = ["classical", "rsi", "buy_and_hold"];

pub fn create_signal_generator(name: &str) -> EngineResult<Arc<dyn SignalGenerator>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "classical" => Ok(Arc::new(ClassicalStrategy)),
        "rsi" => Ok(Arc::new(RSIStrategy)),
        "buy_and_hold" => Ok(Arc::new(BuyAndHoldStrategy)),
        other => Err(EngineError::configuration(format!(
            "Unknown strategy `{}` (expected one of: {})",
            other,
            STRATEGY_NAMES.join(", ")
        ))),
    }
}
