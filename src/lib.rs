pub mod commands;
pub mod config;
pub mod context;
pub mod data_context;
pub mod database;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod performance;
pub(crate) mod retry;
pub mod scoring;
pub mod search;
pub mod strategy;
pub mod strategy_utils;
pub mod trading_rules;
pub mod validator;

pub use config::RunConfig;
pub use engine::{run_simulation, Engine, SimulationRun};
pub use error::{EngineError, EngineResult};
pub use optimizer::{OptimizationReport, ParameterOptimizer};
pub use performance::PerformanceCalculator;
pub use validator::StrategyValidator;
