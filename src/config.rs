use crate::error::{EngineError, EngineResult};
use crate::models::ParameterSet;
use crate::param_utils::finite_param;
use crate::trading_rules::SizingRule;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
const DEFAULT_TRANSACTION_FEE_RATE: f64 = 0.001;
const DEFAULT_BARS_PER_YEAR: f64 = 252.0;

/// Immutable inputs of a single simulation run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub initial_capital: f64,
    pub transaction_fee_rate: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub position_sizing_rule: SizingRule,
    pub strategy_params: ParameterSet,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            transaction_fee_rate: DEFAULT_TRANSACTION_FEE_RATE,
            stop_loss_pct: None,
            take_profit_pct: None,
            position_sizing_rule: SizingRule::default(),
            strategy_params: ParameterSet::new(),
        }
    }
}

impl RunConfig {
    pub fn new(initial_capital: f64, transaction_fee_rate: f64) -> Self {
        Self {
            initial_capital,
            transaction_fee_rate,
            ..Default::default()
        }
    }

    pub fn with_stop_loss(mut self, pct: f64) -> Self {
        self.stop_loss_pct = Some(pct);
        self
    }

    pub fn with_take_profit(mut self, pct: f64) -> Self {
        self.take_profit_pct = Some(pct);
        self
    }

    pub fn with_sizing(mut self, rule: SizingRule) -> Self {
        self.position_sizing_rule = rule;
        self
    }

    /// Attach strategy parameters. Run-level keys (`stop_loss_pct`,
    /// `take_profit_pct`, `position_fraction`) override the base settings.
    pub fn with_parameters(mut self, parameters: &ParameterSet) -> Self {
        if let Some(pct) = finite_param(parameters, "stop_loss_pct") {
            self.stop_loss_pct = (pct > 0.0).then_some(pct);
        }
        if let Some(pct) = finite_param(parameters, "take_profit_pct") {
            self.take_profit_pct = (pct > 0.0).then_some(pct);
        }
        if let Some(fraction) = finite_param(parameters, "position_fraction") {
            self.position_sizing_rule = SizingRule::fixed_fraction(fraction);
        }
        self.strategy_params = parameters.clone();
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::configuration(format!(
                "initial_capital must be > 0 (value: {})",
                self.initial_capital
            )));
        }
        if !self.transaction_fee_rate.is_finite()
            || !(0.0..1.0).contains(&self.transaction_fee_rate)
        {
            return Err(EngineError::configuration(format!(
                "transaction_fee_rate must be in [0, 1) (value: {})",
                self.transaction_fee_rate
            )));
        }
        if let Some(pct) = self.stop_loss_pct {
            if !pct.is_finite() || pct <= 0.0 || pct >= 1.0 {
                return Err(EngineError::configuration(format!(
                    "stop_loss_pct must be in (0, 1) (value: {})",
                    pct
                )));
            }
        }
        if let Some(pct) = self.take_profit_pct {
            if !pct.is_finite() || pct <= 0.0 {
                return Err(EngineError::configuration(format!(
                    "take_profit_pct must be > 0 (value: {})",
                    pct
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationObjective {
    Sharpe,
    TotalReturn,
    Composite,
}

impl OptimizationObjective {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(Self::Sharpe),
            "total_return" | "return" => Ok(Self::TotalReturn),
            "composite" | "strategy_score" => Ok(Self::Composite),
            other => Err(anyhow!(
                "OPTIMIZATION_OBJECTIVE must be SHARPE, TOTAL_RETURN or COMPOSITE (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Sharpe => "Sharpe ratio",
            Self::TotalReturn => "total return",
            Self::Composite => "composite score",
        }
    }
}

/// Acceptance thresholds applied to out-of-sample metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationThresholds {
    pub max_drawdown_allowed: f64,
    pub min_sharpe: f64,
    pub min_trade_count: usize,
    pub min_total_return: Option<f64>,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            max_drawdown_allowed: 0.20,
            min_sharpe: 0.0,
            min_trade_count: 2,
            min_total_return: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub initial_capital: f64,
    pub transaction_fee_rate: f64,
    pub bars_per_year: f64,
    pub position_fraction: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub objective: OptimizationObjective,
    pub optimizer_workers: usize,
    pub thresholds: ValidationThresholds,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            transaction_fee_rate: DEFAULT_TRANSACTION_FEE_RATE,
            bars_per_year: DEFAULT_BARS_PER_YEAR,
            position_fraction: 1.0,
            stop_loss_pct: None,
            take_profit_pct: None,
            objective: OptimizationObjective::Sharpe,
            optimizer_workers: num_cpus::get().max(1),
            thresholds: ValidationThresholds::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let initial_capital = optional_setting_f64(settings, "INITIAL_CAPITAL", None, None)?
            .unwrap_or(defaults.initial_capital);
        if initial_capital <= 0.0 {
            return Err(anyhow!(
                "Setting INITIAL_CAPITAL must be > 0 (value: {})",
                initial_capital
            ));
        }
        let transaction_fee_rate =
            optional_setting_f64(settings, "TRANSACTION_FEE_RATE", Some(0.0), None)?
                .unwrap_or(defaults.transaction_fee_rate);
        if transaction_fee_rate >= 1.0 {
            return Err(anyhow!(
                "Setting TRANSACTION_FEE_RATE must be < 1 (value: {})",
                transaction_fee_rate
            ));
        }
        let bars_per_year = optional_setting_f64(settings, "BARS_PER_YEAR", None, None)?
            .unwrap_or(defaults.bars_per_year);
        if bars_per_year <= 0.0 {
            return Err(anyhow!(
                "Setting BARS_PER_YEAR must be > 0 (value: {})",
                bars_per_year
            ));
        }
        let position_fraction =
            optional_setting_f64(settings, "POSITION_FRACTION", None, Some(1.0))?
                .unwrap_or(defaults.position_fraction);
        if position_fraction <= 0.0 {
            return Err(anyhow!(
                "Setting POSITION_FRACTION must be > 0 (value: {})",
                position_fraction
            ));
        }
        let stop_loss_pct = optional_setting_f64(settings, "STOP_LOSS_PCT", Some(0.0), Some(1.0))?
            .filter(|pct| *pct > 0.0);
        let take_profit_pct = optional_setting_f64(settings, "TAKE_PROFIT_PCT", Some(0.0), None)?
            .filter(|pct| *pct > 0.0);
        let objective = match optional_setting(settings, "OPTIMIZATION_OBJECTIVE") {
            Some(raw) => OptimizationObjective::parse(raw)?,
            None => defaults.objective,
        };
        let optimizer_workers = optional_setting_usize(settings, "OPTIMIZER_WORKERS", 1)?
            .unwrap_or(defaults.optimizer_workers);

        let thresholds = ValidationThresholds {
            max_drawdown_allowed: optional_setting_f64(
                settings,
                "VALIDATION_MAX_DRAWDOWN",
                Some(0.0),
                Some(1.0),
            )?
            .unwrap_or(defaults.thresholds.max_drawdown_allowed),
            min_sharpe: optional_setting_f64(settings, "VALIDATION_MIN_SHARPE", None, None)?
                .unwrap_or(defaults.thresholds.min_sharpe),
            min_trade_count: optional_setting_usize(settings, "VALIDATION_MIN_TRADES", 0)?
                .unwrap_or(defaults.thresholds.min_trade_count),
            min_total_return: optional_setting_f64(settings, "VALIDATION_MIN_RETURN", None, None)?,
        };

        Ok(Self {
            initial_capital,
            transaction_fee_rate,
            bars_per_year,
            position_fraction,
            stop_loss_pct,
            take_profit_pct,
            objective,
            optimizer_workers,
            thresholds,
        })
    }

    /// Base run configuration before any per-candidate parameters apply.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            initial_capital: self.initial_capital,
            transaction_fee_rate: self.transaction_fee_rate,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            position_sizing_rule: SizingRule::fixed_fraction(self.position_fraction),
            strategy_params: ParameterSet::new(),
        }
    }
}

/// Read a flat JSON object of scalars into a settings map.
pub fn load_settings_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let parsed: HashMap<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Config file {} is not a JSON object", path.display()))?;

    let mut settings = HashMap::with_capacity(parsed.len());
    for (key, value) in parsed {
        let text = match value {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null => continue,
            other => {
                return Err(anyhow!(
                    "Config key {} must be a scalar (value: {})",
                    key,
                    other
                ))
            }
        };
        settings.insert(key, text);
    }
    Ok(settings)
}

pub fn parse_date_arg(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("Date must be in YYYY-MM-DD format (value: {})", raw))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| anyhow!("Invalid date {}", raw))
}

/// End-of-day timestamp, so a window ending on a date includes its bars.
pub fn parse_end_date_arg(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("Date must be in YYYY-MM-DD format (value: {})", raw))?;
    date.and_hms_opt(23, 59, 59)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| anyhow!("Invalid date {}", raw))
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_settings_fall_back_to_defaults() {
        let parsed = EngineSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed.initial_capital, 10_000.0);
        assert_eq!(parsed.transaction_fee_rate, 0.001);
        assert_eq!(parsed.bars_per_year, 252.0);
        assert_eq!(parsed.objective, OptimizationObjective::Sharpe);
        assert_eq!(parsed.thresholds, ValidationThresholds::default());
    }

    #[test]
    fn rejects_out_of_range_fee() {
        let err = EngineSettings::from_settings_map(&settings(&[("TRANSACTION_FEE_RATE", "1.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("TRANSACTION_FEE_RATE"));
        assert!(
            EngineSettings::from_settings_map(&settings(&[("TRANSACTION_FEE_RATE", "abc")]))
                .is_err()
        );
    }

    #[test]
    fn parses_thresholds_and_objective() {
        let parsed = EngineSettings::from_settings_map(&settings(&[
            ("OPTIMIZATION_OBJECTIVE", "composite"),
            ("VALIDATION_MAX_DRAWDOWN", "0.3"),
            ("VALIDATION_MIN_TRADES", "5"),
            ("VALIDATION_MIN_RETURN", "0.02"),
            ("STOP_LOSS_PCT", "0.05"),
        ]))
        .unwrap();
        assert_eq!(parsed.objective, OptimizationObjective::Composite);
        assert_eq!(parsed.thresholds.max_drawdown_allowed, 0.3);
        assert_eq!(parsed.thresholds.min_trade_count, 5);
        assert_eq!(parsed.thresholds.min_total_return, Some(0.02));
        assert_eq!(parsed.run_config().stop_loss_pct, Some(0.05));
        assert!(EngineSettings::from_settings_map(&settings(&[("VALIDATION_MIN_TRADES", "2.5")]))
            .is_err());
    }

    #[test]
    fn run_config_validation_rejects_bad_inputs() {
        assert!(RunConfig::new(0.0, 0.001).validate().unwrap_err().is_configuration());
        assert!(RunConfig::new(1_000.0, 1.0).validate().is_err());
        assert!(RunConfig::new(1_000.0, 0.0).with_stop_loss(1.5).validate().is_err());
        assert!(RunConfig::new(1_000.0, 0.0).validate().is_ok());
    }

    #[test]
    fn strategy_parameters_override_run_levels() {
        let params: ParameterSet = [
            ("stop_loss_pct".to_string(), 0.02),
            ("take_profit_pct".to_string(), 0.0),
            ("rsi_window".to_string(), 14.0),
        ]
        .into();
        let config = RunConfig::default()
            .with_take_profit(0.1)
            .with_parameters(&params);
        assert_eq!(config.stop_loss_pct, Some(0.02));
        assert_eq!(config.take_profit_pct, None);
        assert_eq!(config.strategy_params.get("rsi_window"), Some(&14.0));
    }

    #[test]
    fn end_dates_cover_the_whole_day() {
        let start = parse_date_arg("2024-03-01").unwrap();
        let end = parse_end_date_arg("2024-03-01").unwrap();
        assert!(end > start);
        assert!(parse_date_arg("03/01/2024").is_err());
    }
}
