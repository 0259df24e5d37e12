use anyhow::{anyhow, Result as AnyResult};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::convert::TryFrom;
use std::fmt;

/// Strategy parameters keyed by name. Sorted keys keep signatures and
/// tie-breaks reproducible.
pub type ParameterSet = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn has_finite_prices(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
    }

    pub fn has_positive_prices(&self) -> bool {
        self.open > 0.0 && self.high > 0.0 && self.low > 0.0 && self.close > 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "i8", into = "i8")]
pub enum SignalAction {
    Sell,
    Hold,
    Buy,
}

impl SignalAction {
    pub fn value(self) -> i8 {
        match self {
            SignalAction::Sell => -1,
            SignalAction::Hold => 0,
            SignalAction::Buy => 1,
        }
    }
}

impl TryFrom<i8> for SignalAction {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(SignalAction::Sell),
            0 => Ok(SignalAction::Hold),
            1 => Ok(SignalAction::Buy),
            other => Err(format!("signal value must be -1, 0 or 1 (got {})", other)),
        }
    }
}

impl From<SignalAction> for i8 {
    fn from(action: SignalAction) -> Self {
        action.value()
    }
}


#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub action: SignalAction,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, action: SignalAction) -> Self {
        Self { timestamp, action }
    }

    pub fn hold(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, SignalAction::Hold)
    }
}

/// Open long exposure inside a single simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub entry_fee: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    EndOfPeriod,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Signal => "signal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::EndOfPeriod => "end_of_period",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub entry_timestamp: DateTime<Utc>,
    pub exit_timestamp: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub fee_paid: f64,
    pub pnl: f64,
    pub exit_reason: ExitReason,
}


#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Mark-to-market equity, one point per bar, anchored at the initial capital.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityCurve {
    pub initial_equity: f64,
    pub points: Vec<EquityPoint>,
}

impl EquityCurve {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            initial_equity,
            points: Vec::new(),
        }
    }

    pub fn with_capacity(initial_equity: f64, capacity: usize) -> Self {
        Self {
            initial_equity,
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, equity: f64) {
        self.points.push(EquityPoint { timestamp, equity });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn final_equity(&self) -> f64 {
        self.points
            .last()
            .map(|point| point.equity)
            .unwrap_or(self.initial_equity)
    }

    /// Equity values including the initial capital as the first element.
    pub fn values(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.points.len() + 1);
        values.push(self.initial_equity);
        values.extend(self.points.iter().map(|point| point.equity));
        values
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub win_rate: f64,
    pub trade_count: usize,
    pub avg_trade_pnl: f64,
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AnyResult<Self> {
        if end < start {
            return Err(anyhow!(
                "Window end {} is before start {}",
                end.format("%Y-%m-%d"),
                start.format("%Y-%m-%d")
            ));
        }
        Ok(Self { start, end })
    }

    pub fn from_bars(bars: &[Bar]) -> Option<Self> {
        let first = bars.first()?;
        let last = bars.last()?;
        Some(Self {
            start: first.timestamp,
            end: last.timestamp,
        })
    }

    pub fn overlaps(&self, other: &DateWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BestStrategyParams {
    pub ticker: String,
    pub strategy_name: String,
    pub params: ParameterSet,
    pub score: f64,
    pub train_window: DateWindow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationStatus {
    Pending,
    Valid,
    Invalid,
}

impl ValidationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ValidationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Valid => "valid",
            ValidationStatus::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyValidation {
    pub ticker: String,
    pub strategy_name: String,
    pub params: ParameterSet,
    pub is_valid: bool,
    pub reason: String,
    pub validation_window: DateWindow,
    pub metrics: PerformanceMetrics,
}

impl StrategyValidation {
    pub fn status(&self) -> ValidationStatus {
        if self.is_valid {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Invalid
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickerInfo {
    pub ticker: String,
    pub company: String,
    pub market: String,
}

fn normalize_parameter_map(raw: HashMap<String, Value>) -> ParameterSet {
    let mut cleaned = ParameterSet::new();

    for (key, value) in raw.into_iter() {
        if let Some(num) = value.as_f64() {
            if num.is_finite() {
                cleaned.insert(key, num);
            } else {
                warn!(
                    "Skipping parameter `{}` due to non-finite numeric value {}",
                    key, value
                );
            }
            continue;
        }

        if let Some(text) = value.as_str() {
            match text.trim().parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => {
                    cleaned.insert(key, parsed);
                }
                _ => {
                    warn!(
                        "Skipping parameter `{}` due to non-numeric string value {:?}",
                        key, text
                    );
                }
            }
            continue;
        }

        if let Some(boolean) = value.as_bool() {
            cleaned.insert(key, if boolean { 1.0 } else { 0.0 });
            continue;
        }

        warn!(
            "Skipping parameter `{}` due to unsupported value {}",
            key, value
        );
    }

    cleaned
}

pub fn parse_parameter_set_from_json(json: &str) -> AnyResult<ParameterSet> {
    let raw: HashMap<String, Value> =
        serde_json::from_str(json).map_err(|error| anyhow!("Invalid parameter JSON: {}", error))?;
    Ok(normalize_parameter_map(raw))
}

pub fn parameter_set_to_json(params: &ParameterSet) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string())
}

/// Human-readable summary of a parameter set for log lines. Values are
/// rounded, so two distinct sets may share a signature.
pub fn parameter_signature(parameters: &ParameterSet) -> String {
    parameters
        .iter()
        .map(|(key, value)| format!("{}={}", key, format_parameter_value(*value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Exact identity of a parameter set: names with the bit patterns of their
/// values, with `-0.0` folded into `0.0`.
pub fn parameter_identity(parameters: &ParameterSet) -> Vec<(String, u64)> {
    parameters
        .iter()
        .map(|(key, value)| {
            let value = if *value == 0.0 { 0.0 } else { *value };
            (key.clone(), value.to_bits())
        })
        .collect()
}

/// Lexicographic order over (name, value) pairs.
pub fn compare_parameter_sets(a: &ParameterSet, b: &ParameterSet) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => {
                let ordering = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

pub fn format_parameter_value(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
