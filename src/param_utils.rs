use crate::error::{EngineError, EngineResult};
use crate::models::ParameterSet;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Candidate values per parameter name.
pub type ParameterGrid = BTreeMap<String, Vec<f64>>;

const RANGE_EPSILON: f64 = 1e-9;
const MAX_RANGE_VALUES: usize = 10_000;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &ParameterSet, key: &str, default: f64) -> f64 {
    finite_param(params, key).unwrap_or(default)
}

/// Extract a parameter as usize, rounded and clamped to a range with finite checks
pub fn get_param_usize_rounded_clamped(
    params: &ParameterSet,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> usize {
    let raw = params.get(key).copied().unwrap_or(default as f64);
    if !raw.is_finite() {
        return default;
    }
    raw.round().clamp(min as f64, max as f64) as usize
}

/// Get a finite parameter value, returns None if not found or not finite
pub fn finite_param(params: &ParameterSet, key: &str) -> Option<f64> {
    params.get(key).copied().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    /// Inclusive expansion `min, min+step, ..., max`.
    pub fn expand(&self) -> Result<Vec<f64>> {
        if !self.min.is_finite() || !self.max.is_finite() || !self.step.is_finite() {
            return Err(anyhow!("Range bounds must be finite"));
        }
        if self.max < self.min {
            return Err(anyhow!(
                "Range max {} is below min {}",
                self.max,
                self.min
            ));
        }
        if self.step <= 0.0 {
            return Err(anyhow!("Range step must be > 0 (value: {})", self.step));
        }

        let count = ((self.max - self.min) / self.step + RANGE_EPSILON).floor() as usize + 1;
        if count > MAX_RANGE_VALUES {
            return Err(anyhow!(
                "Range {}..={} step {} expands to {} values (limit {})",
                self.min,
                self.max,
                self.step,
                count,
                MAX_RANGE_VALUES
            ));
        }
        Ok((0..count)
            .map(|index| {
                let value = self.min + index as f64 * self.step;
                // Strip accumulated float noise so signatures stay stable.
                (value * 1e9).round() / 1e9
            })
            .collect())
    }
}

/// Reject empty grids and grids holding non-finite values.
pub fn validate_grid(grid: &ParameterGrid) -> EngineResult<()> {
    if grid.is_empty() {
        return Err(EngineError::configuration("parameter grid is empty"));
    }
    for (name, values) in grid {
        if values.is_empty() {
            return Err(EngineError::configuration(format!(
                "parameter `{}` has no candidate values",
                name
            )));
        }
        if let Some(bad) = values.iter().find(|value| !value.is_finite()) {
            return Err(EngineError::configuration(format!(
                "parameter `{}` has non-finite candidate {}",
                name, bad
            )));
        }
    }
    Ok(())
}

/// Number of points in the cartesian product of the grid.
pub fn grid_size(grid: &ParameterGrid) -> usize {
    if grid.is_empty() {
        return 0;
    }
    grid.values()
        .map(|values| values.len())
        .fold(1usize, |acc, len| acc.saturating_mul(len))
}

/// Parse a grid where each key maps to an array of numbers or a
/// `{min, max, step}` object.
pub fn parse_parameter_grid_json(json: &str) -> Result<ParameterGrid> {
    let raw: BTreeMap<String, Value> =
        serde_json::from_str(json).context("Parameter grid must be a JSON object")?;

    let mut grid = ParameterGrid::new();
    for (name, value) in raw {
        let values = match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_f64()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| anyhow!("Grid value for `{}` is not a number: {}", name, item))
                })
                .collect::<Result<Vec<f64>>>()?,
            Value::Number(number) => {
                vec![number
                    .as_f64()
                    .ok_or_else(|| anyhow!("Grid value for `{}` is not a number", name))?]
            }
            Value::Object(_) => {
                let range: ParameterRange = serde_json::from_value(value)
                    .with_context(|| format!("Grid range for `{}` needs min, max and step", name))?;
                range
                    .expand()
                    .with_context(|| format!("Invalid range for `{}`", name))?
            }
            other => {
                return Err(anyhow!(
                    "Grid entry `{}` must be an array or a range object (value: {})",
                    name,
                    other
                ))
            }
        };
        if values.is_empty() {
            return Err(anyhow!("Grid entry `{}` has no values", name));
        }
        grid.insert(name, values);
    }

    if grid.is_empty() {
        return Err(anyhow!("Parameter grid has no entries"));
    }
    Ok(grid)
}

pub fn load_parameter_grid<P: AsRef<Path>>(path: P) -> Result<ParameterGrid> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter grid {}", path.display()))?;
    parse_parameter_grid_json(&raw)
        .with_context(|| format!("Failed to parse parameter grid {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_expansion_is_inclusive() {
        let range = ParameterRange {
            min: 1.0,
            max: 2.0,
            step: 0.5,
        };
        assert_eq!(range.expand().unwrap(), vec![1.0, 1.5, 2.0]);

        let tenths = ParameterRange {
            min: 0.1,
            max: 0.3,
            step: 0.1,
        };
        assert_eq!(tenths.expand().unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn range_rejects_bad_bounds() {
        let backwards = ParameterRange {
            min: 5.0,
            max: 1.0,
            step: 1.0,
        };
        assert!(backwards.expand().is_err());
        let zero_step = ParameterRange {
            min: 1.0,
            max: 5.0,
            step: 0.0,
        };
        assert!(zero_step.expand().is_err());
    }

    #[test]
    fn grid_json_mixes_arrays_and_ranges() {
        let grid = parse_parameter_grid_json(
            r#"{"rsi_window": [7, 14], "rsi_buy": {"min": 20, "max": 30, "step": 5}, "fixed": 3}"#,
        )
        .unwrap();
        assert_eq!(grid["rsi_window"], vec![7.0, 14.0]);
        assert_eq!(grid["rsi_buy"], vec![20.0, 25.0, 30.0]);
        assert_eq!(grid["fixed"], vec![3.0]);
        assert_eq!(grid_size(&grid), 6);
        assert!(parse_parameter_grid_json(r#"{"a": "x"}"#).is_err());
        assert!(parse_parameter_grid_json("{}").is_err());
    }

    #[test]
    fn empty_grid_is_configuration_error() {
        let err = validate_grid(&ParameterGrid::new()).unwrap_err();
        assert!(err.is_configuration());

        let mut grid = ParameterGrid::new();
        grid.insert("a".to_string(), Vec::new());
        assert!(validate_grid(&grid).unwrap_err().is_configuration());
    }

    #[test]
    fn param_helpers_fall_back_on_missing_or_invalid() {
        let mut params = ParameterSet::new();
        params.insert("window".to_string(), 13.6);
        params.insert("bad".to_string(), f64::NAN);
        assert_eq!(get_param_usize_rounded_clamped(&params, "window", 5, 2, 20), 14);
        assert_eq!(get_param_usize_rounded_clamped(&params, "missing", 5, 2, 20), 5);
        assert_eq!(get_param_usize_rounded_clamped(&params, "bad", 5, 2, 20), 5);
        assert_eq!(get_param_f64(&params, "bad", 2.0), 2.0);
        assert_eq!(get_param_usize_rounded_clamped(&params, "window", 5, 2, 10), 10);
    }
}
