use crate::error::{EngineError, EngineResult};
use crate::models::{parameter_identity, ParameterSet};
use crate::param_utils::{grid_size, validate_grid, ParameterGrid};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

pub const MAX_GRID_CANDIDATES: usize = 1_000_000;
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Produces the candidate parameter sets for one optimization sweep.
pub trait ParameterSearch: Send + Sync {
    fn candidates(&self) -> EngineResult<Vec<ParameterSet>>;

    fn describe(&self) -> String;
}

/// Full cartesian product over the grid, last key varying fastest.
#[derive(Debug, Clone)]
pub struct GridSearch {
    pub grid: ParameterGrid,
}

impl GridSearch {
    pub fn new(grid: ParameterGrid) -> Self {
        Self { grid }
    }
}

impl ParameterSearch for GridSearch {
    fn candidates(&self) -> EngineResult<Vec<ParameterSet>> {
        validate_grid(&self.grid)?;
        let total = grid_size(&self.grid);
        if total > MAX_GRID_CANDIDATES {
            return Err(EngineError::configuration(format!(
                "parameter grid expands to {} candidates (limit {}); use random search",
                total, MAX_GRID_CANDIDATES
            )));
        }
        Ok((0..total)
            .map(|index| grid_point(&self.grid, index))
            .collect())
    }

    fn describe(&self) -> String {
        format!("grid search over {} candidates", grid_size(&self.grid))
    }
}

/// `samples` distinct grid points drawn with a seeded generator.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    pub grid: ParameterGrid,
    pub samples: usize,
    pub seed: u64,
}

impl RandomSearch {
    pub fn new(grid: ParameterGrid, samples: usize) -> Self {
        Self {
            grid,
            samples,
            seed: DEFAULT_RANDOM_SEED,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl ParameterSearch for RandomSearch {
    fn candidates(&self) -> EngineResult<Vec<ParameterSet>> {
        validate_grid(&self.grid)?;
        if self.samples == 0 {
            return Err(EngineError::configuration(
                "random search needs at least one sample",
            ));
        }
        let total = grid_size(&self.grid);
        let amount = self.samples.min(total);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut indices = rand::seq::index::sample(&mut rng, total, amount).into_vec();
        indices.sort_unstable();

        Ok(indices
            .into_iter()
            .map(|index| grid_point(&self.grid, index))
            .collect())
    }

    fn describe(&self) -> String {
        format!(
            "random search of {} samples (seed {}) from {} candidates",
            self.samples,
            self.seed,
            grid_size(&self.grid)
        )
    }
}

/// Caller-supplied candidates, evaluated as given.
#[derive(Debug, Clone, Default)]
pub struct ExplicitCandidates(pub Vec<ParameterSet>);

impl ParameterSearch for ExplicitCandidates {
    fn candidates(&self) -> EngineResult<Vec<ParameterSet>> {
        if self.0.is_empty() {
            return Err(EngineError::configuration("no candidate parameter sets given"));
        }
        if let Some((name, value)) = self
            .0
            .iter()
            .flat_map(|params| params.iter())
            .find(|(_, value)| !value.is_finite())
        {
            return Err(EngineError::configuration(format!(
                "parameter `{}` has non-finite candidate {}",
                name, value
            )));
        }
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("{} explicit candidates", self.0.len())
    }
}

/// Decode a mixed-radix index into one grid point.
pub fn grid_point(grid: &ParameterGrid, index: usize) -> ParameterSet {
    let mut remainder = index;
    let mut point = ParameterSet::new();
    for (name, values) in grid.iter().rev() {
        let len = values.len().max(1);
        point.insert(name.clone(), values[remainder % len]);
        remainder /= len;
    }
    point
}

/// Drop exact repeats, keeping the first occurrence.
pub fn dedup_candidates(candidates: Vec<ParameterSet>) -> Vec<ParameterSet> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|params| seen.insert(parameter_identity(params)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> ParameterGrid {
        let mut grid = ParameterGrid::new();
        grid.insert("a".to_string(), vec![1.0, 2.0]);
        grid.insert("b".to_string(), vec![10.0, 20.0, 30.0]);
        grid
    }

    #[test]
    fn grid_search_enumerates_product_in_order() {
        let candidates = GridSearch::new(grid()).candidates().unwrap();
        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0]["a"], 1.0);
        assert_eq!(candidates[0]["b"], 10.0);
        assert_eq!(candidates[1]["b"], 20.0);
        assert_eq!(candidates[5]["a"], 2.0);
        assert_eq!(candidates[5]["b"], 30.0);
    }

    #[test]
    fn empty_grid_is_configuration_error() {
        let err = GridSearch::new(ParameterGrid::new())
            .candidates()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(ExplicitCandidates::default()
            .candidates()
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn random_search_is_seeded_and_distinct() {
        let first = RandomSearch::new(grid(), 4).with_seed(7).candidates().unwrap();
        let second = RandomSearch::new(grid(), 4).with_seed(7).candidates().unwrap();
        assert_eq!(first, second);
        assert_eq!(dedup_candidates(first.clone()).len(), 4);

        let all = RandomSearch::new(grid(), 100).candidates().unwrap();
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a: ParameterSet = [("x".to_string(), 1.0)].into();
        let b: ParameterSet = [("x".to_string(), 2.0)].into();
        let deduped = dedup_candidates(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(deduped, vec![a, b]);
    }

    #[test]
    fn dedup_keeps_values_closer_than_display_precision() {
        let mut grid = ParameterGrid::new();
        grid.insert("threshold".to_string(), vec![0.00011, 0.00012, 0.00013]);
        let candidates = GridSearch::new(grid).candidates().unwrap();
        let deduped = dedup_candidates(candidates.clone());
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped, candidates);
    }
}
