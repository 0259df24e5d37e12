use std::sync::{Arc, Mutex};

/// Live view of a running sweep, shareable with whoever reports on it.
#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    total_candidates: usize,
    completed_candidates: usize,
    skipped_candidates: usize,
    best_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub total_candidates: usize,
    pub completed_candidates: usize,
    pub skipped_candidates: usize,
    pub best_score: Option<f64>,
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_candidates: usize,
        completed_candidates: usize,
        skipped_candidates: usize,
        best_score: Option<f64>,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_candidates = total_candidates;
            data.completed_candidates = completed_candidates;
            data.skipped_candidates = skipped_candidates;
            data.best_score = best_score;
        }
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                total_candidates: data.total_candidates,
                completed_candidates: data.completed_candidates,
                skipped_candidates: data.skipped_candidates,
                best_score: data.best_score,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_candidates: 0,
                completed_candidates: 0,
                skipped_candidates: 0,
                best_score: None,
            }
        }
    }
}
