use crate::config::RunConfig;
use crate::engine::{Engine, SimulationRun};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    compare_parameter_sets, parameter_signature, Bar, BestStrategyParams, DateWindow,
    ParameterSet, PerformanceMetrics,
};
use crate::optimizer_status::OptimizerStatus;
use crate::performance::PerformanceCalculator;
use crate::scoring::{rank_value, ScoringFn, SharpeScore};
use crate::search::{dedup_candidates, ParameterSearch};
use crate::strategy::SignalGenerator;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// One scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    pub params: ParameterSet,
    pub metrics: PerformanceMetrics,
    pub score: f64,
}

impl CandidateResult {
    /// Higher score, then higher total return, then the smaller parameter tuple.
    pub fn rank_against(&self, other: &CandidateResult) -> Ordering {
        rank_value(self.score)
            .total_cmp(&rank_value(other.score))
            .then_with(|| {
                rank_value(self.metrics.total_return)
                    .total_cmp(&rank_value(other.metrics.total_return))
            })
            .then_with(|| compare_parameter_sets(&other.params, &self.params))
    }

    pub fn beats(&self, other: &CandidateResult) -> bool {
        self.rank_against(other) == Ordering::Greater
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub best: BestStrategyParams,
    pub best_metrics: PerformanceMetrics,
    pub evaluated: usize,
    pub skipped: usize,
    pub interrupted: bool,
}

struct CandidateTask {
    id: usize,
    params: ParameterSet,
}

enum CandidateOutcome {
    Completed(CandidateResult),
    Skipped { params: ParameterSet, reason: String },
    Failed(EngineError),
    Cancelled,
}

/// Run signal generation, the engine and the performance calculator for one
/// parameter set. Shared by the optimizer, the validator and the CLI backtest.
pub fn backtest_parameters(
    bars: &[Bar],
    generator: &dyn SignalGenerator,
    base_config: &RunConfig,
    params: &ParameterSet,
    bars_per_year: f64,
) -> EngineResult<(SimulationRun, PerformanceMetrics)> {
    let signals = generator.generate(bars, params)?;
    let run = Engine::from_parameters(base_config, params).run(bars, &signals)?;
    let metrics = PerformanceCalculator::evaluate(&run.equity_curve, &run.trades, bars_per_year);
    Ok((run, metrics))
}

/// Searches a strategy's parameter space on a training window.
///
/// Candidates are spread over worker threads that each own their simulation
/// state; a single reducer applies the ranking rule, so the winner does not
/// depend on completion order.
pub struct ParameterOptimizer {
    generator: Arc<dyn SignalGenerator>,
    base_config: RunConfig,
    scoring: Arc<dyn ScoringFn>,
    bars_per_year: f64,
    workers: usize,
    show_progress: bool,
    cancel_flag: Arc<AtomicBool>,
    status: OptimizerStatus,
}

impl ParameterOptimizer {
    pub fn new(generator: Arc<dyn SignalGenerator>, base_config: RunConfig) -> Self {
        Self {
            generator,
            base_config,
            scoring: Arc::new(SharpeScore),
            bars_per_year: 252.0,
            workers: num_cpus::get().max(1),
            show_progress: false,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            status: OptimizerStatus::new(),
        }
    }

    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringFn>) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_scoring_fn<S: ScoringFn + 'static>(self, scoring: S) -> Self {
        self.with_scoring(Arc::new(scoring))
    }

    pub fn with_bars_per_year(mut self, bars_per_year: f64) -> Self {
        self.bars_per_year = bars_per_year;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn with_cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = cancel_flag;
        self
    }

    pub fn with_status(mut self, status: OptimizerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel_flag.clone()
    }

    pub fn status(&self) -> OptimizerStatus {
        self.status.clone()
    }

    pub fn optimize(
        &self,
        ticker: &str,
        bars_train: &[Bar],
        search: &dyn ParameterSearch,
    ) -> EngineResult<OptimizationReport> {
        self.base_config.validate()?;
        if !self.bars_per_year.is_finite() || self.bars_per_year <= 0.0 {
            return Err(EngineError::configuration(format!(
                "bars_per_year must be > 0 (value: {})",
                self.bars_per_year
            )));
        }
        let train_window = DateWindow::from_bars(bars_train)
            .ok_or_else(|| EngineError::configuration("training window has no bars"))?;

        self.status.set_phase("Preparing candidates");
        let generated = search.candidates()?;
        let generated_count = generated.len();
        let candidates = dedup_candidates(generated);
        let candidate_count = candidates.len();
        if candidate_count < generated_count {
            info!(
                "Dropped {} repeated candidates out of {}",
                generated_count - candidate_count,
                generated_count
            );
        }
        if candidate_count == 0 {
            return Err(EngineError::configuration("parameter grid is empty"));
        }

        let num_workers = self.workers.min(candidate_count).max(1);
        info!(
            "Optimizing {} on {} ({}): {} via {}, scoring by {}",
            self.generator.name(),
            ticker,
            train_window,
            search.describe(),
            if num_workers == 1 {
                "1 worker".to_string()
            } else {
                format!("{} workers", num_workers)
            },
            self.scoring.label()
        );

        let bars: Arc<[Bar]> = Arc::from(bars_train);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (tx, rx): (Sender<CandidateTask>, Receiver<CandidateTask>) = bounded(candidate_count);
        let (result_tx, result_rx): (Sender<CandidateOutcome>, Receiver<CandidateOutcome>) =
            bounded(candidate_count);

        let mut handles = Vec::with_capacity(num_workers);
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let bars = bars.clone();
            let generator = self.generator.clone();
            let scoring = self.scoring.clone();
            let base_config = self.base_config.clone();
            let bars_per_year = self.bars_per_year;
            let cancel_flag = self.cancel_flag.clone();
            let stop_flag = stop_flag.clone();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    if cancel_flag.load(AtomicOrdering::Relaxed)
                        || stop_flag.load(AtomicOrdering::Relaxed)
                    {
                        if result_tx.send(CandidateOutcome::Cancelled).is_err() {
                            break;
                        }
                        continue;
                    }

                    let start_time = Instant::now();
                    let outcome = match backtest_parameters(
                        &bars,
                        generator.as_ref(),
                        &base_config,
                        &task.params,
                        bars_per_year,
                    ) {
                        Ok((_, metrics)) => CandidateOutcome::Completed(CandidateResult {
                            score: scoring.score(&metrics),
                            params: task.params,
                            metrics,
                        }),
                        Err(error) if error.is_data_quality() => CandidateOutcome::Skipped {
                            params: task.params,
                            reason: error.to_string(),
                        },
                        Err(error) => CandidateOutcome::Failed(error),
                    };
                    debug!(
                        "Worker finished candidate {} in {:.1}ms",
                        task.id,
                        start_time.elapsed().as_secs_f64() * 1000.0
                    );

                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(rx);
        drop(result_tx);

        for (id, params) in candidates.into_iter().enumerate() {
            if tx.send(CandidateTask { id, params }).is_err() {
                break;
            }
        }
        drop(tx);

        let pb = if self.show_progress {
            ProgressBar::new(candidate_count as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        self.status.set_phase("Evaluating candidates");
        self.status.set_progress(candidate_count, 0, 0, None);

        let mut best: Option<CandidateResult> = None;
        let mut received = 0usize;
        let mut evaluated = 0usize;
        let mut skipped = 0usize;
        let mut cancelled = 0usize;
        let mut fatal: Option<EngineError> = None;

        while received < candidate_count {
            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(outcome) => {
                    received += 1;
                    pb.set_position(received as u64);
                    match outcome {
                        CandidateOutcome::Completed(result) => {
                            evaluated += 1;
                            let improved = best
                                .as_ref()
                                .map(|current| result.beats(current))
                                .unwrap_or(true);
                            if improved {
                                info!(
                                    "New best score {:.4} (return {:.2}%, drawdown {:.2}%, trades {}) with [{}]",
                                    result.score,
                                    result.metrics.total_return * 100.0,
                                    result.metrics.max_drawdown * 100.0,
                                    result.metrics.trade_count,
                                    parameter_signature(&result.params)
                                );
                                best = Some(result);
                            }
                        }
                        CandidateOutcome::Skipped { params, reason } => {
                            skipped += 1;
                            warn!(
                                "Skipping candidate [{}]: {}",
                                parameter_signature(&params),
                                reason
                            );
                        }
                        CandidateOutcome::Failed(error) => {
                            if fatal.is_none() {
                                warn!("Aborting optimization: {}", error);
                                stop_flag.store(true, AtomicOrdering::Relaxed);
                                fatal = Some(error);
                            }
                        }
                        CandidateOutcome::Cancelled => cancelled += 1,
                    }
                    self.status.set_progress(
                        candidate_count,
                        evaluated,
                        skipped,
                        best.as_ref().map(|result| result.score),
                    );
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("Optimizer worker panicked");
            }
        }

        if let Some(error) = fatal {
            pb.abandon_with_message("Optimization aborted");
            self.status.set_phase("Failed");
            return Err(error);
        }

        let interrupted = cancelled > 0 || received < candidate_count;
        if interrupted {
            pb.abandon_with_message("Optimization interrupted");
        } else {
            pb.finish_with_message("Optimization completed");
        }

        let Some(best) = best else {
            self.status.set_phase("Failed");
            if interrupted {
                return Err(EngineError::Interrupted);
            }
            return Err(EngineError::data_quality(format!(
                "all {} candidates were skipped",
                skipped
            )));
        };

        info!(
            "Optimization {}: {} evaluated, {} skipped, best score {:.4} with [{}]",
            if interrupted { "interrupted" } else { "finished" },
            evaluated,
            skipped,
            best.score,
            parameter_signature(&best.params)
        );
        self.status.set_phase(if interrupted {
            "Interrupted"
        } else {
            "Completed"
        });

        Ok(OptimizationReport {
            best: BestStrategyParams {
                ticker: ticker.to_string(),
                strategy_name: self.generator.name().to_string(),
                params: best.params,
                score: best.score,
                train_window,
            },
            best_metrics: best.metrics,
            evaluated,
            skipped,
            interrupted,
        })
    }
}
