use crate::commands::{load_market_data, MarketDataArgs};
use crate::context::AppContext;
use crate::error::EngineError;
use crate::optimizer::{OptimizationReport, ParameterOptimizer};
use crate::param_utils::load_parameter_grid;
use crate::retry::retry_db_operation;
use crate::scoring::scoring_for_objective;
use crate::search::{GridSearch, ParameterSearch, RandomSearch};
use crate::strategy::create_signal_generator;
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    pub grid_file: Option<PathBuf>,
    pub random_samples: Option<usize>,
    pub seed: Option<u64>,
    pub show_progress: bool,
}

pub async fn run(
    app: &AppContext,
    strategy_name: &str,
    data: &MarketDataArgs<'_>,
    options: &OptimizeOptions,
) -> Result<OptimizationReport> {
    let settings = app.engine_settings();
    let generator = create_signal_generator(strategy_name)?;
    let market_data = load_market_data(data)?;

    let grid = match &options.grid_file {
        Some(path) => load_parameter_grid(path)?,
        None => generator.default_grid(),
    };
    let search: Box<dyn ParameterSearch> = match options.random_samples {
        Some(samples) => {
            let mut search = RandomSearch::new(grid, samples);
            if let Some(seed) = options.seed {
                search = search.with_seed(seed);
            }
            Box::new(search)
        }
        None => Box::new(GridSearch::new(grid)),
    };
    info!(
        "Objective: maximize {} on {} bars of {}",
        settings.objective.label(),
        market_data.bars().len(),
        market_data.ticker()
    );

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let optimizer = ParameterOptimizer::new(generator, settings.run_config())
        .with_scoring(scoring_for_objective(settings.objective))
        .with_bars_per_year(settings.bars_per_year)
        .with_workers(settings.optimizer_workers)
        .with_progress(options.show_progress)
        .with_cancel_flag(cancel_flag.clone());

    let interrupt_flag = cancel_flag.clone();
    let interrupt_listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight candidates");
            interrupt_flag.store(true, Ordering::Relaxed);
        }
    });

    let ticker = market_data.ticker().to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        optimizer.optimize(&ticker, market_data.bars(), search.as_ref())
    })
    .await;
    interrupt_listener.abort();
    let report = outcome.context("Optimizer task panicked")??;

    if report.interrupted {
        warn!(
            "Optimization of {} {} was interrupted after {} candidates; nothing persisted",
            report.best.ticker, report.best.strategy_name, report.evaluated
        );
        return Ok(report);
    }

    let db = app.database();
    retry_db_operation!(
        format!(
            "storing best params for {} {}",
            report.best.ticker, report.best.strategy_name
        ),
        db.upsert_best_strategy_params(&report.best)
    )
    .map_err(EngineError::storage)?;
    info!(
        "Stored best {} params for {} (score {:.4}, {} evaluated, {} skipped)",
        report.best.strategy_name,
        report.best.ticker,
        report.best.score,
        report.evaluated,
        report.skipped
    );
    Ok(report)
}
