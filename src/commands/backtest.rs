use crate::commands::{load_market_data, MarketDataArgs};
use crate::context::AppContext;
use crate::engine::SimulationRun;
use crate::models::{parameter_signature, ParameterSet, PerformanceMetrics};
use crate::optimizer::backtest_parameters;
use crate::strategy::create_signal_generator;
use anyhow::Result;
use log::info;

/// Simulate one parameter set. Without explicit parameters the stored
/// optimizer winner is used, falling back to the generator's defaults.
pub async fn run(
    app: &AppContext,
    strategy_name: &str,
    data: &MarketDataArgs<'_>,
    params: Option<ParameterSet>,
) -> Result<(SimulationRun, PerformanceMetrics)> {
    let settings = app.engine_settings();
    let generator = create_signal_generator(strategy_name)?;
    let params = match params {
        Some(params) => params,
        None => app
            .database()
            .get_best_strategy_params(&data.ticker.trim().to_uppercase(), strategy_name)
            .await?
            .map(|best| best.params)
            .unwrap_or_default(),
    };

    let market_data = load_market_data(data)?;
    let (run, metrics) = backtest_parameters(
        market_data.bars(),
        generator.as_ref(),
        &settings.run_config(),
        &params,
        settings.bars_per_year,
    )?;

    info!(
        "Backtest {} {} [{}]: return {:.2}%, annualized {:.2}%, drawdown {:.2}%, sharpe {:.4}, win rate {:.1}%, {} trades, avg pnl {:.2}",
        market_data.ticker(),
        strategy_name,
        parameter_signature(&params),
        metrics.total_return * 100.0,
        metrics.annualized_return * 100.0,
        metrics.max_drawdown * 100.0,
        metrics.sharpe_ratio,
        metrics.win_rate * 100.0,
        metrics.trade_count,
        metrics.avg_trade_pnl
    );
    Ok((run, metrics))
}
