use crate::commands::{load_market_data, MarketDataArgs};
use crate::context::AppContext;
use crate::error::EngineError;
use crate::models::{BestStrategyParams, StrategyValidation};
use crate::retry::retry_db_operation;
use crate::strategy::create_signal_generator;
use crate::validator::StrategyValidator;
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Which stored winners a batch run validates and where their bars live.
#[derive(Debug, Clone)]
pub struct BatchArgs<'a> {
    /// Directory holding one `<TICKER>.json` or `<TICKER>.bin` file per ticker.
    pub data_dir: &'a Path,
    pub strategy: Option<&'a str>,
    pub market: Option<&'a str>,
    pub start: Option<&'a str>,
    pub end: Option<&'a str>,
}

/// Re-run the stored winner on an out-of-sample window and record the verdict.
pub async fn run(
    app: &AppContext,
    strategy_name: &str,
    data: &MarketDataArgs<'_>,
) -> Result<StrategyValidation> {
    let db = app.database();
    let ticker = data.ticker.trim().to_uppercase();
    let best = db
        .get_best_strategy_params(&ticker, strategy_name)
        .await?
        .ok_or_else(|| {
            anyhow!(
                "No optimized {} parameters stored for {}; run optimize first",
                strategy_name,
                ticker
            )
        })?;
    info!(
        "Validating {} {} trained on {} with score {:.4}",
        best.ticker, best.strategy_name, best.train_window, best.score
    );

    validate_stored(app, &best, data).await
}

/// Validate every stored winner whose ticker is registered in the tickers table.
///
/// Tickers missing from the table or from `data_dir` are skipped with a warning,
/// as are candidates whose validation bars fail data-quality checks.
pub async fn run_all(app: &AppContext, args: &BatchArgs<'_>) -> Result<Vec<StrategyValidation>> {
    let db = app.database();
    let registered: HashSet<String> = db
        .list_tickers()
        .await?
        .into_iter()
        .filter(|ticker| {
            args.market
                .map_or(true, |market| ticker.market.eq_ignore_ascii_case(market))
        })
        .map(|ticker| ticker.ticker)
        .collect();
    if registered.is_empty() {
        return Err(anyhow!(
            "No registered tickers{}; run import-tickers first",
            args.market
                .map(|market| format!(" in market {}", market))
                .unwrap_or_default()
        ));
    }

    let mut validations = Vec::new();
    for best in db.list_best_strategy_params().await? {
        if args.strategy.map_or(false, |name| name != best.strategy_name) {
            continue;
        }
        if !registered.contains(&best.ticker) {
            warn!(
                "Skipping {} {}: ticker is not registered",
                best.ticker, best.strategy_name
            );
            continue;
        }
        let Some(data_file) = find_data_file(args.data_dir, &best.ticker) else {
            warn!(
                "Skipping {} {}: no bars file in {}",
                best.ticker,
                best.strategy_name,
                args.data_dir.display()
            );
            continue;
        };
        let data = MarketDataArgs {
            ticker: &best.ticker,
            data_file: &data_file,
            start: args.start,
            end: args.end,
        };
        match validate_stored(app, &best, &data).await {
            Ok(validation) => validations.push(validation),
            Err(err)
                if err
                    .downcast_ref::<EngineError>()
                    .map_or(false, EngineError::is_data_quality) =>
            {
                warn!("Skipping {} {}: {:#}", best.ticker, best.strategy_name, err);
            }
            Err(err) => return Err(err),
        }
    }
    info!(
        "Validated {} stored strategies ({} passed)",
        validations.len(),
        validations.iter().filter(|v| v.is_valid).count()
    );
    Ok(validations)
}

fn find_data_file(data_dir: &Path, ticker: &str) -> Option<PathBuf> {
    ["json", "bin"]
        .iter()
        .map(|ext| data_dir.join(format!("{}.{}", ticker, ext)))
        .find(|path| path.is_file())
}

async fn validate_stored(
    app: &AppContext,
    best: &BestStrategyParams,
    data: &MarketDataArgs<'_>,
) -> Result<StrategyValidation> {
    let settings = app.engine_settings();
    let market_data = load_market_data(data)?;
    let validator = StrategyValidator::new(
        create_signal_generator(&best.strategy_name)?,
        settings.run_config(),
        settings.thresholds.clone(),
    )
    .with_bars_per_year(settings.bars_per_year);
    let validation = validator.validate(market_data.bars(), best)?;

    retry_db_operation!(
        format!(
            "storing validation for {} {}",
            best.ticker, best.strategy_name
        ),
        app.database().upsert_strategy_validation(&validation)
    )
    .map_err(EngineError::storage)?;
    Ok(validation)
}
