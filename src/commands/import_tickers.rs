use crate::context::AppContext;
use crate::error::EngineError;
use crate::models::TickerInfo;
use crate::retry::retry_db_operation;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

/// Load a JSON array of `{ticker, company, market}` into the reference table.
pub async fn run(app: &AppContext, path: &Path) -> Result<usize> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tickers file {}", path.display()))?;
    let tickers: Vec<TickerInfo> = serde_json::from_str(&raw)
        .with_context(|| format!("Tickers file {} is not a JSON array of tickers", path.display()))?;

    let db = app.database();
    for ticker in &tickers {
        retry_db_operation!(
            format!("storing ticker {}", ticker.ticker),
            db.upsert_ticker(ticker)
        )
        .map_err(EngineError::storage)?;
    }
    info!("Imported {} tickers from {}", tickers.len(), path.display());
    Ok(tickers.len())
}
