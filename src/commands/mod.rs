pub mod backtest;
pub mod export_market_data;
pub mod import_tickers;
pub mod optimize;
pub mod validate;

use crate::config::{parse_date_arg, parse_end_date_arg};
use crate::data_context::MarketData;
use crate::models::DateWindow;
use anyhow::{anyhow, Result};
use std::path::Path;

/// Bar source and date window shared by the simulation commands.
#[derive(Debug, Clone)]
pub struct MarketDataArgs<'a> {
    pub ticker: &'a str,
    pub data_file: &'a Path,
    pub start: Option<&'a str>,
    pub end: Option<&'a str>,
}

/// Load the ticker's bars and cut them to `--start`/`--end` when given.
pub fn load_market_data(args: &MarketDataArgs<'_>) -> Result<MarketData> {
    let market_data = MarketData::load_from_file(args.data_file, args.ticker)?;
    if args.start.is_none() && args.end.is_none() {
        return Ok(market_data);
    }

    let full = market_data
        .window()
        .ok_or_else(|| anyhow!("Market data for {} is empty", args.ticker))?;
    let start = match args.start {
        Some(raw) => parse_date_arg(raw)?,
        None => full.start,
    };
    let end = match args.end {
        Some(raw) => parse_end_date_arg(raw)?,
        None => full.end,
    };
    market_data.restrict(&DateWindow::new(start, end)?)
}
