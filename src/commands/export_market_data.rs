use crate::data_context::MarketData;
use anyhow::Result;
use log::info;
use std::path::Path;

/// Convert a bar file into a bincode snapshot.
pub fn run(data_file: &Path, ticker: &str, output_path: &Path) -> Result<()> {
    info!(
        "Generating market data snapshot at {}",
        output_path.display()
    );

    let market_data = MarketData::load_from_file(data_file, ticker)?;
    market_data.save_snapshot(output_path)?;
    info!(
        "Market data snapshot with {} bars successfully written to {}",
        market_data.bars().len(),
        output_path.display()
    );

    Ok(())
}
