use crate::engine::validate_bars;
use crate::models::{Bar, DateWindow};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    ticker: String,
    bars: Vec<Bar>,
}

/// One ticker's ordered bar series.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    ticker: String,
    bars: Vec<Bar>,
}

impl MarketData {
    pub fn new<S: Into<String>>(ticker: S, bars: Vec<Bar>) -> Result<Self> {
        let ticker = ticker.into().trim().to_uppercase();
        if bars.is_empty() {
            return Err(anyhow!("Market data for {} contains no bars", ticker));
        }
        validate_bars(&bars)?;
        Ok(Self { ticker, bars })
    }

    /// `.json` files hold a plain array of bars; anything else is read as a
    /// bincode snapshot.
    pub fn load_from_file<P: AsRef<Path>>(path: P, ticker: &str) -> Result<Self> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let file = File::open(path)
            .with_context(|| format!("Failed to open market data file at {}", path.display()))?;
        let reader = BufReader::new(file);

        let market_data = if is_json {
            let bars: Vec<Bar> = serde_json::from_reader(reader)
                .with_context(|| format!("Failed to parse bars from {}", path.display()))?;
            Self::new(ticker, bars)?
        } else {
            let snapshot: MarketDataSnapshot =
                bincode::deserialize_from(reader).context("Snapshot decode failed")?;
            if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
                return Err(anyhow!(
                    "Market data snapshot version mismatch (found {}, expected {})",
                    snapshot.version,
                    MARKET_DATA_SNAPSHOT_VERSION
                ));
            }
            if !ticker.trim().is_empty() && !snapshot.ticker.eq_ignore_ascii_case(ticker.trim()) {
                return Err(anyhow!(
                    "Snapshot {} holds {} bars, not {}",
                    path.display(),
                    snapshot.ticker,
                    ticker
                ));
            }
            Self::new(snapshot.ticker, snapshot.bars)?
        };

        info!(
            "Loaded {} bars for {} from {}",
            market_data.bars.len(),
            market_data.ticker,
            path.display()
        );
        Ok(market_data)
    }

    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            ticker: self.ticker.clone(),
            bars: self.bars.clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    /// Keep only the bars inside `window` (inclusive on both ends).
    pub fn restrict(&self, window: &DateWindow) -> Result<Self> {
        let bars: Vec<Bar> = self
            .bars
            .iter()
            .filter(|bar| window.contains(bar.timestamp))
            .cloned()
            .collect();
        if bars.is_empty() {
            return Err(anyhow!(
                "No {} bars between {}",
                self.ticker,
                window
            ));
        }
        info!(
            "Restricted {} market data to {} ({} bars -> {})",
            self.ticker,
            window,
            self.bars.len(),
            bars.len()
        );
        Ok(Self {
            ticker: self.ticker.clone(),
            bars,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn window(&self) -> Option<DateWindow> {
        DateWindow::from_bars(&self.bars)
    }
}
