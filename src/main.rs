use anyhow::Result;
use backtest_engine::{
    commands::{
        backtest, export_market_data, import_tickers, optimize, validate, MarketDataArgs,
    },
    context::AppContext,
    models::parse_parameter_set_from_json,
    strategy::STRATEGY_NAMES,
};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;

const DEFAULT_DATABASE_PATH: &str = "backtest.db";

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "Backtest trading strategies, optimize their parameters and validate them out of sample")]
struct Cli {
    /// SQLite database path or URL
    #[arg(long, global = true, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_PATH)]
    database: String,
    /// JSON file of settings overriding those stored in the database
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct MarketArgs {
    /// Ticker symbol
    #[arg(long)]
    ticker: String,
    /// Strategy name
    #[arg(long)]
    strategy: String,
    /// Bars file (.json array or bincode snapshot)
    #[arg(long = "data-file", value_name = "PATH")]
    data_file: PathBuf,
    /// First day of the window (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,
    /// Last day of the window (YYYY-MM-DD, inclusive)
    #[arg(long)]
    end: Option<String>,
}

impl MarketArgs {
    fn market_data(&self) -> MarketDataArgs<'_> {
        MarketDataArgs {
            ticker: &self.ticker,
            data_file: &self.data_file,
            start: self.start.as_deref(),
            end: self.end.as_deref(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Search a strategy's parameters on a training window and store the winner
    Optimize {
        #[command(flatten)]
        market: MarketArgs,
        /// JSON parameter grid (defaults to the strategy's built-in grid)
        #[arg(long, value_name = "PATH")]
        grid: Option<PathBuf>,
        /// Evaluate this many random grid points instead of the full grid
        #[arg(long)]
        random_samples: Option<usize>,
        /// Seed for random search
        #[arg(long)]
        seed: Option<u64>,
        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// Check stored parameters on a window disjoint from training and record the verdict
    Validate {
        #[command(flatten)]
        market: MarketArgs,
    },
    /// Validate every stored winner for the registered tickers
    ValidateAll {
        /// Directory of bars files named <TICKER>.json or <TICKER>.bin
        #[arg(long = "data-dir", value_name = "DIR")]
        data_dir: PathBuf,
        /// Only validate this strategy
        #[arg(long)]
        strategy: Option<String>,
        /// Only validate tickers registered under this market
        #[arg(long)]
        market: Option<String>,
        /// First day of the window (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// Last day of the window (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end: Option<String>,
    },
    /// Simulate one parameter set and print its metrics
    Backtest {
        #[command(flatten)]
        market: MarketArgs,
        /// Parameters as a JSON object (defaults to stored best params)
        #[arg(long)]
        params: Option<String>,
    },
    /// Load a JSON list of tickers into the reference table
    ImportTickers {
        /// JSON file with [{"ticker", "company", "market"}, ...]
        file: PathBuf,
    },
    /// Convert a bars file into a bincode snapshot
    ExportMarketData {
        /// Ticker symbol stored in the snapshot
        #[arg(long)]
        ticker: String,
        /// Source bars file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli {
        database,
        config,
        command,
    } = Cli::parse();

    if let Commands::ExportMarketData {
        ticker,
        data_file,
        output,
    } = &command
    {
        return export_market_data::run(data_file, ticker, output);
    }

    let app = AppContext::initialize(&database, config.as_deref()).await?;
    info!(
        "Using database {} (strategies: {})",
        database,
        STRATEGY_NAMES.join(", ")
    );

    match command {
        Commands::Optimize {
            market,
            grid,
            random_samples,
            seed,
            quiet,
        } => {
            let options = optimize::OptimizeOptions {
                grid_file: grid,
                random_samples,
                seed,
                show_progress: !quiet,
            };
            let report =
                optimize::run(&app, &market.strategy, &market.market_data(), &options).await?;
            println!("{}", serde_json::to_string_pretty(&report.best)?);
        }
        Commands::Validate { market } => {
            let validation = validate::run(&app, &market.strategy, &market.market_data()).await?;
            println!("{}", serde_json::to_string_pretty(&validation)?);
        }
        Commands::ValidateAll {
            data_dir,
            strategy,
            market,
            start,
            end,
        } => {
            let args = validate::BatchArgs {
                data_dir: &data_dir,
                strategy: strategy.as_deref(),
                market: market.as_deref(),
                start: start.as_deref(),
                end: end.as_deref(),
            };
            let validations = validate::run_all(&app, &args).await?;
            println!("{}", serde_json::to_string_pretty(&validations)?);
        }
        Commands::Backtest { market, params } => {
            let params = params
                .as_deref()
                .map(parse_parameter_set_from_json)
                .transpose()?;
            let (_, metrics) =
                backtest::run(&app, &market.strategy, &market.market_data(), params).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::ImportTickers { file } => {
            import_tickers::run(&app, &file).await?;
        }
        Commands::ExportMarketData { .. } => {}
    }

    Ok(())
}
