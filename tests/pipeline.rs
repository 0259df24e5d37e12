use anyhow::Result;
use backtest_engine::commands::{
    backtest, export_market_data, import_tickers, optimize, validate, MarketDataArgs,
};
use backtest_engine::context::AppContext;
use backtest_engine::error::EngineError;
use backtest_engine::models::{Bar, ParameterSet};
use chrono::{Duration, TimeZone, Utc};
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;

const TICKER: &str = "SINE";
const TOTAL_DAYS: i64 = 240;
const TRAIN_START: &str = "2023-01-02";
const TRAIN_END: &str = "2023-05-31";
const VALIDATION_START: &str = "2023-06-01";
const VALIDATION_END: &str = "2023-08-29";

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Result<Self> {
        ensure_test_env();
        let workspace = Self {
            dir: tempfile::tempdir()?,
        };
        fs::write(
            workspace.bars_path(),
            serde_json::to_string(&synthetic_bars())?,
        )?;
        fs::write(
            workspace.grid_path(),
            r#"{"period": [7, 14], "oversold_level": {"min": 30, "max": 40, "step": 10}, "overbought_level": [60, 70]}"#,
        )?;
        fs::write(
            workspace.config_path(),
            r#"{"OPTIMIZER_WORKERS": 2, "TRANSACTION_FEE_RATE": 0.001, "VALIDATION_MIN_TRADES": 1}"#,
        )?;
        Ok(workspace)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn bars_path(&self) -> PathBuf {
        self.path("bars.json")
    }

    fn grid_path(&self) -> PathBuf {
        self.path("grid.json")
    }

    fn config_path(&self) -> PathBuf {
        self.path("settings.json")
    }

    async fn app(&self) -> Result<AppContext> {
        let db_path = self.path("engine.db");
        let config_path = self.config_path();
        AppContext::initialize(&db_path.to_string_lossy(), Some(config_path.as_path())).await
    }
}

fn synthetic_bars() -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
    (0..TOTAL_DAYS)
        .map(|day| {
            let phase = day as f64 * 2.0 * PI / 30.0;
            let close = 100.0 + 12.0 * phase.sin() + 0.05 * day as f64;
            Bar {
                timestamp: start + Duration::days(day),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 10_000.0,
            }
        })
        .collect()
}

fn window<'a>(data_file: &'a Path, start: &'a str, end: &'a str) -> MarketDataArgs<'a> {
    MarketDataArgs {
        ticker: TICKER,
        data_file,
        start: Some(start),
        end: Some(end),
    }
}

fn grid_options(workspace: &Workspace) -> optimize::OptimizeOptions {
    optimize::OptimizeOptions {
        grid_file: Some(workspace.grid_path()),
        ..Default::default()
    }
}

#[tokio::test]
async fn optimizing_twice_leaves_one_identical_row() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();
    let training = window(&bars_path, TRAIN_START, TRAIN_END);

    let first = optimize::run(&app, "rsi", &training, &grid_options(&workspace)).await?;
    assert!(!first.interrupted);
    assert_eq!(first.evaluated + first.skipped, 8);
    let first_stamp = app
        .database()
        .get_best_strategy_params_updated_at(TICKER, "rsi")
        .await?;

    let second = optimize::run(&app, "rsi", &training, &grid_options(&workspace)).await?;
    assert_eq!(first.best, second.best);

    let rows = app.database().list_best_strategy_params().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], first.best);
    assert_eq!(
        app.database()
            .get_best_strategy_params_updated_at(TICKER, "rsi")
            .await?,
        first_stamp
    );
    Ok(())
}

#[tokio::test]
async fn validation_verdict_is_persisted() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();

    let report = optimize::run(
        &app,
        "rsi",
        &window(&bars_path, TRAIN_START, TRAIN_END),
        &grid_options(&workspace),
    )
    .await?;
    let validation_args = window(&bars_path, VALIDATION_START, VALIDATION_END);
    let verdict = validate::run(&app, "rsi", &validation_args).await?;

    assert_eq!(verdict.params, report.best.params);
    assert!(!verdict.reason.is_empty());
    if verdict.is_valid {
        assert_eq!(verdict.reason, "OK");
    }
    assert!(verdict.validation_window.start > report.best.train_window.end);

    let stored = app
        .database()
        .get_strategy_validation(TICKER, "rsi", verdict.validation_window.start)
        .await?;
    assert_eq!(stored, Some(verdict.clone()));

    validate::run(&app, "rsi", &validation_args).await?;
    assert_eq!(
        app.database()
            .list_strategy_validations(Some(TICKER))
            .await?
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn overlapping_validation_window_is_rejected() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();

    optimize::run(
        &app,
        "rsi",
        &window(&bars_path, TRAIN_START, TRAIN_END),
        &grid_options(&workspace),
    )
    .await?;

    let overlapping = window(&bars_path, "2023-05-01", VALIDATION_END);
    let err = validate::run(&app, "rsi", &overlapping).await.unwrap_err();
    assert!(err.to_string().contains("overlaps"), "{}", err);
    assert!(app
        .database()
        .list_strategy_validations(None)
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn batch_validation_covers_registered_tickers_with_data() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();
    let tickers_path = workspace.path("tickers.json");
    fs::write(
        &tickers_path,
        r#"[{"ticker": "SINE", "company": "Sine Wave Inc", "market": "TEST"},
            {"ticker": "COS", "company": "Cosine Corp", "market": "TEST"}]"#,
    )?;
    import_tickers::run(&app, &tickers_path).await?;

    for ticker in ["SINE", "COS", "GHOST"] {
        let training = MarketDataArgs {
            ticker,
            data_file: &bars_path,
            start: Some(TRAIN_START),
            end: Some(TRAIN_END),
        };
        optimize::run(&app, "rsi", &training, &grid_options(&workspace)).await?;
    }
    assert_eq!(app.database().list_best_strategy_params().await?.len(), 3);

    // COS is registered but has no bars; GHOST has bars but is not registered.
    let data_dir = workspace.path("bars");
    fs::create_dir_all(&data_dir)?;
    fs::copy(&bars_path, data_dir.join("SINE.json"))?;
    fs::copy(&bars_path, data_dir.join("GHOST.json"))?;

    let args = validate::BatchArgs {
        data_dir: &data_dir,
        strategy: Some("rsi"),
        market: Some("test"),
        start: Some(VALIDATION_START),
        end: Some(VALIDATION_END),
    };
    let validations = validate::run_all(&app, &args).await?;
    assert_eq!(validations.len(), 1);
    assert_eq!(validations[0].ticker, TICKER);

    let stored = app.database().list_strategy_validations(None).await?;
    assert_eq!(stored, validations);

    let other_market = validate::BatchArgs {
        market: Some("NYSE"),
        ..args
    };
    assert!(validate::run_all(&app, &other_market).await.is_err());
    Ok(())
}

#[tokio::test]
async fn persistence_failure_surfaces_as_storage_error() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();
    let side_channel =
        sqlx::SqlitePool::connect(&format!("sqlite:{}", workspace.path("engine.db").display()))
            .await?;
    sqlx::query("DROP TABLE best_strategy_params")
        .execute(&side_channel)
        .await?;
    side_channel.close().await;

    let err = optimize::run(
        &app,
        "rsi",
        &window(&bars_path, TRAIN_START, TRAIN_END),
        &grid_options(&workspace),
    )
    .await
    .unwrap_err();
    let engine_error = err
        .downcast_ref::<EngineError>()
        .expect("storage failures carry an engine error");
    assert!(engine_error.is_storage(), "{}", engine_error);
    assert!(engine_error.to_string().contains("best_strategy_params"));
    Ok(())
}

#[tokio::test]
async fn validate_without_stored_params_fails() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();
    let result = validate::run(
        &app,
        "classical",
        &window(&bars_path, VALIDATION_START, VALIDATION_END),
    )
    .await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn snapshot_backtest_matches_json_backtest() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();
    let snapshot_path = workspace.path("snapshots/sine.bin");
    export_market_data::run(&bars_path, TICKER, &snapshot_path)?;

    let params: ParameterSet = [
        ("period".to_string(), 14.0),
        ("oversold_level".to_string(), 35.0),
        ("overbought_level".to_string(), 65.0),
    ]
    .into();
    let (json_run, json_metrics) = backtest::run(
        &app,
        "rsi",
        &window(&bars_path, TRAIN_START, VALIDATION_END),
        Some(params.clone()),
    )
    .await?;
    let (snapshot_run, snapshot_metrics) = backtest::run(
        &app,
        "rsi",
        &window(&snapshot_path, TRAIN_START, VALIDATION_END),
        Some(params),
    )
    .await?;

    assert_eq!(json_run, snapshot_run);
    assert_eq!(json_metrics, snapshot_metrics);
    assert_eq!(json_run.equity_curve.len(), TOTAL_DAYS as usize);
    assert!(json_metrics.trade_count > 0);
    Ok(())
}

#[tokio::test]
async fn buy_and_hold_backtest_uses_defaults() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let bars_path = workspace.bars_path();
    let (run, metrics) = backtest::run(
        &app,
        "buy_and_hold",
        &window(&bars_path, TRAIN_START, TRAIN_END),
        None,
    )
    .await?;
    assert_eq!(run.trades.len(), 1);
    assert_eq!(metrics.trade_count, 1);
    Ok(())
}

#[tokio::test]
async fn tickers_import_is_idempotent() -> Result<()> {
    let workspace = Workspace::new()?;
    let app = workspace.app().await?;
    let tickers_path = workspace.path("tickers.json");
    fs::write(
        &tickers_path,
        r#"[{"ticker": "SINE", "company": "Sine Wave Inc", "market": "TEST"},
            {"ticker": "COS", "company": "Cosine Corp", "market": "TEST"}]"#,
    )?;

    assert_eq!(import_tickers::run(&app, &tickers_path).await?, 2);
    assert_eq!(import_tickers::run(&app, &tickers_path).await?, 2);
    let tickers = app.database().list_tickers().await?;
    assert_eq!(tickers.len(), 2);
    assert_eq!(tickers[0].ticker, "COS");
    Ok(())
}

#[tokio::test]
async fn malformed_settings_are_rejected() -> Result<()> {
    let workspace = Workspace::new()?;
    fs::write(workspace.config_path(), r#"{"INITIAL_CAPITAL": "lots"}"#)?;
    assert!(workspace.app().await.is_err());
    Ok(())
}
