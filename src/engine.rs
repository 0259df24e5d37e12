use crate::config::RunConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::trading_rules::{size_entry, stop_loss_level, take_profit_level};

/// Output of one simulation: the equity curve and the closed-trade ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRun {
    pub equity_curve: EquityCurve,
    pub trades: Vec<Trade>,
}

pub struct Engine {
    pub config: RunConfig,
}

impl Engine {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    // Construct an Engine from base settings with per-candidate parameters applied.
    pub fn from_parameters(base: &RunConfig, parameters: &ParameterSet) -> Self {
        Self::new(base.clone().with_parameters(parameters))
    }

    /// Simulate a long-only strategy over `bars`, one signal per bar.
    ///
    /// Each bar is processed in order:
    /// 1. an open position is checked against the bar's low (stop-loss) and
    ///    then its high (take-profit) and closed at the trigger level;
    /// 2. a buy signal opens a position at the close when flat;
    /// 3. a sell signal closes the open position at the close;
    /// 4. on the final bar a remaining position is closed at the close;
    /// 5. equity is marked to the close.
    ///
    /// All state lives on this call's stack, so concurrent runs never share it.
    pub fn run(&self, bars: &[Bar], signals: &[Signal]) -> EngineResult<SimulationRun> {
        let config = &self.config;
        config.validate()?;
        validate_inputs(bars, signals)?;

        let fee_rate = config.transaction_fee_rate;
        let last_index = bars.len() - 1;
        let mut cash = config.initial_capital;
        let mut position: Option<Position> = None;
        let mut trades = Vec::new();
        let mut equity_curve = EquityCurve::with_capacity(config.initial_capital, bars.len());

        for (index, (bar, signal)) in bars.iter().zip(signals.iter()).enumerate() {
            if let Some(open) = position.as_ref() {
                if let Some((exit_price, reason)) = protective_exit(open, bar) {
                    if let Some(open) = position.take() {
                        trades.push(close_position(
                            open,
                            bar,
                            exit_price,
                            reason,
                            fee_rate,
                            &mut cash,
                        ));
                    }
                }
            }

            match signal.action {
                SignalAction::Buy if position.is_none() && index < last_index => {
                    if let Some(entry) =
                        size_entry(&config.position_sizing_rule, cash, bar.close, fee_rate)
                    {
                        cash -= entry.total();
                        position = Some(Position {
                            quantity: entry.quantity,
                            entry_price: bar.close,
                            entry_timestamp: bar.timestamp,
                            entry_fee: entry.fee,
                            stop_loss_price: stop_loss_level(bar.close, config.stop_loss_pct),
                            take_profit_price: take_profit_level(bar.close, config.take_profit_pct),
                        });
                    }
                }
                SignalAction::Sell => {
                    if let Some(open) = position.take() {
                        trades.push(close_position(
                            open,
                            bar,
                            bar.close,
                            ExitReason::Signal,
                            fee_rate,
                            &mut cash,
                        ));
                    }
                }
                _ => {}
            }

            if index == last_index {
                if let Some(open) = position.take() {
                    trades.push(close_position(
                        open,
                        bar,
                        bar.close,
                        ExitReason::EndOfPeriod,
                        fee_rate,
                        &mut cash,
                    ));
                }
            }

            let held_value = position
                .as_ref()
                .map(|open| open.market_value(bar.close))
                .unwrap_or(0.0);
            equity_curve.push(bar.timestamp, cash + held_value);
        }

        Ok(SimulationRun {
            equity_curve,
            trades,
        })
    }
}

pub fn run_simulation(
    bars: &[Bar],
    signals: &[Signal],
    config: &RunConfig,
) -> EngineResult<SimulationRun> {
    Engine::new(config.clone()).run(bars, signals)
}

/// Structural checks first (configuration), then price data (data quality).
pub fn validate_inputs(bars: &[Bar], signals: &[Signal]) -> EngineResult<()> {
    if bars.is_empty() {
        return Err(EngineError::configuration("no bars to simulate"));
    }
    if bars.len() != signals.len() {
        return Err(EngineError::configuration(format!(
            "signals/bars length mismatch: {} signals for {} bars",
            signals.len(),
            bars.len()
        )));
    }
    for (index, (bar, signal)) in bars.iter().zip(signals.iter()).enumerate() {
        if bar.timestamp != signal.timestamp {
            return Err(EngineError::configuration(format!(
                "signal {} at {} is not aligned with bar at {}",
                index,
                signal.timestamp.to_rfc3339(),
                bar.timestamp.to_rfc3339()
            )));
        }
    }
    validate_bars(bars)
}

pub fn validate_bars(bars: &[Bar]) -> EngineResult<()> {
    for (index, bar) in bars.iter().enumerate() {
        if !bar.has_finite_prices() {
            return Err(EngineError::data_quality(format!(
                "bar {} at {} has non-finite prices",
                index,
                bar.timestamp.to_rfc3339()
            )));
        }
        if !bar.has_positive_prices() {
            return Err(EngineError::data_quality(format!(
                "bar {} at {} has non-positive prices",
                index,
                bar.timestamp.to_rfc3339()
            )));
        }
        if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
            return Err(EngineError::data_quality(format!(
                "bar {} at {} does not follow {}",
                index,
                bar.timestamp.to_rfc3339(),
                bars[index - 1].timestamp.to_rfc3339()
            )));
        }
    }
    Ok(())
}

// Stop-loss wins when both levels sit inside the bar's range.
fn protective_exit(position: &Position, bar: &Bar) -> Option<(f64, ExitReason)> {
    if bar.timestamp <= position.entry_timestamp {
        return None;
    }
    if let Some(stop) = position.stop_loss_price {
        if bar.low <= stop {
            return Some((stop, ExitReason::StopLoss));
        }
    }
    if let Some(target) = position.take_profit_price {
        if bar.high >= target {
            return Some((target, ExitReason::TakeProfit));
        }
    }
    None
}

fn close_position(
    position: Position,
    bar: &Bar,
    exit_price: f64,
    reason: ExitReason,
    fee_rate: f64,
    cash: &mut f64,
) -> Trade {
    let proceeds = position.quantity * exit_price;
    let exit_fee = proceeds * fee_rate;
    *cash += proceeds - exit_fee;

    let fee_paid = position.entry_fee + exit_fee;
    let pnl = (exit_price - position.entry_price) * position.quantity - fee_paid;

    Trade {
        entry_timestamp: position.entry_timestamp,
        exit_timestamp: bar.timestamp,
        entry_price: position.entry_price,
        exit_price,
        quantity: position.quantity,
        fee_paid,
        pnl,
        exit_reason: reason,
    }
}
