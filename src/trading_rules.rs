use std::fmt;
use std::sync::Arc;

pub const PRICE_EPSILON: f64 = 1e-9;

/// Decides how many units to buy when a long entry fires.
///
/// Implementations return a desired quantity; the engine is responsible for
/// clamping anything it cannot afford.
pub trait PositionSizer: Send + Sync {
    fn quantity(&self, available_cash: f64, price: f64, fee_rate: f64) -> f64;

    fn describe(&self) -> String {
        "custom".to_string()
    }
}

impl<F> PositionSizer for F
where
    F: Fn(f64, f64, f64) -> f64 + Send + Sync,
{
    fn quantity(&self, available_cash: f64, price: f64, fee_rate: f64) -> f64 {
        self(available_cash, price, fee_rate)
    }
}

/// Spend a fraction of available cash, fees included, in fractional units.
#[derive(Debug, Clone, Copy)]
pub struct FixedFraction(pub f64);

impl PositionSizer for FixedFraction {
    fn quantity(&self, available_cash: f64, price: f64, fee_rate: f64) -> f64 {
        affordable_quantity(available_cash * self.0.clamp(0.0, 1.0), price, fee_rate)
    }

    fn describe(&self) -> String {
        format!("fixed_fraction({})", self.0)
    }
}

/// Same as [`FixedFraction`] but floored to whole units.
#[derive(Debug, Clone, Copy)]
pub struct WholeUnits(pub f64);

impl PositionSizer for WholeUnits {
    fn quantity(&self, available_cash: f64, price: f64, fee_rate: f64) -> f64 {
        affordable_quantity(available_cash * self.0.clamp(0.0, 1.0), price, fee_rate).floor()
    }

    fn describe(&self) -> String {
        format!("whole_units({})", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedUnits(pub f64);

impl PositionSizer for FixedUnits {
    fn quantity(&self, _available_cash: f64, _price: f64, _fee_rate: f64) -> f64 {
        self.0.max(0.0)
    }

    fn describe(&self) -> String {
        format!("fixed_units({})", self.0)
    }
}

/// Shared handle so a sizing rule can travel inside a cloneable run config.
#[derive(Clone)]
pub struct SizingRule(Arc<dyn PositionSizer>);

impl SizingRule {
    pub fn new<S: PositionSizer + 'static>(sizer: S) -> Self {
        Self(Arc::new(sizer))
    }

    pub fn fixed_fraction(fraction: f64) -> Self {
        Self::new(FixedFraction(fraction))
    }

    pub fn quantity(&self, available_cash: f64, price: f64, fee_rate: f64) -> f64 {
        self.0.quantity(available_cash, price, fee_rate)
    }
}

impl Default for SizingRule {
    fn default() -> Self {
        Self::fixed_fraction(1.0)
    }
}

impl fmt::Debug for SizingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SizingRule({})", self.0.describe())
    }
}

fn affordable_quantity(budget: f64, price: f64, fee_rate: f64) -> f64 {
    if budget <= 0.0 || price <= 0.0 || !budget.is_finite() || !price.is_finite() {
        return 0.0;
    }
    budget / (price * (1.0 + fee_rate.max(0.0)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryCost {
    pub quantity: f64,
    pub notional: f64,
    pub fee: f64,
}

impl EntryCost {
    pub fn total(&self) -> f64 {
        self.notional + self.fee
    }
}

/// Resolve the sizing rule into an affordable entry. Anything that would take
/// cash below zero, or that is not a positive finite quantity, becomes `None`.
pub fn size_entry(
    rule: &SizingRule,
    available_cash: f64,
    price: f64,
    fee_rate: f64,
) -> Option<EntryCost> {
    if available_cash <= 0.0 || price <= 0.0 {
        return None;
    }
    let quantity = rule.quantity(available_cash, price, fee_rate);
    if !quantity.is_finite() || quantity <= 0.0 {
        return None;
    }
    let notional = quantity * price;
    let fee = notional * fee_rate;
    let cost = EntryCost {
        quantity,
        notional,
        fee,
    };
    if cost.total() > available_cash + PRICE_EPSILON * available_cash.max(1.0) {
        return None;
    }
    Some(cost)
}

pub fn stop_loss_level(entry_price: f64, stop_loss_pct: Option<f64>) -> Option<f64> {
    stop_loss_pct
        .filter(|pct| pct.is_finite() && *pct > 0.0)
        .map(|pct| entry_price * (1.0 - pct))
}

pub fn take_profit_level(entry_price: f64, take_profit_pct: Option<f64>) -> Option<f64> {
    take_profit_pct
        .filter(|pct| pct.is_finite() && *pct > 0.0)
        .map(|pct| entry_price * (1.0 + pct))
}
