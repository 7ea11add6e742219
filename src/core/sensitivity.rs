use serde::Serialize;

use super::discount::present_terminal_value;
use super::error::ValuationError;

pub const DEFAULT_DISCOUNT_RATE_RANGE: (f64, f64, usize) = (0.05, 0.15, 11);
pub const DEFAULT_GROWTH_RATE_RANGE: (f64, f64, usize) = (0.01, 0.05, 5);

/// Grid axes as decimal fractions.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityAxes {
    pub discount_rates: Vec<f64>,
    pub growth_rates: Vec<f64>,
}

impl SensitivityAxes {
    /// Both axes non-empty and finite, every discount rate above -100%.
    pub fn validate(&self) -> Result<(), ValuationError> {
        if self.discount_rates.is_empty() || self.growth_rates.is_empty() {
            return Err(ValuationError::invalid("sensitivity axes must not be empty"));
        }
        if let Some(rate) = self
            .discount_rates
            .iter()
            .chain(&self.growth_rates)
            .find(|rate| !rate.is_finite())
        {
            return Err(ValuationError::invalid(format!(
                "sensitivity rate {rate} must be finite"
            )));
        }
        if let Some(rate) = self.discount_rates.iter().find(|&&rate| rate <= -1.0) {
            return Err(ValuationError::invalid(format!(
                "sensitivity discount rate {rate} must be > -100%"
            )));
        }
        Ok(())
    }
}

impl Default for SensitivityAxes {
    fn default() -> Self {
        let (w_start, w_end, w_steps) = DEFAULT_DISCOUNT_RATE_RANGE;
        let (g_start, g_end, g_steps) = DEFAULT_GROWTH_RATE_RANGE;
        Self {
            discount_rates: linspace(w_start, w_end, w_steps),
            growth_rates: linspace(g_start, g_end, g_steps),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SensitivityCell {
    Valid { value: f64 },
    /// Discount rate at or below the growth rate, or a value outside `f64`.
    Undefined,
}

impl SensitivityCell {
    pub fn value(self) -> Option<f64> {
        match self {
            SensitivityCell::Valid { value } => Some(value),
            SensitivityCell::Undefined => None,
        }
    }
}

/// Rows follow `growth_rates`, columns follow `discount_rates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityGrid {
    pub fcf: f64,
    pub years: u32,
    pub discount_rates: Vec<f64>,
    pub growth_rates: Vec<f64>,
    pub cells: Vec<Vec<SensitivityCell>>,
}

impl SensitivityGrid {
    pub fn cell(&self, growth_idx: usize, discount_idx: usize) -> Option<SensitivityCell> {
        self.cells.get(growth_idx)?.get(discount_idx).copied()
    }

    pub fn undefined_count(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| matches!(cell, SensitivityCell::Undefined))
            .count()
    }
}

/// Terminal-value-only valuation for every (growth, discount rate) pair.
/// A non-finite `fcf` flags every cell instead of failing.
pub fn sensitivity_grid(
    fcf: f64,
    years: u32,
    axes: &SensitivityAxes,
) -> Result<SensitivityGrid, ValuationError> {
    axes.validate()?;

    let mut cells = Vec::with_capacity(axes.growth_rates.len());
    for &growth in &axes.growth_rates {
        let mut row = Vec::with_capacity(axes.discount_rates.len());
        for &rate in &axes.discount_rates {
            row.push(sensitivity_cell(fcf, rate, growth, years)?);
        }
        cells.push(row);
    }

    Ok(SensitivityGrid {
        fcf,
        years,
        discount_rates: axes.discount_rates.clone(),
        growth_rates: axes.growth_rates.clone(),
        cells,
    })
}

/// Non-positive spreads and non-finite results are flagged. Rates that
/// fail [`SensitivityAxes::validate`] are still errors.
pub fn sensitivity_cell(
    fcf: f64,
    discount_rate: f64,
    growth: f64,
    years: u32,
) -> Result<SensitivityCell, ValuationError> {
    match present_terminal_value(fcf, discount_rate, growth, years) {
        Ok(value) if value.is_finite() => Ok(SensitivityCell::Valid { value }),
        Ok(_) => Ok(SensitivityCell::Undefined),
        Err(ValuationError::DivisionUndefined { .. }) => Ok(SensitivityCell::Undefined),
        Err(err) => Err(err),
    }
}

/// `steps` evenly spaced values from `start` to `end`, both endpoints exact.
pub fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let last = steps - 1;
            (0..steps)
                .map(|idx| {
                    if idx == last {
                        end
                    } else {
                        start + (end - start) * idx as f64 / last as f64
                    }
                })
                .collect()
        }
    }
}
