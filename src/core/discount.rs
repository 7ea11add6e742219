use super::error::ValuationError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscountedValue {
    pub pv_cash_flows: f64,
    pub terminal_value: f64,
    pub pv_terminal_value: f64,
    pub total: f64,
}

/// Present value of an explicit FCF stream plus a Gordon-growth terminal value
/// on its last year. Year `i` (1-based) is discounted by `(1 + rate)^i`.
pub fn discount_cash_flows(
    free_cash_flows: &[f64],
    discount_rate: f64,
    terminal_growth: f64,
) -> Result<DiscountedValue, ValuationError> {
    validate_rates(discount_rate, terminal_growth)?;
    let Some(&final_fcf) = free_cash_flows.last() else {
        return Err(ValuationError::invalid("FCF stream must cover at least one year"));
    };

    let pv_cash_flows = free_cash_flows
        .iter()
        .enumerate()
        .map(|(idx, fcf)| fcf / discount_factor(discount_rate, idx as u32 + 1))
        .sum::<f64>();
    let years = free_cash_flows.len() as u32;
    let terminal_value = gordon_growth(final_fcf, discount_rate, terminal_growth);
    let pv_terminal_value = terminal_value / discount_factor(discount_rate, years);

    Ok(DiscountedValue {
        pv_cash_flows,
        terminal_value,
        pv_terminal_value,
        total: pv_cash_flows + pv_terminal_value,
    })
}

/// Terminal value alone, discounted back from the end of a `years` horizon.
pub fn present_terminal_value(
    final_fcf: f64,
    discount_rate: f64,
    terminal_growth: f64,
    years: u32,
) -> Result<f64, ValuationError> {
    validate_rates(discount_rate, terminal_growth)?;
    Ok(gordon_growth(final_fcf, discount_rate, terminal_growth)
        / discount_factor(discount_rate, years))
}

pub(crate) fn validate_rates(discount_rate: f64, terminal_growth: f64) -> Result<(), ValuationError> {
    if !discount_rate.is_finite() || !terminal_growth.is_finite() {
        return Err(ValuationError::invalid(
            "discount rate and terminal growth must be finite",
        ));
    }
    if discount_rate <= -1.0 {
        return Err(ValuationError::invalid("discount rate must be > -100%"));
    }
    ValuationError::check_spread(discount_rate, terminal_growth)
}

fn gordon_growth(final_fcf: f64, discount_rate: f64, terminal_growth: f64) -> f64 {
    final_fcf * (1.0 + terminal_growth) / (discount_rate - terminal_growth)
}

fn discount_factor(discount_rate: f64, year: u32) -> f64 {
    (1.0 + discount_rate).powi(year as i32)
}
