use super::error::ValuationError;
use super::types::{CapitalStructure, WaccBreakdown};

/// Weighted average cost of capital with a CAPM cost of equity that carries a
/// country risk premium on top of the market premium.
pub fn compute_wacc(inputs: &CapitalStructure) -> Result<WaccBreakdown, ValuationError> {
    validate_capital_structure(inputs)?;

    let cost_of_equity = inputs.risk_free_rate
        + inputs.beta * (inputs.equity_risk_premium + inputs.country_risk_premium);
    let total_value = inputs.market_value_equity + inputs.market_value_debt;
    let equity_weight = inputs.market_value_equity / total_value;
    let debt_weight = inputs.market_value_debt / total_value;
    let after_tax_cost_of_debt = inputs.cost_of_debt * (1.0 - inputs.tax_rate);

    Ok(WaccBreakdown {
        cost_of_equity,
        after_tax_cost_of_debt,
        equity_weight,
        debt_weight,
        wacc: equity_weight * cost_of_equity + debt_weight * after_tax_cost_of_debt,
    })
}

fn validate_capital_structure(inputs: &CapitalStructure) -> Result<(), ValuationError> {
    for (name, value) in [
        ("risk-free rate", inputs.risk_free_rate),
        ("beta", inputs.beta),
        ("equity risk premium", inputs.equity_risk_premium),
        ("country risk premium", inputs.country_risk_premium),
        ("cost of debt", inputs.cost_of_debt),
        ("tax rate", inputs.tax_rate),
        ("market value of equity", inputs.market_value_equity),
        ("market value of debt", inputs.market_value_debt),
    ] {
        if !value.is_finite() {
            return Err(ValuationError::invalid(format!("{name} must be finite")));
        }
    }

    if inputs.market_value_equity < 0.0 || inputs.market_value_debt < 0.0 {
        return Err(ValuationError::invalid(
            "market values of equity and debt must be >= 0",
        ));
    }

    if inputs.market_value_equity + inputs.market_value_debt <= 0.0 {
        return Err(ValuationError::invalid(
            "market value of equity plus debt must be > 0",
        ));
    }

    Ok(())
}
