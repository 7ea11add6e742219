mod aggregate;
mod discount;
mod engine;
mod error;
mod sensitivity;
mod types;
mod wacc;

pub use aggregate::{
    equity_bridge, fcf_projection, mean, percentile, summarize_scenarios, summarize_years,
    valuation_statistics,
};
pub use discount::{DiscountedValue, discount_cash_flows, present_terminal_value};
pub use engine::{
    SimulationOutput, TrialSpec, build_trajectory, derive_seed, run_trial, run_valuation,
    run_valuation_with_cancel, sample_growth, simulate,
};
pub use error::ValuationError;
pub use sensitivity::{
    SensitivityAxes, SensitivityCell, SensitivityGrid, linspace, sensitivity_cell,
    sensitivity_grid,
};
pub use types::{
    BandStatistic, BaseValues, CapitalStructure, CompoundingPolicy, DEFAULT_SEED,
    DEFAULT_SIMULATIONS, DEFAULT_TERMINAL_GROWTH, DEFAULT_YEARS, DiscountRateSource,
    FcfProjection, GrowthDistribution, GrowthParams, LineItem, LineItemTable, Scenario,
    ScenarioSummary, StatementField, StatementValues, Trial, ValuationInputs, ValuationReport,
    ValuationStatistics, WaccBreakdown, YearlySummary,
};
pub use wacc::compute_wacc;
