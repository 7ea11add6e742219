use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    BaseValues, CapitalStructure, CompoundingPolicy, DiscountRateSource, GrowthDistribution,
    GrowthParams, LineItem, SensitivityAxes, ValuationError, ValuationInputs, ValuationReport,
    WaccBreakdown, compute_wacc, linspace, run_valuation,
};

const MAX_SIMULATIONS: u32 = 1_000_000;
const MAX_YEARS: u32 = 50;
const MAX_GRID_STEPS: usize = 101;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliCompounding {
    YearIndexPower,
    Chained,
}

impl From<CliCompounding> for CompoundingPolicy {
    fn from(value: CliCompounding) -> Self {
        match value {
            CliCompounding::YearIndexPower => CompoundingPolicy::YearIndexPower,
            CliCompounding::Chained => CompoundingPolicy::Chained,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiCompounding {
    #[serde(alias = "yearIndexPower", alias = "year_index_power", alias = "power")]
    YearIndexPower,
    #[serde(alias = "chain")]
    Chained,
}

impl From<ApiCompounding> for CliCompounding {
    fn from(value: ApiCompounding) -> Self {
        match value {
            ApiCompounding::YearIndexPower => CliCompounding::YearIndexPower,
            ApiCompounding::Chained => CliCompounding::Chained,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ValuationPayload {
    revenue: Option<f64>,
    cogs: Option<f64>,
    opex: Option<f64>,
    depreciation_amortization: Option<f64>,
    delta_receivables: Option<f64>,
    delta_inventory: Option<f64>,
    delta_payables: Option<f64>,
    capex: Option<f64>,

    revenue_growth_mean: Option<f64>,
    revenue_growth_std: Option<f64>,
    cogs_growth_mean: Option<f64>,
    cogs_growth_std: Option<f64>,
    opex_growth_mean: Option<f64>,
    opex_growth_std: Option<f64>,
    depreciation_amortization_growth_mean: Option<f64>,
    depreciation_amortization_growth_std: Option<f64>,
    delta_receivables_growth_mean: Option<f64>,
    delta_receivables_growth_std: Option<f64>,
    delta_inventory_growth_mean: Option<f64>,
    delta_inventory_growth_std: Option<f64>,
    delta_payables_growth_mean: Option<f64>,
    delta_payables_growth_std: Option<f64>,
    capex_growth_mean: Option<f64>,
    capex_growth_std: Option<f64>,

    discount_rate: Option<f64>,
    risk_free_rate: Option<f64>,
    beta: Option<f64>,
    equity_risk_premium: Option<f64>,
    country_risk_premium: Option<f64>,
    cost_of_debt: Option<f64>,
    tax_rate: Option<f64>,
    market_value_equity: Option<f64>,
    market_value_debt: Option<f64>,

    shares_outstanding: Option<f64>,
    cash: Option<f64>,
    total_debt: Option<f64>,

    years: Option<u32>,
    simulations: Option<u32>,
    terminal_growth: Option<f64>,
    seed: Option<u64>,
    compounding: Option<ApiCompounding>,

    wacc_min: Option<f64>,
    wacc_max: Option<f64>,
    wacc_steps: Option<usize>,
    growth_min: Option<f64>,
    growth_max: Option<f64>,
    growth_steps: Option<usize>,
    include_valuations: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WaccPayload {
    risk_free_rate: Option<f64>,
    beta: Option<f64>,
    equity_risk_premium: Option<f64>,
    country_risk_premium: Option<f64>,
    cost_of_debt: Option<f64>,
    tax_rate: Option<f64>,
    market_value_equity: Option<f64>,
    market_value_debt: Option<f64>,
}

/// Valuation inputs as a user enters them. Rates are in percent.
#[derive(Args, Debug, Clone)]
pub struct ValuationArgs {
    #[arg(long, help = "Base-year revenue")]
    revenue: f64,
    #[arg(long, help = "Base-year cost of goods sold")]
    cogs: f64,
    #[arg(long, help = "Base-year operating expenses")]
    opex: f64,
    #[arg(long, default_value_t = 0.0, help = "Base-year depreciation & amortization")]
    depreciation_amortization: f64,
    #[arg(long, default_value_t = 0.0)]
    delta_receivables: f64,
    #[arg(long, default_value_t = 0.0)]
    delta_inventory: f64,
    #[arg(long, default_value_t = 0.0)]
    delta_payables: f64,
    #[arg(long, default_value_t = 0.0, help = "Base-year capital expenditures")]
    capex: f64,

    #[arg(long, default_value_t = 5.0, help = "Mean annual revenue growth in percent")]
    revenue_growth_mean: f64,
    #[arg(long, default_value_t = 10.0, help = "Revenue growth std dev in percent")]
    revenue_growth_std: f64,
    #[arg(long, default_value_t = 5.0)]
    cogs_growth_mean: f64,
    #[arg(long, default_value_t = 10.0)]
    cogs_growth_std: f64,
    #[arg(long, default_value_t = 5.0)]
    opex_growth_mean: f64,
    #[arg(long, default_value_t = 10.0)]
    opex_growth_std: f64,
    #[arg(long, default_value_t = 3.0)]
    depreciation_amortization_growth_mean: f64,
    #[arg(long, default_value_t = 5.0)]
    depreciation_amortization_growth_std: f64,
    #[arg(long, default_value_t = 3.0)]
    delta_receivables_growth_mean: f64,
    #[arg(long, default_value_t = 5.0)]
    delta_receivables_growth_std: f64,
    #[arg(long, default_value_t = 3.0)]
    delta_inventory_growth_mean: f64,
    #[arg(long, default_value_t = 5.0)]
    delta_inventory_growth_std: f64,
    #[arg(long, default_value_t = 3.0)]
    delta_payables_growth_mean: f64,
    #[arg(long, default_value_t = 5.0)]
    delta_payables_growth_std: f64,
    #[arg(long, default_value_t = 4.0)]
    capex_growth_mean: f64,
    #[arg(long, default_value_t = 10.0)]
    capex_growth_std: f64,

    #[arg(
        long,
        help = "Discount rate in percent; derived from the capital structure flags when omitted"
    )]
    discount_rate: Option<f64>,
    #[arg(long, default_value_t = 4.0, help = "Risk-free rate in percent")]
    risk_free_rate: f64,
    #[arg(long, default_value_t = 1.0)]
    beta: f64,
    #[arg(long, default_value_t = 5.5, help = "Equity market risk premium in percent")]
    equity_risk_premium: f64,
    #[arg(long, default_value_t = 0.0, help = "Country risk premium in percent")]
    country_risk_premium: f64,
    #[arg(long, default_value_t = 6.0, help = "Pre-tax cost of debt in percent")]
    cost_of_debt: f64,
    #[arg(long, default_value_t = 25.0, help = "Corporate tax rate in percent")]
    tax_rate: f64,
    #[arg(long, default_value_t = 0.0)]
    market_value_equity: f64,
    #[arg(long, default_value_t = 0.0)]
    market_value_debt: f64,

    #[arg(long)]
    shares_outstanding: f64,
    #[arg(long, default_value_t = 0.0)]
    cash: f64,
    #[arg(long, default_value_t = 0.0, help = "Short plus long term debt")]
    total_debt: f64,

    #[arg(long, default_value_t = 5, help = "Projection horizon in years")]
    years: u32,
    #[arg(long, default_value_t = 10000)]
    simulations: u32,
    #[arg(long, default_value_t = 2.5, help = "Perpetual growth after the horizon in percent")]
    terminal_growth: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, value_enum, default_value_t = CliCompounding::YearIndexPower)]
    compounding: CliCompounding,

    #[arg(long, default_value_t = 5.0, help = "Lowest sensitivity discount rate in percent")]
    wacc_min: f64,
    #[arg(long, default_value_t = 15.0)]
    wacc_max: f64,
    #[arg(long, default_value_t = 11)]
    wacc_steps: usize,
    #[arg(long, default_value_t = 1.0, help = "Lowest sensitivity terminal growth in percent")]
    growth_min: f64,
    #[arg(long, default_value_t = 5.0)]
    growth_max: f64,
    #[arg(long, default_value_t = 5)]
    growth_steps: usize,
    #[arg(long, help = "Include the raw per-trial valuations in the output")]
    include_valuations: bool,
}

impl ValuationArgs {
    fn base_value(&self, item: LineItem) -> f64 {
        match item {
            LineItem::Revenue => self.revenue,
            LineItem::Cogs => self.cogs,
            LineItem::Opex => self.opex,
            LineItem::DepreciationAmortization => self.depreciation_amortization,
            LineItem::DeltaReceivables => self.delta_receivables,
            LineItem::DeltaInventory => self.delta_inventory,
            LineItem::DeltaPayables => self.delta_payables,
            LineItem::CapEx => self.capex,
        }
    }

    /// `(mean, std)` in percent.
    fn growth_pct(&self, item: LineItem) -> (f64, f64) {
        match item {
            LineItem::Revenue => (self.revenue_growth_mean, self.revenue_growth_std),
            LineItem::Cogs => (self.cogs_growth_mean, self.cogs_growth_std),
            LineItem::Opex => (self.opex_growth_mean, self.opex_growth_std),
            LineItem::DepreciationAmortization => (
                self.depreciation_amortization_growth_mean,
                self.depreciation_amortization_growth_std,
            ),
            LineItem::DeltaReceivables => (
                self.delta_receivables_growth_mean,
                self.delta_receivables_growth_std,
            ),
            LineItem::DeltaInventory => (
                self.delta_inventory_growth_mean,
                self.delta_inventory_growth_std,
            ),
            LineItem::DeltaPayables => (
                self.delta_payables_growth_mean,
                self.delta_payables_growth_std,
            ),
            LineItem::CapEx => (self.capex_growth_mean, self.capex_growth_std),
        }
    }

    fn capital_structure(&self) -> CapitalStructure {
        CapitalStructure {
            risk_free_rate: self.risk_free_rate / 100.0,
            beta: self.beta,
            equity_risk_premium: self.equity_risk_premium / 100.0,
            country_risk_premium: self.country_risk_premium / 100.0,
            cost_of_debt: self.cost_of_debt / 100.0,
            tax_rate: self.tax_rate / 100.0,
            market_value_equity: self.market_value_equity,
            market_value_debt: self.market_value_debt,
        }
    }
}

fn flag(item: LineItem) -> String {
    let mut out = String::new();
    for ch in item.key().chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn build_inputs(args: ValuationArgs) -> Result<ValuationInputs, String> {
    for item in LineItem::ALL {
        if !args.base_value(item).is_finite() {
            return Err(format!("--{} must be a finite number", flag(item)));
        }
        let (mean, std) = args.growth_pct(item);
        if !mean.is_finite() || mean <= -100.0 {
            return Err(format!("--{}-growth-mean must be > -100", flag(item)));
        }
        if !std.is_finite() || std < 0.0 {
            return Err(format!("--{}-growth-std must be >= 0", flag(item)));
        }
    }

    if !args.shares_outstanding.is_finite() || args.shares_outstanding <= 0.0 {
        return Err("--shares-outstanding must be > 0".to_string());
    }

    if !args.cash.is_finite() || !args.total_debt.is_finite() {
        return Err("--cash and --total-debt must be finite".to_string());
    }

    if args.years == 0 || args.years > MAX_YEARS {
        return Err(format!("--years must be between 1 and {MAX_YEARS}"));
    }

    if args.simulations == 0 || args.simulations > MAX_SIMULATIONS {
        return Err(format!("--simulations must be between 1 and {MAX_SIMULATIONS}"));
    }

    if !args.terminal_growth.is_finite() || args.terminal_growth <= -100.0 {
        return Err("--terminal-growth must be > -100".to_string());
    }

    let discount_rate = match args.discount_rate {
        Some(rate) => {
            if !rate.is_finite() || rate <= args.terminal_growth {
                return Err("--discount-rate must exceed --terminal-growth".to_string());
            }
            DiscountRateSource::Fixed(rate / 100.0)
        }
        None => {
            if !(0.0..=100.0).contains(&args.tax_rate) {
                return Err("--tax-rate must be between 0 and 100".to_string());
            }
            if args.market_value_equity < 0.0 || args.market_value_debt < 0.0 {
                return Err(
                    "--market-value-equity and --market-value-debt must be >= 0".to_string(),
                );
            }
            if args.market_value_equity + args.market_value_debt <= 0.0 {
                return Err(
                    "--discount-rate or a positive --market-value-equity/--market-value-debt is required"
                        .to_string(),
                );
            }
            DiscountRateSource::CapitalStructure(args.capital_structure())
        }
    };

    for (name, min, max, steps) in [
        ("wacc", args.wacc_min, args.wacc_max, args.wacc_steps),
        ("growth", args.growth_min, args.growth_max, args.growth_steps),
    ] {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(format!("--{name}-min must be <= --{name}-max"));
        }
        if min <= -100.0 {
            return Err(format!("--{name}-min must be > -100"));
        }
        if steps == 0 || steps > MAX_GRID_STEPS {
            return Err(format!("--{name}-steps must be between 1 and {MAX_GRID_STEPS}"));
        }
    }

    let base_values = BaseValues::from_fn(|item| args.base_value(item));
    let growth = GrowthDistribution::from_fn(|item| {
        let (mean, std) = args.growth_pct(item);
        GrowthParams {
            mean: mean / 100.0,
            std_dev: std / 100.0,
        }
    });

    let mut inputs = ValuationInputs::new(
        base_values,
        growth,
        discount_rate,
        args.shares_outstanding,
        args.cash,
        args.total_debt,
    );
    inputs.years = args.years;
    inputs.simulations = args.simulations;
    inputs.terminal_growth = args.terminal_growth / 100.0;
    inputs.seed = args.seed;
    inputs.compounding = args.compounding.into();
    inputs.sensitivity = SensitivityAxes {
        discount_rates: linspace(args.wacc_min / 100.0, args.wacc_max / 100.0, args.wacc_steps),
        growth_rates: linspace(
            args.growth_min / 100.0,
            args.growth_max / 100.0,
            args.growth_steps,
        ),
    };
    inputs.keep_valuations = args.include_valuations;
    Ok(inputs)
}

/// Runs a valuation from command-line arguments and renders the report as JSON.
pub fn run_cli(args: ValuationArgs) -> Result<String, String> {
    let inputs = build_inputs(args)?;
    let report = run_valuation(&inputs).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&report).map_err(|e| format!("failed to render report: {e}"))
}

/// Same as [`run_cli`] for a JSON payload in the HTTP API's format.
pub fn run_payload_json(json: &str) -> Result<String, String> {
    let inputs = inputs_from_json(json)?;
    let report = run_valuation(&inputs).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&report).map_err(|e| format!("failed to render report: {e}"))
}

fn inputs_from_json(json: &str) -> Result<ValuationInputs, String> {
    let payload = serde_json::from_str::<ValuationPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    inputs_from_payload(payload)
}

macro_rules! overlay {
    ($payload:expr, $args:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $payload.$field {
                $args.$field = v;
            }
        )+
    };
}

fn inputs_from_payload(payload: ValuationPayload) -> Result<ValuationInputs, String> {
    let mut args = default_args_for_api();

    overlay!(payload, args;
        revenue,
        cogs,
        opex,
        depreciation_amortization,
        delta_receivables,
        delta_inventory,
        delta_payables,
        capex,
    );
    overlay!(payload, args;
        revenue_growth_mean,
        revenue_growth_std,
        cogs_growth_mean,
        cogs_growth_std,
        opex_growth_mean,
        opex_growth_std,
        depreciation_amortization_growth_mean,
        depreciation_amortization_growth_std,
        delta_receivables_growth_mean,
        delta_receivables_growth_std,
        delta_inventory_growth_mean,
        delta_inventory_growth_std,
        delta_payables_growth_mean,
        delta_payables_growth_std,
        capex_growth_mean,
        capex_growth_std,
    );
    overlay!(payload, args;
        risk_free_rate,
        beta,
        equity_risk_premium,
        country_risk_premium,
        cost_of_debt,
        tax_rate,
        market_value_equity,
        market_value_debt,
    );
    overlay!(payload, args;
        shares_outstanding,
        cash,
        total_debt,
        years,
        simulations,
        terminal_growth,
        seed,
        wacc_min,
        wacc_max,
        wacc_steps,
        growth_min,
        growth_max,
        growth_steps,
        include_valuations,
    );

    if let Some(v) = payload.discount_rate {
        args.discount_rate = Some(v);
    }
    if let Some(v) = payload.compounding {
        args.compounding = v.into();
    }

    build_inputs(args)
}

fn default_args_for_api() -> ValuationArgs {
    ValuationArgs {
        revenue: 1_000_000.0,
        cogs: 400_000.0,
        opex: 250_000.0,
        depreciation_amortization: 50_000.0,
        delta_receivables: 20_000.0,
        delta_inventory: 15_000.0,
        delta_payables: 10_000.0,
        capex: 60_000.0,
        revenue_growth_mean: 8.0,
        revenue_growth_std: 10.0,
        cogs_growth_mean: 7.0,
        cogs_growth_std: 8.0,
        opex_growth_mean: 5.0,
        opex_growth_std: 5.0,
        depreciation_amortization_growth_mean: 3.0,
        depreciation_amortization_growth_std: 5.0,
        delta_receivables_growth_mean: 3.0,
        delta_receivables_growth_std: 5.0,
        delta_inventory_growth_mean: 3.0,
        delta_inventory_growth_std: 5.0,
        delta_payables_growth_mean: 3.0,
        delta_payables_growth_std: 5.0,
        capex_growth_mean: 4.0,
        capex_growth_std: 12.0,
        discount_rate: None,
        risk_free_rate: 4.0,
        beta: 1.1,
        equity_risk_premium: 5.5,
        country_risk_premium: 0.0,
        cost_of_debt: 6.0,
        tax_rate: 25.0,
        market_value_equity: 800_000.0,
        market_value_debt: 200_000.0,
        shares_outstanding: 100_000.0,
        cash: 50_000.0,
        total_debt: 200_000.0,
        years: 5,
        simulations: 10_000,
        terminal_growth: 2.5,
        seed: 42,
        compounding: CliCompounding::YearIndexPower,
        wacc_min: 5.0,
        wacc_max: 15.0,
        wacc_steps: 11,
        growth_min: 1.0,
        growth_max: 5.0,
        growth_steps: 5,
        include_valuations: false,
    }
}

fn wacc_from_payload(payload: WaccPayload) -> Result<WaccBreakdown, String> {
    let mut args = default_args_for_api();
    overlay!(payload, args;
        risk_free_rate,
        beta,
        equity_risk_premium,
        country_risk_premium,
        cost_of_debt,
        tax_rate,
        market_value_equity,
        market_value_debt,
    );
    if !(0.0..=100.0).contains(&args.tax_rate) {
        return Err("--tax-rate must be between 0 and 100".to_string());
    }
    compute_wacc(&args.capital_structure()).map_err(|e| e.to_string())
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "valuation HTTP API listening");
    axum::serve(listener, router()).await
}

pub fn router() -> Router {
    Router::new()
        .route(
            "/api/valuation",
            get(valuation_get_handler).post(valuation_post_handler),
        )
        .route("/api/wacc", get(wacc_get_handler).post(wacc_post_handler))
        .fallback(not_found_handler)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn valuation_get_handler(Query(payload): Query<ValuationPayload>) -> Response {
    valuation_handler_impl(payload).await
}

async fn valuation_post_handler(Json(payload): Json<ValuationPayload>) -> Response {
    valuation_handler_impl(payload).await
}

async fn valuation_handler_impl(payload: ValuationPayload) -> Response {
    let inputs = match inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match tokio::task::spawn_blocking(move || run_valuation(&inputs)).await {
        Ok(Ok(report)) => json_response(StatusCode::OK, build_valuation_response(report)),
        Ok(Err(err)) => error_response(status_for(&err), &err.to_string()),
        Err(join_err) => {
            error!(error = %join_err, "valuation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "valuation task failed")
        }
    }
}

async fn wacc_get_handler(Query(payload): Query<WaccPayload>) -> Response {
    wacc_handler_impl(payload)
}

async fn wacc_post_handler(Json(payload): Json<WaccPayload>) -> Response {
    wacc_handler_impl(payload)
}

fn wacc_handler_impl(payload: WaccPayload) -> Response {
    match wacc_from_payload(payload) {
        Ok(breakdown) => json_response(StatusCode::OK, breakdown),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValuationResponse {
    scenario_labels: Vec<&'static str>,
    #[serde(flatten)]
    report: ValuationReport,
}

fn build_valuation_response(report: ValuationReport) -> ValuationResponse {
    ValuationResponse {
        scenario_labels: report.scenarios.iter().map(|s| s.scenario.label()).collect(),
        report,
    }
}

fn status_for(err: &ValuationError) -> StatusCode {
    match err {
        ValuationError::InvalidInput(_) | ValuationError::DivisionUndefined { .. } => {
            StatusCode::BAD_REQUEST
        }
        ValuationError::SampleFailure { .. } | ValuationError::NoValidTrials { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ValuationError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Scenario;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_args() -> ValuationArgs {
        let mut args = default_args_for_api();
        args.simulations = 200;
        args
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn build_inputs_converts_percent_to_fractions() {
        let inputs = build_inputs(sample_args()).expect("valid inputs");
        assert_approx(inputs.growth[LineItem::Revenue].mean, 0.08);
        assert_approx(inputs.growth[LineItem::CapEx].std_dev, 0.12);
        assert_approx(inputs.terminal_growth, 0.025);
        assert_approx(inputs.base_values[LineItem::Cogs], 400_000.0);
        assert_eq!(inputs.sensitivity.discount_rates.len(), 11);
        assert_approx(inputs.sensitivity.discount_rates[0], 0.05);
        assert_approx(inputs.sensitivity.growth_rates[4], 0.05);
        match inputs.discount_rate {
            DiscountRateSource::CapitalStructure(structure) => {
                assert_approx(structure.risk_free_rate, 0.04);
                assert_approx(structure.tax_rate, 0.25);
            }
            other => panic!("expected capital structure, got {other:?}"),
        }
    }

    #[test]
    fn build_inputs_prefers_explicit_discount_rate() {
        let mut args = sample_args();
        args.discount_rate = Some(11.0);
        let inputs = build_inputs(args).expect("valid inputs");
        assert_eq!(inputs.discount_rate, DiscountRateSource::Fixed(0.11));
    }

    #[test]
    fn build_inputs_rejects_discount_rate_at_or_below_terminal_growth() {
        let mut args = sample_args();
        args.discount_rate = Some(2.0);
        let err = build_inputs(args).expect_err("2% < 2.5%");
        assert!(err.contains("--discount-rate"));
    }

    #[test]
    fn build_inputs_rejects_missing_capital_structure() {
        let mut args = sample_args();
        args.market_value_equity = 0.0;
        args.market_value_debt = 0.0;
        let err = build_inputs(args).expect_err("no rate source");
        assert!(err.contains("--market-value-equity"));
    }

    #[test]
    fn build_inputs_rejects_non_positive_shares() {
        let mut args = sample_args();
        args.shares_outstanding = 0.0;
        let err = build_inputs(args).expect_err("zero shares");
        assert!(err.contains("--shares-outstanding"));
    }

    #[test]
    fn build_inputs_rejects_negative_growth_std() {
        let mut args = sample_args();
        args.delta_receivables_growth_std = -1.0;
        let err = build_inputs(args).expect_err("negative std");
        assert!(err.contains("--delta-receivables-growth-std"), "{err}");
    }

    #[test]
    fn build_inputs_rejects_inverted_sensitivity_range() {
        let mut args = sample_args();
        args.wacc_min = 20.0;
        let err = build_inputs(args).expect_err("min > max");
        assert!(err.contains("--wacc-min"));

        let mut args = sample_args();
        args.growth_steps = 0;
        let err = build_inputs(args).expect_err("no steps");
        assert!(err.contains("--growth-steps"));

        let mut args = sample_args();
        args.wacc_min = -150.0;
        let err = build_inputs(args).expect_err("rate below -100%");
        assert!(err.contains("--wacc-min must be > -100"), "{err}");
    }

    #[test]
    fn payload_parses_web_keys() {
        let json = r#"{
          "revenue": 500000,
          "capex": 25000,
          "revenueGrowthMean": 12,
          "capexGrowthStd": 3,
          "depreciationAmortizationGrowthMean": 1.5,
          "riskFreeRate": 5,
          "beta": 1.3,
          "countryRiskPremium": 4,
          "marketValueEquity": 1000,
          "marketValueDebt": 0,
          "sharesOutstanding": 250,
          "cash": 10,
          "totalDebt": 20,
          "years": 7,
          "simulations": 1234,
          "compounding": "chained",
          "includeValuations": true
        }"#;
        let inputs = inputs_from_json(json).expect("json should parse");

        assert_approx(inputs.base_values[LineItem::Revenue], 500_000.0);
        assert_approx(inputs.base_values[LineItem::CapEx], 25_000.0);
        assert_approx(inputs.growth[LineItem::Revenue].mean, 0.12);
        assert_approx(inputs.growth[LineItem::CapEx].std_dev, 0.03);
        assert_approx(inputs.growth[LineItem::DepreciationAmortization].mean, 0.015);
        assert_approx(inputs.shares_outstanding, 250.0);
        assert_eq!(inputs.years, 7);
        assert_eq!(inputs.simulations, 1234);
        assert_eq!(inputs.compounding, CompoundingPolicy::Chained);
        assert!(inputs.keep_valuations);
        match inputs.discount_rate {
            DiscountRateSource::CapitalStructure(structure) => {
                assert_approx(structure.risk_free_rate, 0.05);
                assert_approx(structure.beta, 1.3);
                assert_approx(structure.country_risk_premium, 0.04);
                assert_approx(structure.market_value_debt, 0.0);
            }
            other => panic!("expected capital structure, got {other:?}"),
        }
    }

    #[test]
    fn payload_rejects_malformed_json() {
        let err = inputs_from_json("{\"revenue\": \"lots\"}").expect_err("bad type");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn wacc_payload_uses_api_defaults_for_missing_fields() {
        let breakdown = wacc_from_payload(WaccPayload {
            risk_free_rate: Some(2.0),
            beta: Some(1.0),
            equity_risk_premium: Some(5.0),
            country_risk_premium: Some(3.0),
            cost_of_debt: Some(5.0),
            tax_rate: Some(30.0),
            market_value_equity: Some(1.0),
            market_value_debt: Some(1.0),
        })
        .expect("valid structure");
        assert_approx(breakdown.wacc, 0.0675);

        let err = wacc_from_payload(WaccPayload {
            market_value_equity: Some(0.0),
            market_value_debt: Some(0.0),
            ..WaccPayload::default()
        })
        .expect_err("E + D = 0");
        assert!(err.contains("market value"));
    }

    #[test]
    fn valuation_response_serialization_contains_expected_fields() {
        let mut args = sample_args();
        args.simulations = 20;
        let inputs = build_inputs(args).expect("valid inputs");
        let report = run_valuation(&inputs).expect("valid run");
        let response = build_valuation_response(report);
        let json = serde_json::to_string(&response).expect("response should serialize");

        assert!(json.contains("\"scenarioLabels\":[\"Bearish (P20)\",\"Neutral (Mean)\",\"Bullish (P80)\"]"));
        assert!(json.contains("\"scenarios\""));
        assert!(json.contains("\"enterpriseValue\""));
        assert!(json.contains("\"valuePerShare\""));
        assert!(json.contains("\"yearly\""));
        assert!(json.contains("\"freeCashFlow\""));
        assert!(json.contains("\"fcfProjection\""));
        assert!(json.contains("\"sensitivity\""));
        assert!(json.contains("\"waccBreakdown\""));
        assert!(json.contains("\"baseValues\":{\"revenue\":1000000.0"));
        assert!(!json.contains("\"valuations\""));
    }

    #[tokio::test]
    async fn valuation_handler_returns_report() {
        let payload = ValuationPayload {
            simulations: Some(50),
            discount_rate: Some(10.0),
            include_valuations: Some(true),
            ..ValuationPayload::default()
        };
        let response = valuation_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );

        let body = body_json(response).await;
        assert_eq!(body["valuations"].as_array().map(Vec::len), Some(50));
        assert_eq!(body["scenarios"][0]["scenario"], "bearish");
        assert_approx(body["discountRate"].as_f64().expect("rate"), 0.10);
        assert!(body["waccBreakdown"].is_null());
    }

    #[tokio::test]
    async fn valuation_handler_rejects_bad_input() {
        let payload = ValuationPayload {
            shares_outstanding: Some(-1.0),
            ..ValuationPayload::default()
        };
        let response = valuation_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|msg| msg.contains("--shares-outstanding"))
        );
    }

    #[tokio::test]
    async fn valuation_handler_maps_failed_trials_to_unprocessable() {
        let payload = ValuationPayload {
            simulations: Some(5),
            revenue: Some(1e300),
            revenue_growth_mean: Some(1e12),
            revenue_growth_std: Some(0.0),
            discount_rate: Some(10.0),
            ..ValuationPayload::default()
        };
        let response = valuation_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn scenario_labels_follow_band_order() {
        let labels = Scenario::ALL.map(Scenario::label);
        assert_eq!(labels, ["Bearish (P20)", "Neutral (Mean)", "Bullish (P80)"]);
    }
}
