use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::aggregate::{fcf_projection, summarize_scenarios, summarize_years, valuation_statistics};
use super::discount::{discount_cash_flows, validate_rates};
use super::error::ValuationError;
use super::sensitivity::sensitivity_grid;
use super::types::{
    BaseValues, CompoundingPolicy, DiscountRateSource, GrowthDistribution, GrowthParams,
    LineItem, LineItemTable, StatementValues, Trial, ValuationInputs, ValuationReport,
    WaccBreakdown,
};
use super::wacc::compute_wacc;

/// Everything a single trial needs, resolved and validated once per run.
#[derive(Debug, Clone, Copy)]
pub struct TrialSpec<'a> {
    pub base_values: &'a BaseValues,
    pub growth: &'a GrowthDistribution,
    pub discount_rate: f64,
    pub terminal_growth: f64,
    pub years: u32,
    pub compounding: CompoundingPolicy,
}

/// The unreduced trial population.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub trials: Vec<Trial>,
    pub discarded: u32,
}

impl SimulationOutput {
    pub fn valuations(&self) -> Vec<f64> {
        self.trials.iter().map(|t| t.valuation).collect()
    }
}

enum TrialOutcome {
    Completed(Trial),
    Discarded,
    Skipped,
}

/// Runs the full pipeline: discount rate, trials, aggregation, sensitivity grid.
pub fn run_valuation(inputs: &ValuationInputs) -> Result<ValuationReport, ValuationError> {
    let cancel = AtomicBool::new(false);
    run_valuation_with_cancel(inputs, &cancel)
}

pub fn run_valuation_with_cancel(
    inputs: &ValuationInputs,
    cancel: &AtomicBool,
) -> Result<ValuationReport, ValuationError> {
    let (discount_rate, wacc_breakdown) = resolve_discount_rate(inputs)?;
    validate_inputs(inputs, discount_rate)?;

    info!(
        simulations = inputs.simulations,
        years = inputs.years,
        discount_rate,
        terminal_growth = inputs.terminal_growth,
        seed = inputs.seed,
        compounding = ?inputs.compounding,
        "starting valuation run"
    );

    let spec = TrialSpec {
        base_values: &inputs.base_values,
        growth: &inputs.growth,
        discount_rate,
        terminal_growth: inputs.terminal_growth,
        years: inputs.years,
        compounding: inputs.compounding,
    };
    let output = simulate(&spec, inputs.simulations, inputs.seed, cancel)?;
    let valuations = output.valuations();

    let scenarios = summarize_scenarios(
        &valuations,
        inputs.total_debt,
        inputs.cash,
        inputs.shares_outstanding,
    )?;
    let yearly = summarize_years(&output.trials, inputs.years);
    let fcf_projection = fcf_projection(&yearly);
    let statistics = valuation_statistics(&valuations, output.discarded);
    debug!(
        mean = statistics.mean,
        std_dev = statistics.std_dev,
        standard_error = statistics.standard_error,
        "aggregated trial population"
    );

    let neutral_final_fcf = fcf_projection
        .last()
        .map(|row| row.neutral)
        .unwrap_or_default();
    let sensitivity = sensitivity_grid(neutral_final_fcf, inputs.years, &inputs.sensitivity)?;

    info!(
        valid_trials = statistics.valid_trials,
        discarded = statistics.discarded_trials,
        neutral_ev = statistics.mean,
        "valuation run finished"
    );

    Ok(ValuationReport {
        discount_rate,
        wacc_breakdown,
        terminal_growth: inputs.terminal_growth,
        years: inputs.years,
        simulations: inputs.simulations,
        seed: inputs.seed,
        compounding: inputs.compounding,
        base_values: inputs.base_values,
        scenarios,
        yearly,
        fcf_projection,
        statistics,
        sensitivity,
        valuations: inputs.keep_valuations.then_some(valuations),
    })
}

fn resolve_discount_rate(
    inputs: &ValuationInputs,
) -> Result<(f64, Option<WaccBreakdown>), ValuationError> {
    match inputs.discount_rate {
        DiscountRateSource::Fixed(rate) => Ok((rate, None)),
        DiscountRateSource::CapitalStructure(ref structure) => {
            let breakdown = compute_wacc(structure)?;
            debug!(
                cost_of_equity = breakdown.cost_of_equity,
                equity_weight = breakdown.equity_weight,
                wacc = breakdown.wacc,
                "derived discount rate from capital structure"
            );
            Ok((breakdown.wacc, Some(breakdown)))
        }
    }
}

fn validate_inputs(inputs: &ValuationInputs, discount_rate: f64) -> Result<(), ValuationError> {
    if inputs.years == 0 {
        return Err(ValuationError::invalid("projection years must be > 0"));
    }
    if inputs.simulations == 0 {
        return Err(ValuationError::invalid("simulations must be > 0"));
    }
    if inputs.shares_outstanding.is_nan() || inputs.shares_outstanding <= 0.0 {
        return Err(ValuationError::invalid("shares outstanding must be > 0"));
    }
    for (name, value) in [
        ("shares outstanding", inputs.shares_outstanding),
        ("cash", inputs.cash),
        ("total debt", inputs.total_debt),
    ] {
        if !value.is_finite() {
            return Err(ValuationError::invalid(format!("{name} must be finite")));
        }
    }
    for (item, base) in inputs.base_values.iter() {
        if !base.is_finite() {
            return Err(ValuationError::invalid(format!(
                "base value for {item} must be finite"
            )));
        }
    }
    for (item, params) in inputs.growth.iter() {
        if !params.mean.is_finite() || !params.std_dev.is_finite() {
            return Err(ValuationError::invalid(format!(
                "growth distribution for {item} must be finite"
            )));
        }
        if params.std_dev < 0.0 {
            return Err(ValuationError::invalid(format!(
                "growth std dev for {item} must be >= 0"
            )));
        }
    }
    validate_rates(discount_rate, inputs.terminal_growth)?;
    inputs.sensitivity.validate()
}

/// Runs `simulations` independent trials in parallel. Trial `i` always draws
/// from the generator seeded with `derive_seed(seed, i)`, so the population is
/// identical for any thread count. `cancel` is polled before each trial.
pub fn simulate(
    spec: &TrialSpec<'_>,
    simulations: u32,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<SimulationOutput, ValuationError> {
    let outcomes = (0..simulations)
        .into_par_iter()
        .map(|trial_id| {
            if cancel.load(Ordering::Relaxed) {
                return TrialOutcome::Skipped;
            }
            let mut rng = StdRng::seed_from_u64(derive_seed(seed, trial_id));
            match run_trial(spec, &mut rng) {
                Ok(trial) => TrialOutcome::Completed(trial),
                Err(err) => {
                    warn!(trial_id, error = %err, "discarding trial");
                    TrialOutcome::Discarded
                }
            }
        })
        .collect::<Vec<_>>();

    let mut trials = Vec::with_capacity(outcomes.len());
    let mut discarded = 0_u32;
    let mut skipped = 0_u32;
    for outcome in outcomes {
        match outcome {
            TrialOutcome::Completed(trial) => trials.push(trial),
            TrialOutcome::Discarded => discarded += 1,
            TrialOutcome::Skipped => skipped += 1,
        }
    }

    if skipped > 0 {
        return Err(ValuationError::Cancelled {
            completed: simulations - skipped,
            requested: simulations,
        });
    }
    if trials.is_empty() {
        return Err(ValuationError::NoValidTrials {
            attempted: simulations,
        });
    }
    if discarded > 0 {
        warn!(discarded, simulations, "some trials were discarded");
    }

    Ok(SimulationOutput { trials, discarded })
}

/// One path: project every line item, derive the cash-flow chain and discount.
pub fn run_trial<R: Rng + ?Sized>(spec: &TrialSpec<'_>, rng: &mut R) -> Result<Trial, ValuationError> {
    let years = build_trajectory(
        spec.base_values,
        spec.growth,
        spec.years,
        spec.compounding,
        rng,
    )?;
    let fcf = years.iter().map(|y| y.free_cash_flow).collect::<Vec<_>>();
    let valuation = discount_cash_flows(&fcf, spec.discount_rate, spec.terminal_growth)?.total;
    if !valuation.is_finite() {
        return Err(ValuationError::SampleFailure {
            year: spec.years,
            detail: format!("discounted valuation is {valuation}"),
        });
    }
    Ok(Trial { years, valuation })
}

/// Draws every line item's path item by item (in `LineItem::ALL` order), then
/// assembles per-year statement records.
pub fn build_trajectory<R: Rng + ?Sized>(
    base_values: &BaseValues,
    growth: &GrowthDistribution,
    years: u32,
    compounding: CompoundingPolicy,
    rng: &mut R,
) -> Result<Vec<StatementValues>, ValuationError> {
    let mut paths: Vec<Vec<f64>> = Vec::with_capacity(LineItem::COUNT);
    for item in LineItem::ALL {
        let base = base_values[item];
        let params = growth[item];
        let mut path = Vec::with_capacity(years as usize);
        let mut chained = base;
        for year in 1..=years {
            let g = sample_growth(item, year, params, rng)?;
            let value = match compounding {
                CompoundingPolicy::YearIndexPower => base * (1.0 + g).powi(year as i32),
                CompoundingPolicy::Chained => {
                    chained *= 1.0 + g;
                    chained
                }
            };
            if !value.is_finite() {
                return Err(ValuationError::SampleFailure {
                    year,
                    detail: format!("{item} projected to {value} from growth {g}"),
                });
            }
            path.push(value);
        }
        paths.push(path);
    }

    Ok((0..years as usize)
        .map(|idx| {
            let raw = LineItemTable::from_fn(|item| paths[item.slot()][idx]);
            StatementValues::derive(&raw)
        })
        .collect())
}

/// One Normal(mean, std_dev) growth draw for `item` in `year`. Negative
/// growth is kept as drawn.
pub fn sample_growth<R: Rng + ?Sized>(
    item: LineItem,
    year: u32,
    params: GrowthParams,
    rng: &mut R,
) -> Result<f64, ValuationError> {
    let failure = |detail: String| ValuationError::SampleFailure {
        year,
        detail: format!("{item}: {detail}"),
    };
    if params.std_dev.is_nan() || params.std_dev < 0.0 {
        return Err(failure(format!("std dev {} must be >= 0", params.std_dev)));
    }
    let normal = Normal::new(params.mean, params.std_dev).map_err(|e| {
        failure(format!(
            "bad distribution N({}, {}): {e}",
            params.mean, params.std_dev
        ))
    })?;
    let draw = normal.sample(rng);
    if draw.is_finite() {
        Ok(draw)
    } else {
        Err(failure(format!(
            "draw {draw} from N({}, {})",
            params.mean, params.std_dev
        )))
    }
}

/// Sub-seed for one trial. The run seed is mixed before the trial id is
/// folded in, so nearby run seeds do not share trial streams.
pub fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    splitmix64(splitmix64(base_seed) ^ trial_id as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
