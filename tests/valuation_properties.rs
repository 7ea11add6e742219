use std::sync::atomic::AtomicBool;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use dcf_montecarlo::core::{
    BaseValues, CapitalStructure, CompoundingPolicy, DiscountRateSource, GrowthDistribution,
    GrowthParams, LineItem, Scenario, SensitivityAxes, SensitivityCell, ValuationError,
    ValuationInputs, compute_wacc, discount_cash_flows, equity_bridge, linspace,
    present_terminal_value, run_valuation, run_valuation_with_cancel, sensitivity_cell,
    summarize_scenarios,
};

fn base_values() -> BaseValues {
    BaseValues::from_fn(|item| match item {
        LineItem::Revenue => 1_000.0,
        LineItem::Cogs => 400.0,
        LineItem::Opex => 250.0,
        LineItem::DepreciationAmortization => 50.0,
        LineItem::DeltaReceivables => 20.0,
        LineItem::DeltaInventory => 15.0,
        LineItem::DeltaPayables => 10.0,
        LineItem::CapEx => 60.0,
    })
}

fn growth(mean: f64, std_dev: f64) -> GrowthDistribution {
    GrowthDistribution::from_fn(|_| GrowthParams { mean, std_dev })
}

fn inputs(std_dev: f64, simulations: u32) -> ValuationInputs {
    let mut inputs = ValuationInputs::new(
        base_values(),
        growth(0.05, std_dev),
        DiscountRateSource::Fixed(0.10),
        100.0,
        50.0,
        200.0,
    );
    inputs.simulations = simulations;
    inputs.keep_valuations = true;
    inputs
}

#[test]
fn zero_volatility_matches_hand_computed_trajectory() {
    let report = run_valuation(&inputs(0.0, 64)).expect("valid run");

    // Every item grows at 5%, so FCF_t = FCF_0 * 1.05^t.
    let fcf_0 = 1_000.0 - 400.0 - 250.0 + 50.0 - (20.0 + 15.0 - 10.0) - 60.0;
    let fcf = (1..=5)
        .map(|t| fcf_0 * 1.05_f64.powi(t))
        .collect::<Vec<_>>();
    let expected = fcf
        .iter()
        .enumerate()
        .map(|(idx, v)| v / 1.10_f64.powi(idx as i32 + 1))
        .sum::<f64>()
        + fcf[4] * 1.025 / (0.10 - 0.025) / 1.10_f64.powi(5);

    let valuations = report.valuations.as_deref().expect("kept valuations");
    assert_eq!(valuations.len(), 64);
    for &v in valuations {
        assert_relative_eq!(v, expected, max_relative = 1e-12);
    }
    for scenario in Scenario::ALL {
        let summary = report.scenario(scenario).expect("band present");
        assert_relative_eq!(summary.enterprise_value, expected, max_relative = 1e-12);
    }
    assert_abs_diff_eq!(report.statistics.std_dev, 0.0, epsilon = 1e-6);
}

#[test]
fn equal_weights_give_blended_wacc() {
    let breakdown = compute_wacc(&CapitalStructure {
        risk_free_rate: 0.04,
        beta: 1.0,
        equity_risk_premium: 0.06,
        country_risk_premium: 0.0,
        cost_of_debt: 0.05,
        tax_rate: 0.30,
        market_value_equity: 500.0,
        market_value_debt: 500.0,
    })
    .expect("valid structure");
    assert_abs_diff_eq!(breakdown.cost_of_equity, 0.10, epsilon = 1e-12);
    assert_abs_diff_eq!(breakdown.wacc, 0.0675, epsilon = 1e-12);
}

#[test]
fn terminal_value_and_its_present_value() {
    let discounted = discount_cash_flows(&[0.0, 0.0, 0.0, 0.0, 100.0], 0.10, 0.025)
        .expect("valid rates");
    assert_relative_eq!(discounted.terminal_value, 1366.6667, max_relative = 1e-6);
    assert_relative_eq!(discounted.pv_terminal_value, 848.5925, max_relative = 1e-6);

    let pv_tv = present_terminal_value(100.0, 0.10, 0.025, 5).expect("valid rates");
    assert_relative_eq!(pv_tv, discounted.pv_terminal_value, max_relative = 1e-12);

    let cell = sensitivity_cell(100.0, 0.10, 0.025, 5).expect("finite cell");
    assert_eq!(cell.value(), Some(pv_tv));
}

#[test]
fn discount_rate_below_growth_is_undefined() {
    assert!(matches!(
        present_terminal_value(100.0, 0.02, 0.025, 5),
        Err(ValuationError::DivisionUndefined { .. })
    ));

    let mut bad = inputs(0.1, 10);
    bad.discount_rate = DiscountRateSource::Fixed(0.02);
    assert!(matches!(
        run_valuation(&bad),
        Err(ValuationError::DivisionUndefined { .. })
    ));
}

#[test]
fn bands_and_equity_bridge() {
    let scenarios =
        summarize_scenarios(&[10.0, 20.0, 30.0, 40.0, 50.0], 0.0, 0.0, 1.0).expect("valid");
    assert_abs_diff_eq!(scenarios[0].enterprise_value, 18.0, epsilon = 1e-12);
    assert_abs_diff_eq!(scenarios[1].enterprise_value, 30.0, epsilon = 1e-12);
    assert_abs_diff_eq!(scenarios[2].enterprise_value, 42.0, epsilon = 1e-12);

    let (equity, per_share) = equity_bridge(1_000.0, 200.0, 50.0, 100.0);
    assert_abs_diff_eq!(equity, 850.0, epsilon = 1e-12);
    assert_abs_diff_eq!(per_share, 8.5, epsilon = 1e-12);
}

#[test]
fn standard_error_shrinks_with_more_trials() {
    let reports = [100, 1_000, 10_000, 100_000]
        .map(|n| run_valuation(&inputs(0.08, n)).expect("valid run"));

    // One seed family: each run extends the previous population.
    for pair in reports.windows(2) {
        let smaller = pair[0].valuations.as_deref().expect("kept valuations");
        let larger = pair[1].valuations.as_deref().expect("kept valuations");
        assert_eq!(smaller, &larger[..smaller.len()]);
    }

    let errors = reports.each_ref().map(|r| r.statistics.standard_error);
    for pair in errors.windows(2) {
        assert!(pair[1] < pair[0], "standard errors not decreasing: {errors:?}");
    }
}

#[test]
fn adjacent_seeds_give_different_bands() {
    let mut run = inputs(0.1, 1_000);
    run.seed = 0;
    let a = run_valuation(&run).expect("valid run");
    run.seed = 1;
    let b = run_valuation(&run).expect("valid run");
    assert_ne!(a.scenarios, b.scenarios);

    let mut left = a.valuations.expect("kept valuations");
    let mut right = b.valuations.expect("kept valuations");
    left.sort_by(|x, y| x.total_cmp(y));
    right.sort_by(|x, y| x.total_cmp(y));
    assert_ne!(left, right);
}

#[test]
fn out_of_range_sensitivity_axis_fails_before_simulating() {
    let mut run = inputs(0.1, 1_000);
    run.sensitivity = SensitivityAxes {
        discount_rates: vec![-1.5, 0.10],
        growth_rates: vec![0.025],
    };
    let cancel = AtomicBool::new(true);
    let err = run_valuation_with_cancel(&run, &cancel).expect_err("invalid axis");
    assert!(matches!(err, ValuationError::InvalidInput(_)), "{err:?}");
}

#[test]
fn same_seed_is_reproducible_across_thread_counts() {
    let run = inputs(0.1, 2_000);
    let single = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .expect("pool")
        .install(|| run_valuation(&run))
        .expect("valid run");
    let wide = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .expect("pool")
        .install(|| run_valuation(&run))
        .expect("valid run");

    assert_eq!(single.valuations, wide.valuations);
    assert_eq!(single.scenarios, wide.scenarios);

    let mut other = run.clone();
    other.seed = run.seed + 1;
    let reseeded = run_valuation(&other).expect("valid run");
    assert_ne!(single.valuations, reseeded.valuations);
}

#[test]
fn compounding_policies_agree_without_volatility() {
    let power = run_valuation(&inputs(0.0, 8)).expect("valid run");
    let mut chained_inputs = inputs(0.0, 8);
    chained_inputs.compounding = CompoundingPolicy::Chained;
    let chained = run_valuation(&chained_inputs).expect("valid run");

    for (a, b) in power.scenarios.iter().zip(&chained.scenarios) {
        assert_relative_eq!(a.enterprise_value, b.enterprise_value, max_relative = 1e-12);
    }
}

#[test]
fn cancelled_run_reports_cancellation() {
    let cancel = AtomicBool::new(true);
    let err = run_valuation_with_cancel(&inputs(0.1, 100), &cancel).expect_err("cancelled");
    assert_eq!(
        err,
        ValuationError::Cancelled {
            completed: 0,
            requested: 100
        }
    );
}

#[test]
fn undefined_cells_sit_exactly_where_rate_does_not_exceed_growth() {
    let mut run = inputs(0.05, 200);
    run.sensitivity = SensitivityAxes {
        discount_rates: linspace(0.01, 0.05, 5),
        growth_rates: linspace(0.01, 0.05, 5),
    };
    let grid = run_valuation(&run).expect("valid run").sensitivity;

    for (g_idx, &g) in grid.growth_rates.iter().enumerate() {
        for (w_idx, &w) in grid.discount_rates.iter().enumerate() {
            let cell = grid.cell(g_idx, w_idx).expect("cell in range");
            if w <= g {
                assert_eq!(cell, SensitivityCell::Undefined, "w={w} g={g}");
            } else {
                assert!(cell.value().is_some_and(f64::is_finite), "w={w} g={g}");
            }
        }
    }
    assert_eq!(grid.undefined_count(), 15);
}
