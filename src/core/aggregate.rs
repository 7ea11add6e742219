use super::error::ValuationError;
use super::types::{
    BandStatistic, FcfProjection, Scenario, ScenarioSummary, StatementField, StatementValues,
    Trial, ValuationStatistics, YearlySummary,
};

/// EV per band, bridged to equity and to a per-share figure.
pub fn summarize_scenarios(
    valuations: &[f64],
    total_debt: f64,
    cash: f64,
    shares_outstanding: f64,
) -> Result<Vec<ScenarioSummary>, ValuationError> {
    if valuations.is_empty() {
        return Err(ValuationError::invalid("no valuations to summarize"));
    }
    if shares_outstanding.is_nan() || shares_outstanding <= 0.0 {
        return Err(ValuationError::invalid("shares outstanding must be > 0"));
    }

    let mut sorted = valuations.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    Ok(Scenario::ALL
        .iter()
        .map(|&scenario| {
            let enterprise_value = band_value(&sorted, scenario.statistic());
            let (equity_value, value_per_share) =
                equity_bridge(enterprise_value, total_debt, cash, shares_outstanding);
            ScenarioSummary {
                scenario,
                enterprise_value,
                equity_value,
                value_per_share,
            }
        })
        .collect())
}

/// `(EV - debt + cash, equity / shares)`.
pub fn equity_bridge(
    enterprise_value: f64,
    total_debt: f64,
    cash: f64,
    shares_outstanding: f64,
) -> (f64, f64) {
    let equity_value = enterprise_value - total_debt + cash;
    (equity_value, equity_value / shares_outstanding)
}

struct YearlyAccumulator {
    samples: Vec<[Vec<f64>; StatementField::COUNT]>,
}

impl YearlyAccumulator {
    fn new(years: u32, expected_samples: usize) -> Self {
        let samples = (0..years)
            .map(|_| std::array::from_fn(|_| Vec::with_capacity(expected_samples)))
            .collect();
        Self { samples }
    }

    fn push(&mut self, index: usize, row: &StatementValues) {
        for field in StatementField::ALL {
            self.samples[index][field.slot()].push(row.get(field));
        }
    }

    fn into_results(mut self) -> Vec<YearlySummary> {
        let mut results = Vec::with_capacity(self.samples.len() * Scenario::ALL.len());
        for (idx, columns) in self.samples.iter_mut().enumerate() {
            for column in columns.iter_mut() {
                column.sort_by(|a, b| a.total_cmp(b));
            }
            for scenario in Scenario::ALL {
                let values = StatementValues::from_fields(|field| {
                    band_value(&columns[field.slot()], scenario.statistic())
                });
                results.push(YearlySummary {
                    year: idx as u32 + 1,
                    scenario,
                    values,
                });
            }
        }
        results
    }
}

/// Per year, per band, the statistic of every statement field across trials.
pub fn summarize_years(trials: &[Trial], years: u32) -> Vec<YearlySummary> {
    let mut acc = YearlyAccumulator::new(years, trials.len());
    for trial in trials {
        for (idx, row) in trial.years.iter().enumerate().take(years as usize) {
            acc.push(idx, row);
        }
    }
    acc.into_results()
}

pub fn fcf_projection(yearly: &[YearlySummary]) -> Vec<FcfProjection> {
    let years = yearly.iter().map(|s| s.year).max().unwrap_or(0);
    (1..=years)
        .map(|year| {
            let fcf = |scenario: Scenario| {
                yearly
                    .iter()
                    .find(|s| s.year == year && s.scenario == scenario)
                    .map(|s| s.values.free_cash_flow)
                    .unwrap_or(0.0)
            };
            FcfProjection {
                year,
                bearish: fcf(Scenario::Bearish),
                neutral: fcf(Scenario::Neutral),
                bullish: fcf(Scenario::Bullish),
            }
        })
        .collect()
}

pub fn valuation_statistics(valuations: &[f64], discarded_trials: u32) -> ValuationStatistics {
    let n = valuations.len();
    let mean = mean(valuations);
    let std_dev = if n > 1 {
        let ss = valuations.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        (ss / (n as f64 - 1.0)).sqrt()
    } else {
        0.0
    };
    let standard_error = if n > 0 { std_dev / (n as f64).sqrt() } else { 0.0 };

    ValuationStatistics {
        valid_trials: n as u32,
        discarded_trials,
        mean,
        std_dev,
        standard_error,
        min: valuations.iter().copied().reduce(f64::min).unwrap_or(0.0),
        max: valuations.iter().copied().reduce(f64::max).unwrap_or(0.0),
    }
}

fn band_value(sorted: &[f64], statistic: BandStatistic) -> f64 {
    match statistic {
        BandStatistic::Percentile(p) => percentile_sorted(sorted, p),
        BandStatistic::Mean => mean(sorted),
    }
}

/// Scales before summing so a population of near-`f64::MAX` values stays finite.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    values.iter().map(|v| v / n).sum()
}

/// Linear interpolation between closest ranks (Hyndman-Fan type 7).
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
