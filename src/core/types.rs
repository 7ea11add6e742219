use std::fmt;
use std::ops::Index;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use super::error::ValuationError;
use super::sensitivity::{SensitivityAxes, SensitivityGrid};

pub const DEFAULT_YEARS: u32 = 5;
pub const DEFAULT_SIMULATIONS: u32 = 10_000;
pub const DEFAULT_TERMINAL_GROWTH: f64 = 0.025;
pub const DEFAULT_SEED: u64 = 42;

/// Raw financial statement line items projected by the simulation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LineItem {
    Revenue,
    Cogs,
    Opex,
    DepreciationAmortization,
    DeltaReceivables,
    DeltaInventory,
    DeltaPayables,
    CapEx,
}

impl LineItem {
    pub const COUNT: usize = 8;

    /// Reporting order.
    pub const ALL: [LineItem; LineItem::COUNT] = [
        LineItem::Revenue,
        LineItem::Cogs,
        LineItem::Opex,
        LineItem::DepreciationAmortization,
        LineItem::DeltaReceivables,
        LineItem::DeltaInventory,
        LineItem::DeltaPayables,
        LineItem::CapEx,
    ];

    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            LineItem::Revenue => "Revenue",
            LineItem::Cogs => "COGS",
            LineItem::Opex => "Opex",
            LineItem::DepreciationAmortization => "D&A",
            LineItem::DeltaReceivables => "ΔReceivables",
            LineItem::DeltaInventory => "ΔInventory",
            LineItem::DeltaPayables => "ΔPayables",
            LineItem::CapEx => "CapEx",
        }
    }

    /// camelCase key used in serialized tables and API payloads.
    pub fn key(self) -> &'static str {
        match self {
            LineItem::Revenue => "revenue",
            LineItem::Cogs => "cogs",
            LineItem::Opex => "opex",
            LineItem::DepreciationAmortization => "depreciationAmortization",
            LineItem::DeltaReceivables => "deltaReceivables",
            LineItem::DeltaInventory => "deltaInventory",
            LineItem::DeltaPayables => "deltaPayables",
            LineItem::CapEx => "capex",
        }
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A value for every [`LineItem`]. Construction guarantees all eight keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineItemTable<T> {
    values: [T; LineItem::COUNT],
}

impl<T: Copy> LineItemTable<T> {
    pub fn from_fn(f: impl FnMut(LineItem) -> T) -> Self {
        Self {
            values: LineItem::ALL.map(f),
        }
    }

    pub fn try_from_entries<I>(entries: I) -> Result<Self, ValuationError>
    where
        I: IntoIterator<Item = (LineItem, T)>,
    {
        let mut slots: [Option<T>; LineItem::COUNT] = [None; LineItem::COUNT];
        for (item, value) in entries {
            if slots[item.slot()].replace(value).is_some() {
                return Err(ValuationError::invalid(format!(
                    "duplicate entry for {item}"
                )));
            }
        }

        let present = slots.iter().flatten().copied().collect::<Vec<_>>();
        let values = <[T; LineItem::COUNT]>::try_from(present).map_err(|_| {
            let missing = LineItem::ALL
                .iter()
                .filter(|item| slots[item.slot()].is_none())
                .map(|item| item.label())
                .collect::<Vec<_>>();
            ValuationError::invalid(format!("missing entries for {}", missing.join(", ")))
        })?;

        Ok(Self { values })
    }

    pub fn get(&self, item: LineItem) -> T {
        self.values[item.slot()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (LineItem, T)> + '_ {
        LineItem::ALL.iter().map(|&item| (item, self.get(item)))
    }
}

impl<T> Index<LineItem> for LineItemTable<T> {
    type Output = T;

    fn index(&self, item: LineItem) -> &T {
        &self.values[item.slot()]
    }
}

impl<T: Serialize> Serialize for LineItemTable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(LineItem::COUNT))?;
        for item in LineItem::ALL {
            map.serialize_entry(item.key(), &self[item])?;
        }
        map.end()
    }
}

/// Base-year (t=0) values.
pub type BaseValues = LineItemTable<f64>;

/// Annual growth rate distribution per line item.
pub type GrowthDistribution = LineItemTable<GrowthParams>;

/// Normal distribution parameters as decimal fractions (0.05 = 5%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthParams {
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapitalStructure {
    pub risk_free_rate: f64,
    pub beta: f64,
    pub equity_risk_premium: f64,
    pub country_risk_premium: f64,
    pub cost_of_debt: f64,
    pub tax_rate: f64,
    pub market_value_equity: f64,
    pub market_value_debt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaccBreakdown {
    pub cost_of_equity: f64,
    pub after_tax_cost_of_debt: f64,
    pub equity_weight: f64,
    pub debt_weight: f64,
    pub wacc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscountRateSource {
    Fixed(f64),
    CapitalStructure(CapitalStructure),
}

/// How a year's freshly drawn growth rate turns into a projected value.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompoundingPolicy {
    /// `base * (1 + g_i)^i` with a single draw per year.
    #[default]
    YearIndexPower,
    /// `base * (1 + g_1) * ... * (1 + g_i)`.
    Chained,
}

#[derive(Debug, Clone)]
pub struct ValuationInputs {
    pub base_values: BaseValues,
    pub growth: GrowthDistribution,
    pub discount_rate: DiscountRateSource,
    pub shares_outstanding: f64,
    pub cash: f64,
    pub total_debt: f64,
    pub years: u32,
    pub simulations: u32,
    pub terminal_growth: f64,
    pub seed: u64,
    pub compounding: CompoundingPolicy,
    pub sensitivity: SensitivityAxes,
    pub keep_valuations: bool,
}

impl ValuationInputs {
    /// Inputs with the default horizon, trial count, terminal growth and grid.
    pub fn new(
        base_values: BaseValues,
        growth: GrowthDistribution,
        discount_rate: DiscountRateSource,
        shares_outstanding: f64,
        cash: f64,
        total_debt: f64,
    ) -> Self {
        Self {
            base_values,
            growth,
            discount_rate,
            shares_outstanding,
            cash,
            total_debt,
            years: DEFAULT_YEARS,
            simulations: DEFAULT_SIMULATIONS,
            terminal_growth: DEFAULT_TERMINAL_GROWTH,
            seed: DEFAULT_SEED,
            compounding: CompoundingPolicy::default(),
            sensitivity: SensitivityAxes::default(),
            keep_valuations: false,
        }
    }
}

/// Columns of a projected year: the raw items followed by the derived ones.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StatementField {
    Item(LineItem),
    OperatingIncome,
    Ebitda,
    DeltaWorkingCapital,
    OperatingCashFlow,
    FreeCashFlow,
}

impl StatementField {
    pub const COUNT: usize = LineItem::COUNT + 5;

    pub const ALL: [StatementField; StatementField::COUNT] = [
        StatementField::Item(LineItem::Revenue),
        StatementField::Item(LineItem::Cogs),
        StatementField::Item(LineItem::Opex),
        StatementField::Item(LineItem::DepreciationAmortization),
        StatementField::Item(LineItem::DeltaReceivables),
        StatementField::Item(LineItem::DeltaInventory),
        StatementField::Item(LineItem::DeltaPayables),
        StatementField::Item(LineItem::CapEx),
        StatementField::OperatingIncome,
        StatementField::Ebitda,
        StatementField::DeltaWorkingCapital,
        StatementField::OperatingCashFlow,
        StatementField::FreeCashFlow,
    ];

    pub(crate) fn slot(self) -> usize {
        match self {
            StatementField::Item(item) => item.slot(),
            StatementField::OperatingIncome => LineItem::COUNT,
            StatementField::Ebitda => LineItem::COUNT + 1,
            StatementField::DeltaWorkingCapital => LineItem::COUNT + 2,
            StatementField::OperatingCashFlow => LineItem::COUNT + 3,
            StatementField::FreeCashFlow => LineItem::COUNT + 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatementField::Item(item) => item.label(),
            StatementField::OperatingIncome => "Operating Income",
            StatementField::Ebitda => "EBITDA",
            StatementField::DeltaWorkingCapital => "ΔWC",
            StatementField::OperatingCashFlow => "Operating CF",
            StatementField::FreeCashFlow => "FCF",
        }
    }
}

/// One projected year of the statement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementValues {
    pub revenue: f64,
    pub cogs: f64,
    pub opex: f64,
    pub depreciation_amortization: f64,
    pub delta_receivables: f64,
    pub delta_inventory: f64,
    pub delta_payables: f64,
    pub capex: f64,
    pub operating_income: f64,
    pub ebitda: f64,
    pub delta_working_capital: f64,
    pub operating_cash_flow: f64,
    pub free_cash_flow: f64,
}

impl StatementValues {
    /// Fills the raw items and derives the cash-flow chain from them.
    pub fn derive(raw: &LineItemTable<f64>) -> Self {
        let operating_income =
            raw[LineItem::Revenue] - raw[LineItem::Cogs] - raw[LineItem::Opex];
        let ebitda = operating_income + raw[LineItem::DepreciationAmortization];
        let delta_working_capital = raw[LineItem::DeltaReceivables]
            + raw[LineItem::DeltaInventory]
            - raw[LineItem::DeltaPayables];
        let operating_cash_flow = ebitda - delta_working_capital;
        let free_cash_flow = operating_cash_flow - raw[LineItem::CapEx];

        Self {
            revenue: raw[LineItem::Revenue],
            cogs: raw[LineItem::Cogs],
            opex: raw[LineItem::Opex],
            depreciation_amortization: raw[LineItem::DepreciationAmortization],
            delta_receivables: raw[LineItem::DeltaReceivables],
            delta_inventory: raw[LineItem::DeltaInventory],
            delta_payables: raw[LineItem::DeltaPayables],
            capex: raw[LineItem::CapEx],
            operating_income,
            ebitda,
            delta_working_capital,
            operating_cash_flow,
            free_cash_flow,
        }
    }

    pub fn get(&self, field: StatementField) -> f64 {
        match field {
            StatementField::Item(LineItem::Revenue) => self.revenue,
            StatementField::Item(LineItem::Cogs) => self.cogs,
            StatementField::Item(LineItem::Opex) => self.opex,
            StatementField::Item(LineItem::DepreciationAmortization) => {
                self.depreciation_amortization
            }
            StatementField::Item(LineItem::DeltaReceivables) => self.delta_receivables,
            StatementField::Item(LineItem::DeltaInventory) => self.delta_inventory,
            StatementField::Item(LineItem::DeltaPayables) => self.delta_payables,
            StatementField::Item(LineItem::CapEx) => self.capex,
            StatementField::OperatingIncome => self.operating_income,
            StatementField::Ebitda => self.ebitda,
            StatementField::DeltaWorkingCapital => self.delta_working_capital,
            StatementField::OperatingCashFlow => self.operating_cash_flow,
            StatementField::FreeCashFlow => self.free_cash_flow,
        }
    }

    /// Builds a record column by column, e.g. from per-field statistics.
    pub fn from_fields(mut f: impl FnMut(StatementField) -> f64) -> Self {
        Self {
            revenue: f(StatementField::Item(LineItem::Revenue)),
            cogs: f(StatementField::Item(LineItem::Cogs)),
            opex: f(StatementField::Item(LineItem::Opex)),
            depreciation_amortization: f(StatementField::Item(
                LineItem::DepreciationAmortization,
            )),
            delta_receivables: f(StatementField::Item(LineItem::DeltaReceivables)),
            delta_inventory: f(StatementField::Item(LineItem::DeltaInventory)),
            delta_payables: f(StatementField::Item(LineItem::DeltaPayables)),
            capex: f(StatementField::Item(LineItem::CapEx)),
            operating_income: f(StatementField::OperatingIncome),
            ebitda: f(StatementField::Ebitda),
            delta_working_capital: f(StatementField::DeltaWorkingCapital),
            operating_cash_flow: f(StatementField::OperatingCashFlow),
            free_cash_flow: f(StatementField::FreeCashFlow),
        }
    }
}

/// One simulated path and its discounted enterprise value.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub years: Vec<StatementValues>,
    pub valuation: f64,
}

impl Trial {
    pub fn free_cash_flows(&self) -> Vec<f64> {
        self.years.iter().map(|y| y.free_cash_flow).collect()
    }
}

/// The statistic a scenario band reports.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BandStatistic {
    Percentile(f64),
    Mean,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Bearish,
    Neutral,
    Bullish,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Bearish, Scenario::Neutral, Scenario::Bullish];

    pub fn statistic(self) -> BandStatistic {
        match self {
            Scenario::Bearish => BandStatistic::Percentile(20.0),
            Scenario::Neutral => BandStatistic::Mean,
            Scenario::Bullish => BandStatistic::Percentile(80.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Scenario::Bearish => "Bearish (P20)",
            Scenario::Neutral => "Neutral (Mean)",
            Scenario::Bullish => "Bullish (P80)",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub scenario: Scenario,
    pub enterprise_value: f64,
    pub equity_value: f64,
    pub value_per_share: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlySummary {
    pub year: u32,
    pub scenario: Scenario,
    pub values: StatementValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FcfProjection {
    pub year: u32,
    pub bearish: f64,
    pub neutral: f64,
    pub bullish: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationStatistics {
    pub valid_trials: u32,
    pub discarded_trials: u32,
    pub mean: f64,
    pub std_dev: f64,
    pub standard_error: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationReport {
    pub discount_rate: f64,
    pub wacc_breakdown: Option<WaccBreakdown>,
    pub terminal_growth: f64,
    pub years: u32,
    pub simulations: u32,
    pub seed: u64,
    pub compounding: CompoundingPolicy,
    pub base_values: BaseValues,
    pub scenarios: Vec<ScenarioSummary>,
    pub yearly: Vec<YearlySummary>,
    pub fcf_projection: Vec<FcfProjection>,
    pub statistics: ValuationStatistics,
    pub sensitivity: SensitivityGrid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valuations: Option<Vec<f64>>,
}

impl ValuationReport {
    pub fn scenario(&self, scenario: Scenario) -> Option<&ScenarioSummary> {
        self.scenarios.iter().find(|s| s.scenario == scenario)
    }
}
