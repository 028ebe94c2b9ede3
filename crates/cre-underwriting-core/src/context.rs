//! Per-run accumulator threaded through the module pipeline.

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;

use crate::error::UnderwritingError;
use crate::modules::debt::LoanSchedule;
use crate::modules::exit::ExitValuation;
use crate::modules::lease::LeaseSummary;
use crate::modules::scenario::ScenarioGrid;
use crate::modules::waterfall::WaterfallSplit;
use crate::series::Series;
use crate::timeline::Timeline;
use crate::UnderwritingResult;

/// Names of the context entries modules publish and consume.
pub mod keys {
    // Lease
    pub const GROSS_POTENTIAL_RENT: &str = "gross_potential_rent";
    pub const FREE_RENT: &str = "free_rent";
    pub const LEASING_COSTS: &str = "leasing_costs";
    pub const ROLLOVER_COSTS: &str = "rollover_costs";
    pub const OCCUPIED_AREA: &str = "occupied_area";
    pub const OCCUPANCY: &str = "occupancy";

    // Operating
    pub const OTHER_INCOME: &str = "other_income";
    pub const VACANCY_LOSS: &str = "vacancy_loss";
    pub const CREDIT_LOSS: &str = "credit_loss";
    pub const EFFECTIVE_GROSS_INCOME: &str = "effective_gross_income";
    pub const OPERATING_EXPENSES: &str = "operating_expenses";
    pub const EXPENSE_RECOVERIES: &str = "expense_recoveries";
    pub const REVENUE: &str = "revenue";
    pub const EXPENSES: &str = "expenses";
    pub const NOI: &str = "noi";

    // Debt
    pub const LOAN_INTEREST: &str = "loan_interest";
    pub const LOAN_PRINCIPAL: &str = "loan_principal";
    pub const LOAN_SWEEP: &str = "loan_sweep";
    pub const LOAN_BALLOON: &str = "loan_balloon";
    pub const LOAN_BALANCE: &str = "loan_balance";
    pub const DEBT_SERVICE: &str = "debt_service";
    pub const DEBT_SERVICE_TOTAL: &str = "debt_service_total";
    pub const DSCR: &str = "dscr";
    pub const LOAN_AMOUNT: &str = "loan_amount";
    pub const AVERAGE_DSCR: &str = "average_dscr";
    pub const MIN_DSCR: &str = "min_dscr";

    // Exit
    pub const CASH_FLOW: &str = "cash_flow";
    pub const LEVERED_CASH_FLOW: &str = "levered_cash_flow";
    pub const UNLEVERED_IRR: &str = "unlevered_irr";
    pub const LEVERED_IRR: &str = "levered_irr";
    pub const EQUITY_MULTIPLE: &str = "equity_multiple";
    pub const EXIT_CAP_RATE: &str = "exit_cap_rate";
    pub const UNLEVERED_EQUITY_MULTIPLE: &str = "unlevered_equity_multiple";
    pub const EXIT_VALUE: &str = "exit_value";
    pub const TOTAL_PROJECT_COST: &str = "total_project_cost";
    pub const TOTAL_EQUITY: &str = "total_equity";

    // Waterfall
    pub const LP_CASH_FLOW: &str = "lp_cash_flow";
    pub const GP_CASH_FLOW: &str = "gp_cash_flow";

    // Summary
    pub const NOI_YEAR1: &str = "noi_year1";
    pub const GOING_IN_CAP_RATE: &str = "going_in_cap_rate";
}

/// Structured module outputs that are not monthly series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Artifacts {
    pub rent_roll: Vec<LeaseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan: Option<LoanSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitValuation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waterfall: Option<WaterfallSplit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenarios: Option<ScenarioGrid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DealContext {
    timeline: Timeline,
    series: BTreeMap<String, Series>,
    metrics: BTreeMap<String, f64>,
    artifacts: Artifacts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

impl DealContext {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            series: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Artifacts::default(),
            warnings: Vec::new(),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Length every series in this context must have.
    pub fn months(&self) -> usize {
        self.timeline.len()
    }

    /// A zero series of the deal's length.
    pub fn zeros(&self) -> Series {
        Series::zeros(self.months())
    }

    pub fn set_series(&mut self, name: &str, series: Series) -> UnderwritingResult<()> {
        if series.len() != self.months() {
            return Err(UnderwritingError::ShapeMismatch {
                expected: self.months(),
                actual: series.len(),
            });
        }
        self.series.insert(name.to_string(), series);
        Ok(())
    }

    pub fn series(&self, name: &str) -> Option<&Series> {
        self.series.get(name)
    }

    /// Fetch an upstream series, failing with a sequencing error naming the
    /// consuming module when it is absent.
    pub fn require_series(&self, name: &str, module: &str) -> UnderwritingResult<&Series> {
        self.series.get(name).ok_or_else(|| UnderwritingError::Sequencing {
            module: module.to_string(),
            missing: name.to_string(),
        })
    }

    pub fn set_metric(&mut self, name: &str, value: f64) -> UnderwritingResult<()> {
        if !value.is_finite() {
            return Err(UnderwritingError::NonFiniteValue {
                context: format!("metric {name}"),
                index: 0,
            });
        }
        self.metrics.insert(name.to_string(), value);
        Ok(())
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn require_metric(&self, name: &str, module: &str) -> UnderwritingResult<f64> {
        self.metric(name).ok_or_else(|| UnderwritingError::Sequencing {
            module: module.to_string(),
            missing: name.to_string(),
        })
    }

    /// True when a series or metric of this name has been published.
    pub fn contains(&self, name: &str) -> bool {
        self.series.contains_key(name) || self.metrics.contains_key(name)
    }

    pub fn all_series(&self) -> &BTreeMap<String, Series> {
        &self.series
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> &mut Artifacts {
        &mut self.artifacts
    }

    /// Append a non-fatal warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ctx() -> DealContext {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        DealContext::new(Timeline::new(start, 24, 24, 0).unwrap())
    }

    #[test]
    fn test_series_length_enforced() {
        let mut c = ctx();
        assert!(c.set_series("noi", Series::zeros(12)).is_err());
        c.set_series("noi", Series::zeros(24)).unwrap();
        assert!(c.contains("noi"));
    }

    #[test]
    fn test_missing_entry_is_sequencing_error() {
        let c = ctx();
        let err = c.require_series(keys::NOI, "debt").unwrap_err();
        assert_eq!(err.to_string(), "noi must be computed before debt");
        assert!(c.require_metric(keys::LOAN_AMOUNT, "exit").is_err());
    }

    #[test]
    fn test_metrics_must_be_finite() {
        let mut c = ctx();
        assert!(c.set_metric("x", f64::INFINITY).is_err());
        c.set_metric("x", 1.5).unwrap();
        assert_eq!(c.metric("x"), Some(1.5));
    }

    #[test]
    fn test_warnings_accumulate() {
        let mut c = ctx();
        c.warn("first");
        c.warn(String::from("second"));
        assert_eq!(c.warnings(), &["first".to_string(), "second".to_string()]);
    }
}
