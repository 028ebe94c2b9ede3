//! Sensitivity grid over exit cap rate, exit month and interest rate.

use log::debug;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::debt::{build_loan_schedule, resolve_terms, LoanSeries};
use super::exit::{evaluate_exit, ExitParams};
use super::DealModule;
use crate::context::{keys, DealContext};
use crate::deal::DealInput;
use crate::engine::EngineConfig;
use crate::error::{UnderwritingError, ValidationIssue};
use crate::series::Series;
use crate::timeline::Timeline;
use crate::types::{to_f64, RangeSpec};
use crate::UnderwritingResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioInput {
    /// Defaults to the base exit cap rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_cap_rates: Option<RangeSpec>,
    /// Defaults to the base exit month
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_months: Option<RangeSpec>,
    /// Defaults to the base all-in coupon; ignored without debt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_rates: Option<RangeSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCell {
    pub exit_cap_rate: f64,
    pub exit_month: u32,
    /// `None` for an unlevered deal
    pub interest_rate: Option<f64>,
    pub unlevered_irr: Option<f64>,
    pub levered_irr: Option<f64>,
    pub equity_multiple: Option<f64>,
}

/// Cells in row-major order: cap rate, then exit month, then interest rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioGrid {
    pub exit_cap_rates: Vec<f64>,
    pub exit_months: Vec<u32>,
    pub interest_rates: Vec<f64>,
    pub cells: Vec<ScenarioCell>,
}

impl ScenarioGrid {
    pub fn cell(&self, cap: usize, month: usize, rate: usize) -> Option<&ScenarioCell> {
        if cap >= self.exit_cap_rates.len()
            || month >= self.exit_months.len()
            || rate >= self.interest_rates.len().max(1)
        {
            return None;
        }
        let rates = self.interest_rates.len().max(1);
        self.cells
            .get((cap * self.exit_months.len() + month) * rates + rate)
    }
}

struct Axes {
    caps: Vec<f64>,
    months: Vec<u32>,
    /// Empty for unlevered deals
    rates: Vec<f64>,
}

fn expand_axis(
    spec: Option<&RangeSpec>,
    base: Decimal,
    field: &str,
    max_points: usize,
) -> UnderwritingResult<Vec<Decimal>> {
    match spec {
        Some(spec) => spec.expand(field, max_points),
        None => Ok(vec![base]),
    }
}

fn whole_month(value: Decimal, field: &str) -> UnderwritingResult<u32> {
    if value.fract() != Decimal::ZERO || value < Decimal::ZERO {
        return Err(UnderwritingError::invalid(field, "Exit months must be whole numbers"));
    }
    value
        .to_u32()
        .ok_or_else(|| UnderwritingError::invalid(field, "Exit month out of range"))
}

/// Expand every axis, none longer than `max_cells` points.
fn axes(input: &DealInput, scenario: &ScenarioInput, max_cells: usize) -> UnderwritingResult<Axes> {
    let caps = expand_axis(
        scenario.exit_cap_rates.as_ref(),
        input.modules.exit.exit_cap_rate,
        "modules.scenario.exit_cap_rates",
        max_cells,
    )?;
    let months = expand_axis(
        scenario.exit_months.as_ref(),
        Decimal::from(input.exit_month()),
        "modules.scenario.exit_months",
        max_cells,
    )?;
    let rates = match &input.modules.debt {
        Some(debt) => expand_axis(
            scenario.interest_rates.as_ref(),
            debt.rate.all_in(),
            "modules.scenario.interest_rates",
            max_cells,
        )?,
        None => Vec::new(),
    };
    Ok(Axes {
        caps: caps.into_iter().map(to_f64).collect(),
        months: months
            .into_iter()
            .map(|m| whole_month(m, "modules.scenario.exit_months"))
            .collect::<UnderwritingResult<_>>()?,
        rates: rates.into_iter().map(to_f64).collect(),
    })
}

impl Axes {
    /// Grid size, rejected past `max_cells`.
    fn cell_count(&self, max_cells: usize) -> UnderwritingResult<usize> {
        let count = self
            .caps
            .len()
            .checked_mul(self.months.len())
            .and_then(|n| n.checked_mul(self.rates.len().max(1)))
            .filter(|n| *n <= max_cells)
            .ok_or_else(|| {
                UnderwritingError::invalid(
                    "modules.scenario",
                    format!(
                        "Scenario grid has {} x {} x {} cells; the limit is {max_cells}",
                        self.caps.len(),
                        self.months.len(),
                        self.rates.len().max(1)
                    ),
                )
            })?;
        Ok(count)
    }
}

/// Read-only inputs shared by every cell.
struct Shared<'a> {
    input: &'a DealInput,
    config: &'a EngineConfig,
    timeline: Timeline,
    noi: &'a Series,
    leasing_costs: &'a Series,
    base_loan: &'a LoanSeries,
    base_rate: Option<f64>,
    loan_amount: f64,
    loan_fees: f64,
}

#[derive(Clone, Copy)]
struct CellSpec {
    cap: f64,
    month: u32,
    rate: Option<f64>,
}

/// One cell plus the warnings raised while valuing it.
fn evaluate_cell(
    shared: &Shared<'_>,
    spec: CellSpec,
) -> UnderwritingResult<(ScenarioCell, Vec<String>)> {
    let timeline = shared.timeline.with_exit_month(spec.month)?;

    // Reuse the base schedule unless the coupon moves
    let rebuilt;
    let (loan, loan_amount, loan_fees) = match (&shared.input.modules.debt, spec.rate) {
        (Some(debt), Some(rate)) if Some(rate) != shared.base_rate => {
            let terms = resolve_terms(
                debt,
                shared.noi,
                timeline.close_month() as usize,
                shared.input.modules.acquisition.purchase_price(),
                Some(rate),
            )?;
            let schedule = build_loan_schedule(&terms, shared.noi, shared.config.no_debt_dscr)?;
            rebuilt = schedule.series()?;
            (&rebuilt, terms.principal, terms.origination_fee)
        }
        _ => (shared.base_loan, shared.loan_amount, shared.loan_fees),
    };

    let params = ExitParams {
        timeline: &timeline,
        noi: shared.noi,
        leasing_costs: shared.leasing_costs,
        debt_service_total: &loan.debt_service_total,
        loan_balloon: &loan.balloon,
        loan_balance: &loan.balance,
        loan_amount,
        loan_fees,
        total_cost: shared.input.modules.acquisition.total_cost(),
        exit_cap_rate: spec.cap,
        sale_cost_rate: to_f64(shared.input.modules.exit.sale_cost_rate),
        noi_basis: shared.input.modules.exit.noi_basis,
    };
    let mut warnings = Vec::new();
    let valuation = evaluate_exit(&params, shared.config, &mut warnings)?;
    let cell = ScenarioCell {
        exit_cap_rate: spec.cap,
        exit_month: spec.month,
        interest_rate: spec.rate,
        unlevered_irr: valuation.unlevered_irr,
        levered_irr: valuation.levered_irr,
        equity_multiple: valuation.equity_multiple,
    };
    Ok((cell, warnings))
}

type CellOutcome = UnderwritingResult<(ScenarioCell, Vec<String>)>;

fn run_cells(shared: &Shared<'_>, specs: &[CellSpec]) -> Vec<CellOutcome> {
    #[cfg(feature = "parallel")]
    {
        specs.par_iter().map(|s| evaluate_cell(shared, *s)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        specs.iter().map(|s| evaluate_cell(shared, *s)).collect()
    }
}

pub struct ScenarioModule;

impl DealModule for ScenarioModule {
    fn name(&self) -> &'static str {
        "scenario"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[
            keys::NOI,
            keys::LEASING_COSTS,
            keys::DEBT_SERVICE_TOTAL,
            keys::LOAN_BALANCE,
            keys::LOAN_AMOUNT,
        ]
    }

    fn is_configured(&self, input: &DealInput) -> bool {
        input.modules.scenario.is_some()
    }

    fn validate(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let Some(scenario) = &input.modules.scenario else {
            return;
        };
        let checked = axes(input, scenario, config.max_scenario_cells).and_then(|axes| {
            axes.cell_count(config.max_scenario_cells)?;
            Ok(axes)
        });
        let axes = match checked {
            Ok(axes) => axes,
            Err(UnderwritingError::InvalidInput { field, reason }) => {
                issues.push(ValidationIssue::new(field, reason));
                return;
            }
            Err(e) => {
                issues.push(ValidationIssue::new("modules.scenario", e.to_string()));
                return;
            }
        };
        if axes.caps.iter().any(|c| *c <= 0.0) {
            issues.push(ValidationIssue::new(
                "modules.scenario.exit_cap_rates",
                "Exit cap rates must be positive",
            ));
        }
        let hold = input.deal.hold_period_months;
        if axes
            .months
            .iter()
            .any(|m| *m <= input.deal.close_month || *m > hold)
        {
            issues.push(ValidationIssue::new(
                "modules.scenario.exit_months",
                format!("Exit months must be after the close month and at most {hold}"),
            ));
        }
        if axes.rates.iter().any(|r| *r < 0.0) {
            issues.push(ValidationIssue::new(
                "modules.scenario.interest_rates",
                "Interest rates cannot be negative",
            ));
        }
    }

    fn compute(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        ctx: &mut DealContext,
    ) -> UnderwritingResult<()> {
        let Some(scenario) = &input.modules.scenario else {
            return Ok(());
        };
        if input.modules.debt.is_none() && scenario.interest_rates.is_some() {
            ctx.warn("Interest-rate axis ignored: the deal has no debt");
        }
        let axes = axes(input, scenario, config.max_scenario_cells)?;
        let cell_count = axes.cell_count(config.max_scenario_cells)?;

        let rates: Vec<Option<f64>> = if axes.rates.is_empty() {
            vec![None]
        } else {
            axes.rates.iter().copied().map(Some).collect()
        };
        let mut specs = Vec::with_capacity(cell_count);
        for cap in &axes.caps {
            for month in &axes.months {
                for rate in &rates {
                    specs.push(CellSpec {
                        cap: *cap,
                        month: *month,
                        rate: *rate,
                    });
                }
            }
        }

        let base_loan = LoanSeries {
            interest: ctx.require_series(keys::LOAN_INTEREST, self.name())?.clone(),
            principal: ctx.require_series(keys::LOAN_PRINCIPAL, self.name())?.clone(),
            sweep: ctx.require_series(keys::LOAN_SWEEP, self.name())?.clone(),
            balloon: ctx.require_series(keys::LOAN_BALLOON, self.name())?.clone(),
            balance: ctx.require_series(keys::LOAN_BALANCE, self.name())?.clone(),
            debt_service: ctx.require_series(keys::DEBT_SERVICE, self.name())?.clone(),
            debt_service_total: ctx.require_series(keys::DEBT_SERVICE_TOTAL, self.name())?.clone(),
            dscr: ctx.require_series(keys::DSCR, self.name())?.clone(),
        };
        debug!("scenario: evaluating {cell_count} cells");

        let results = {
            let shared = Shared {
                input,
                config,
                timeline: *ctx.timeline(),
                noi: ctx.require_series(keys::NOI, self.name())?,
                leasing_costs: ctx.require_series(keys::LEASING_COSTS, self.name())?,
                base_loan: &base_loan,
                base_rate: ctx.metric("loan_rate"),
                loan_amount: ctx.require_metric(keys::LOAN_AMOUNT, self.name())?,
                loan_fees: ctx.metric("loan_fees").unwrap_or(0.0),
            };
            run_cells(&shared, &specs)
        };

        let mut failed = 0;
        let mut unsolved = 0;
        let mut first_unsolved: Option<String> = None;
        let mut cells = Vec::with_capacity(cell_count);
        for (result, spec) in results.into_iter().zip(&specs) {
            match result {
                Ok((cell, warnings)) => {
                    if cell.unlevered_irr.is_none() || cell.levered_irr.is_none() {
                        unsolved += 1;
                        if first_unsolved.is_none() {
                            first_unsolved = warnings.into_iter().last();
                        }
                    }
                    cells.push(cell);
                }
                Err(e) => {
                    debug!("scenario cell failed: {e}");
                    failed += 1;
                    cells.push(ScenarioCell {
                        exit_cap_rate: spec.cap,
                        exit_month: spec.month,
                        interest_rate: spec.rate,
                        unlevered_irr: None,
                        levered_irr: None,
                        equity_multiple: None,
                    });
                }
            }
        }
        if failed > 0 {
            ctx.warn(format!("{failed} of {cell_count} scenario cell(s) could not be evaluated"));
        }
        if unsolved > 0 {
            let detail = first_unsolved.map(|w| format!(" (first: {w})")).unwrap_or_default();
            ctx.warn(format!(
                "{unsolved} of {cell_count} scenario cell(s) had an IRR that could not be computed{detail}"
            ));
        }

        let levered: Vec<f64> = cells.iter().filter_map(|c| c.levered_irr).collect();
        if let Some(min) = levered.iter().copied().reduce(f64::min) {
            ctx.set_metric("scenario_levered_irr_min", min)?;
        }
        if let Some(max) = levered.iter().copied().reduce(f64::max) {
            ctx.set_metric("scenario_levered_irr_max", max)?;
        }
        ctx.set_metric("scenario_cell_count", cells.len() as f64)?;
        ctx.artifacts_mut().scenarios = Some(ScenarioGrid {
            exit_cap_rates: axes.caps,
            exit_months: axes.months,
            interest_rates: axes.rates,
            cells,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_whole_month_rejects_fractions() {
        assert_eq!(whole_month(dec!(48), "m").unwrap(), 48);
        assert_eq!(whole_month(dec!(48.0), "m").unwrap(), 48);
        assert!(whole_month(dec!(48.5), "m").is_err());
    }

    #[test]
    fn test_axes_default_to_base_case() {
        let mut deal = crate::modules::fixtures::office_deal();
        deal.modules.scenario = Some(ScenarioInput::default());
        let a = axes(&deal, deal.modules.scenario.as_ref().unwrap(), 100).unwrap();
        assert_eq!(a.caps.len(), 1);
        assert!((a.caps[0] - 0.075).abs() < 1e-12);
        assert_eq!(a.months, vec![60]);
        assert!((a.rates[0] - 0.06).abs() < 1e-12);

        deal.modules.debt = None;
        let a = axes(&deal, deal.modules.scenario.as_ref().unwrap(), 100).unwrap();
        assert!(a.rates.is_empty());
    }

    #[test]
    fn test_invalid_axes_reported() {
        let mut deal = crate::modules::fixtures::office_deal();
        deal.modules.scenario = Some(ScenarioInput {
            exit_cap_rates: None,
            exit_months: Some(RangeSpec::Values {
                values: vec![dec!(0), dec!(72)],
            }),
            interest_rates: None,
        });
        let mut issues = Vec::new();
        ScenarioModule.validate(&deal, &EngineConfig::default(), &mut issues);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "modules.scenario.exit_months");
    }

    #[test]
    fn test_oversized_grid_fails_validation() {
        let mut deal = crate::modules::fixtures::office_deal();
        deal.modules.scenario = Some(ScenarioInput {
            exit_cap_rates: Some(RangeSpec::Stepped {
                min: dec!(0.06),
                max: dec!(0.08),
                step: dec!(0.001),
            }),
            exit_months: Some(RangeSpec::Values {
                values: vec![dec!(48), dec!(60)],
            }),
            interest_rates: None,
        });
        let config = EngineConfig {
            max_scenario_cells: 40,
            ..EngineConfig::default()
        };
        let mut issues = Vec::new();
        ScenarioModule.validate(&deal, &config, &mut issues);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "modules.scenario");

        let mut issues = Vec::new();
        ScenarioModule.validate(&deal, &EngineConfig::default(), &mut issues);
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn test_unsolvable_cell_is_reported() {
        // At a 5000% cap the sale cannot repay the loan, so levered flows
        // never turn positive on balance
        let mut deal = crate::modules::fixtures::office_deal();
        deal.modules.scenario = Some(ScenarioInput {
            exit_cap_rates: Some(RangeSpec::Values {
                values: vec![dec!(0.075), dec!(50)],
            }),
            exit_months: None,
            interest_rates: None,
        });
        let result = crate::engine::Engine::default().run(&deal);
        assert!(result.success, "{:?}", result.errors);

        let ctx = result.context.unwrap();
        let grid = ctx.artifacts().scenarios.as_ref().unwrap();
        assert!(grid.cell(0, 0, 0).unwrap().levered_irr.is_some());
        assert!(grid.cell(1, 0, 0).unwrap().levered_irr.is_none());
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.starts_with("1 of 2 scenario cell(s) had an IRR that could not be computed")),
            "{:?}",
            result.warnings
        );
    }

    #[test]
    fn test_grid_indexing() {
        let cell = |cap, month| ScenarioCell {
            exit_cap_rate: cap,
            exit_month: month,
            interest_rate: None,
            unlevered_irr: None,
            levered_irr: None,
            equity_multiple: None,
        };
        let grid = ScenarioGrid {
            exit_cap_rates: vec![0.06, 0.07],
            exit_months: vec![36, 48, 60],
            interest_rates: vec![],
            cells: vec![
                cell(0.06, 36),
                cell(0.06, 48),
                cell(0.06, 60),
                cell(0.07, 36),
                cell(0.07, 48),
                cell(0.07, 60),
            ],
        };
        assert_eq!(grid.cell(1, 1, 0).unwrap().exit_month, 48);
        assert_eq!(grid.cell(1, 1, 0).unwrap().exit_cap_rate, 0.07);
        assert!(grid.cell(2, 0, 0).is_none());
    }
}
