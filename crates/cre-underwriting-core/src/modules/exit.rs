use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DealModule;
use crate::context::{keys, DealContext};
use crate::deal::DealInput;
use crate::engine::EngineConfig;
use crate::error::ValidationIssue;
use crate::series::Series;
use crate::time_value::{annualize, internal_rate_of_return_irregular_with, internal_rate_of_return_with};
use crate::timeline::Timeline;
use crate::types::{to_f64, Rate};
use crate::UnderwritingResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which 12 months of NOI are capitalized at exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiBasis {
    /// Forward when fully in sample, otherwise trailing
    #[default]
    Auto,
    Forward,
    Trailing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitInput {
    pub exit_cap_rate: Rate,
    /// Selling costs as a fraction of the gross sale price
    #[serde(default)]
    pub sale_cost_rate: Rate,
    #[serde(default)]
    pub noi_basis: NoiBasis,
    /// Annual rate for the unlevered NPV metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_rate: Option<Rate>,
}

/// Disposition value and the return vectors built around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitValuation {
    pub exit_month: u32,
    pub exit_noi: f64,
    /// Basis actually used, after any fallback
    pub noi_basis: NoiBasis,
    pub exit_cap_rate: f64,
    pub gross_sale_price: f64,
    pub sale_costs: f64,
    pub net_sale_proceeds: f64,
    pub loan_payoff: f64,
    pub total_cost: f64,
    pub total_equity: f64,
    /// Index 0 is the close; index j the end of the j-th held month
    pub unlevered_cash_flows: Vec<f64>,
    pub levered_cash_flows: Vec<f64>,
    pub cash_flow_dates: Vec<NaiveDate>,
    pub unlevered_irr: Option<f64>,
    pub levered_irr: Option<f64>,
    pub unlevered_xirr: Option<f64>,
    pub levered_xirr: Option<f64>,
    pub unlevered_equity_multiple: Option<f64>,
    pub equity_multiple: Option<f64>,
}

/// Everything [`evaluate_exit`] needs. Debt series are all zero for an
/// unlevered deal.
pub struct ExitParams<'a> {
    pub timeline: &'a Timeline,
    pub noi: &'a Series,
    pub leasing_costs: &'a Series,
    pub debt_service_total: &'a Series,
    pub loan_balloon: &'a Series,
    pub loan_balance: &'a Series,
    pub loan_amount: f64,
    pub loan_fees: f64,
    pub total_cost: f64,
    pub exit_cap_rate: f64,
    pub sale_cost_rate: f64,
    pub noi_basis: NoiBasis,
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

/// Annual NOI capitalized at `exit_month`, with the basis that supplied it.
pub fn exit_noi(
    noi: &Series,
    exit_month: usize,
    basis: NoiBasis,
    warnings: &mut Vec<String>,
) -> UnderwritingResult<(f64, NoiBasis)> {
    let forward = if exit_month + 12 <= noi.len() {
        Some((noi.forward12(exit_month)?, NoiBasis::Forward))
    } else {
        None
    };
    let trailing = if exit_month >= 12 {
        Some((noi.trailing12(exit_month - 1)?, NoiBasis::Trailing))
    } else {
        None
    };
    let picked = match basis {
        NoiBasis::Trailing => trailing.or(forward),
        NoiBasis::Forward | NoiBasis::Auto => forward.or(trailing),
    };

    match picked {
        Some((value, used)) => {
            if basis != NoiBasis::Auto && used != basis {
                warnings.push(format!(
                    "{basis:?} exit NOI is not fully in sample; using {used:?} NOI instead"
                ));
            }
            Ok((value, used))
        }
        None => {
            warnings.push(format!(
                "Fewer than 12 months of NOI before exit; annualizing {exit_month} month(s)"
            ));
            let partial = noi.sum_range(0, exit_month)?;
            Ok((partial * 12.0 / exit_month as f64, NoiBasis::Trailing))
        }
    }
}

fn equity_multiple(flows: &[f64]) -> Option<f64> {
    let contributed: f64 = flows.iter().filter(|v| **v < 0.0).map(|v| -v).sum();
    let distributed: f64 = flows.iter().filter(|v| **v > 0.0).sum();
    (contributed > 0.0).then(|| distributed / contributed)
}

fn solve_irr(
    label: &str,
    flows: &[f64],
    dates: &[NaiveDate],
    config: &EngineConfig,
    warnings: &mut Vec<String>,
) -> (Option<f64>, Option<f64>) {
    let irr = match internal_rate_of_return_with(flows, config.irr_guess, &config.solver) {
        Ok(monthly) => Some(annualize(monthly, 12)),
        Err(e) => {
            warnings.push(format!("{label} IRR could not be computed ({e}); reported as 0"));
            None
        }
    };
    let xirr_guess = irr.unwrap_or_else(|| annualize(config.irr_guess, 12));
    let xirr = internal_rate_of_return_irregular_with(flows, dates, xirr_guess, &config.solver).ok();
    (irr, xirr)
}

/// Sale proceeds, cash-flow vectors and returns for one exit assumption.
pub fn evaluate_exit(
    params: &ExitParams<'_>,
    config: &EngineConfig,
    warnings: &mut Vec<String>,
) -> UnderwritingResult<ExitValuation> {
    let close = params.timeline.close_month() as usize;
    let exit = params.timeline.exit_month() as usize;

    let (noi_at_exit, basis_used) = exit_noi(params.noi, exit, params.noi_basis, warnings)?;
    let gross_sale_price = noi_at_exit / params.exit_cap_rate;
    let sale_costs = gross_sale_price * params.sale_cost_rate;
    let net_sale_proceeds = gross_sale_price - sale_costs;
    let loan_payoff = params.loan_balance.get(exit - 1)?;
    let total_equity = params.total_cost + params.loan_fees - params.loan_amount;

    let held = exit - close;
    let mut unlevered = Vec::with_capacity(held + 1);
    let mut levered = Vec::with_capacity(held + 1);
    let mut dates = Vec::with_capacity(held + 1);
    unlevered.push(-params.total_cost);
    levered.push(-total_equity);
    dates.push(params.timeline.date_at(close)?);
    for month in close..exit {
        let operating = params.noi.get(month)? - params.leasing_costs.get(month)?;
        let debt = params.debt_service_total.get(month)? + params.loan_balloon.get(month)?;
        unlevered.push(operating);
        levered.push(operating - debt);
        dates.push(params.timeline.date_at(month + 1)?);
    }
    unlevered[held] += net_sale_proceeds;
    levered[held] += net_sale_proceeds - loan_payoff;

    let (unlevered_irr, unlevered_xirr) = solve_irr("Unlevered", &unlevered, &dates, config, warnings);
    let (levered_irr, levered_xirr) = solve_irr("Levered", &levered, &dates, config, warnings);

    Ok(ExitValuation {
        exit_month: exit as u32,
        exit_noi: noi_at_exit,
        noi_basis: basis_used,
        exit_cap_rate: params.exit_cap_rate,
        gross_sale_price,
        sale_costs,
        net_sale_proceeds,
        loan_payoff,
        total_cost: params.total_cost,
        total_equity,
        unlevered_equity_multiple: equity_multiple(&unlevered),
        equity_multiple: equity_multiple(&levered),
        unlevered_cash_flows: unlevered,
        levered_cash_flows: levered,
        cash_flow_dates: dates,
        unlevered_irr,
        levered_irr,
        unlevered_xirr,
        levered_xirr,
    })
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

pub struct ExitModule;

impl DealModule for ExitModule {
    fn name(&self) -> &'static str {
        "exit"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[
            keys::NOI,
            keys::LEASING_COSTS,
            keys::DEBT_SERVICE_TOTAL,
            keys::LOAN_BALLOON,
            keys::LOAN_BALANCE,
            keys::LOAN_AMOUNT,
        ]
    }

    fn validate(
        &self,
        input: &DealInput,
        _config: &EngineConfig,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let exit = &input.modules.exit;
        if exit.exit_cap_rate <= Decimal::ZERO || exit.exit_cap_rate > Decimal::ONE {
            issues.push(ValidationIssue::new(
                "modules.exit.exit_cap_rate",
                "Exit cap rate must be in (0, 1]",
            ));
        }
        if exit.sale_cost_rate < Decimal::ZERO || exit.sale_cost_rate >= Decimal::ONE {
            issues.push(ValidationIssue::new(
                "modules.exit.sale_cost_rate",
                "Sale cost rate must be in [0, 1)",
            ));
        }
        if exit.discount_rate.is_some_and(|r| r <= -Decimal::ONE) {
            issues.push(ValidationIssue::new(
                "modules.exit.discount_rate",
                "Discount rate must be greater than -100%",
            ));
        }
    }

    fn compute(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        ctx: &mut DealContext,
    ) -> UnderwritingResult<()> {
        let exit_input = &input.modules.exit;
        let timeline = *ctx.timeline();
        let mut warnings = Vec::new();

        let (valuation, cash_flow, levered_cash_flow) = {
            let noi = ctx.require_series(keys::NOI, self.name())?;
            let leasing_costs = ctx.require_series(keys::LEASING_COSTS, self.name())?;
            let debt_service_total = ctx.require_series(keys::DEBT_SERVICE_TOTAL, self.name())?;
            let loan_balloon = ctx.require_series(keys::LOAN_BALLOON, self.name())?;
            let params = ExitParams {
                timeline: &timeline,
                noi,
                leasing_costs,
                debt_service_total,
                loan_balloon,
                loan_balance: ctx.require_series(keys::LOAN_BALANCE, self.name())?,
                loan_amount: ctx.require_metric(keys::LOAN_AMOUNT, self.name())?,
                loan_fees: ctx.metric("loan_fees").unwrap_or(0.0),
                total_cost: input.modules.acquisition.total_cost(),
                exit_cap_rate: to_f64(exit_input.exit_cap_rate),
                sale_cost_rate: to_f64(exit_input.sale_cost_rate),
                noi_basis: exit_input.noi_basis,
            };
            let valuation = evaluate_exit(&params, config, &mut warnings)?;
            let cash_flow = noi.subtract(leasing_costs)?;
            let levered = cash_flow.subtract(debt_service_total)?.subtract(loan_balloon)?;
            (valuation, cash_flow, levered)
        };
        for warning in warnings {
            ctx.warn(warning);
        }
        if let Some(irr) = valuation.levered_irr.filter(|r| *r < 0.0) {
            ctx.warn(format!("Levered IRR is negative ({:.2}%)", irr * 100.0));
        }

        let held = valuation.levered_cash_flows.len() - 1;
        let first_year = held.min(12);
        let year1_levered: f64 = valuation.levered_cash_flows[1..=first_year].iter().sum();
        let year1_levered = if held <= 12 {
            // The final period carries sale proceeds
            year1_levered - (valuation.net_sale_proceeds - valuation.loan_payoff)
        } else {
            year1_levered
        };
        if valuation.total_equity > 0.0 {
            ctx.set_metric(
                "cash_on_cash_year1",
                year1_levered * 12.0 / first_year as f64 / valuation.total_equity,
            )?;
        }
        if let Some(rate) = exit_input.discount_rate {
            let flows = &valuation.unlevered_cash_flows;
            let pv = Series::new(flows[1..].to_vec())?.discount(to_f64(rate))?;
            ctx.set_metric("unlevered_npv", flows[0] + pv)?;
        }

        ctx.set_series(keys::CASH_FLOW, cash_flow)?;
        ctx.set_series(keys::LEVERED_CASH_FLOW, levered_cash_flow)?;
        ctx.set_metric(keys::UNLEVERED_IRR, valuation.unlevered_irr.unwrap_or(0.0))?;
        ctx.set_metric(keys::LEVERED_IRR, valuation.levered_irr.unwrap_or(0.0))?;
        if let Some(x) = valuation.unlevered_xirr {
            ctx.set_metric("unlevered_xirr", x)?;
        }
        if let Some(x) = valuation.levered_xirr {
            ctx.set_metric("levered_xirr", x)?;
        }
        ctx.set_metric(keys::EQUITY_MULTIPLE, valuation.equity_multiple.unwrap_or(0.0))?;
        ctx.set_metric(
            keys::UNLEVERED_EQUITY_MULTIPLE,
            valuation.unlevered_equity_multiple.unwrap_or(0.0),
        )?;
        ctx.set_metric(keys::EXIT_CAP_RATE, valuation.exit_cap_rate)?;
        ctx.set_metric("exit_noi", valuation.exit_noi)?;
        ctx.set_metric(keys::EXIT_VALUE, valuation.gross_sale_price)?;
        ctx.set_metric("net_sale_proceeds", valuation.net_sale_proceeds)?;
        ctx.set_metric("loan_payoff", valuation.loan_payoff)?;
        ctx.set_metric(keys::TOTAL_PROJECT_COST, valuation.total_cost)?;
        ctx.set_metric(keys::TOTAL_EQUITY, valuation.total_equity)?;
        ctx.artifacts_mut().exit = Some(valuation);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(hold: u32, exit: u32) -> Timeline {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        Timeline::new(start, hold, exit, 0).unwrap()
    }

    struct Flows {
        noi: Series,
        zeros: Series,
        balance: Series,
    }

    fn flows(months: usize, noi: f64, balance: f64) -> Flows {
        Flows {
            noi: Series::constant(months, noi).unwrap(),
            zeros: Series::zeros(months),
            balance: Series::constant(months, balance).unwrap(),
        }
    }

    fn params<'a>(tl: &'a Timeline, f: &'a Flows, loan: f64, cost: f64, cap: f64) -> ExitParams<'a> {
        ExitParams {
            timeline: tl,
            noi: &f.noi,
            leasing_costs: &f.zeros,
            debt_service_total: &f.zeros,
            loan_balloon: &f.zeros,
            loan_balance: &f.balance,
            loan_amount: loan,
            loan_fees: 0.0,
            total_cost: cost,
            exit_cap_rate: cap,
            sale_cost_rate: 0.0,
            noi_basis: NoiBasis::Auto,
        }
    }

    #[test]
    fn test_exit_noi_prefers_forward() {
        let s = Series::from_fn(36, |t| t as f64).unwrap();
        let mut w = Vec::new();
        let (v, basis) = exit_noi(&s, 12, NoiBasis::Auto, &mut w).unwrap();
        assert_eq!(basis, NoiBasis::Forward);
        assert_eq!(v, (12..24).sum::<usize>() as f64);
        let (v, basis) = exit_noi(&s, 30, NoiBasis::Auto, &mut w).unwrap();
        assert_eq!(basis, NoiBasis::Trailing);
        assert_eq!(v, (18..30).sum::<usize>() as f64);
        assert!(w.is_empty());
    }

    #[test]
    fn test_exit_noi_fallbacks_warn() {
        let s = Series::constant(6, 100.0).unwrap();
        let mut w = Vec::new();
        let (v, _) = exit_noi(&s, 6, NoiBasis::Auto, &mut w).unwrap();
        assert!((v - 1200.0).abs() < 1e-9);
        assert_eq!(w.len(), 1);

        let s = Series::constant(24, 100.0).unwrap();
        let mut w = Vec::new();
        let (_, basis) = exit_noi(&s, 24, NoiBasis::Forward, &mut w).unwrap();
        assert_eq!(basis, NoiBasis::Trailing);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_known_unlevered_return() {
        // -100, then 1 a month, sold for 12 / 0.12 = 100: a 1% monthly IRR
        let tl = timeline(12, 12);
        let f = flows(12, 1.0, 0.0);
        let mut w = Vec::new();
        let v = evaluate_exit(&params(&tl, &f, 0.0, 100.0, 0.12), &EngineConfig::default(), &mut w)
            .unwrap();
        assert_eq!(v.unlevered_cash_flows.len(), 13);
        assert!((v.unlevered_cash_flows[12] - 101.0).abs() < 1e-9);
        let expected = 1.01_f64.powi(12) - 1.0;
        assert!((v.unlevered_irr.unwrap() - expected).abs() < 1e-8);
        assert!((v.unlevered_equity_multiple.unwrap() - 1.12).abs() < 1e-9);
        assert!(v.unlevered_xirr.is_some());
        assert!(w.is_empty());
    }

    #[test]
    fn test_levered_vector_nets_loan() {
        let tl = timeline(24, 24);
        let f = flows(24, 1000.0, 60_000.0);
        let mut w = Vec::new();
        let v = evaluate_exit(&params(&tl, &f, 60_000.0, 100_000.0, 0.10), &EngineConfig::default(), &mut w)
            .unwrap();
        assert!((v.gross_sale_price - 120_000.0).abs() < 1e-6);
        assert_eq!(v.levered_cash_flows[0], -40_000.0);
        assert!((v.levered_cash_flows[24] - (1000.0 + 120_000.0 - 60_000.0)).abs() < 1e-6);
        assert_eq!(v.loan_payoff, 60_000.0);
        assert!(v.levered_irr.unwrap() > v.unlevered_irr.unwrap());
    }

    #[test]
    fn test_undefined_irr_warns() {
        // Loan exceeds cost: no equity is ever contributed
        let tl = timeline(12, 12);
        let f = flows(12, 1000.0, 0.0);
        let mut w = Vec::new();
        let v = evaluate_exit(&params(&tl, &f, 200_000.0, 100_000.0, 0.10), &EngineConfig::default(), &mut w)
            .unwrap();
        assert!(v.levered_irr.is_none());
        assert!(v.equity_multiple.is_none());
        assert!(w.iter().any(|m| m.contains("Levered IRR")));
    }

    #[test]
    fn test_negative_levered_irr_warns() {
        // All cash at a 100% cap: five years of NOI plus one more as the
        // sale price falls short of the purchase
        let mut deal = crate::modules::fixtures::office_deal();
        deal.modules.debt = None;
        deal.modules.exit.exit_cap_rate = Decimal::ONE;
        let result = crate::engine::run_deal(&deal);
        assert!(result.success, "{:?}", result.errors);

        let irr = result.context.unwrap().metric(keys::LEVERED_IRR).unwrap();
        assert!(irr < 0.0, "levered IRR {irr}");
        assert!(
            result.warnings.iter().any(|w| w.starts_with("Levered IRR is negative")),
            "{:?}",
            result.warnings
        );

        let healthy = crate::engine::run_deal(&crate::modules::fixtures::office_deal());
        assert!(!healthy.warnings.iter().any(|w| w.contains("is negative")));
    }
}
