use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{anniversary_growth, DealModule};
use crate::context::{keys, DealContext};
use crate::deal::DealInput;
use crate::engine::EngineConfig;
use crate::error::ValidationIssue;
use crate::series::Series;
use crate::types::{to_f64, Money, Rate};
use crate::UnderwritingResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Taxes,
    Insurance,
    Cam,
    Utilities,
    Admin,
    Reserves,
    Custom,
}

impl ExpenseCategory {
    /// Context key of the per-category expense series.
    pub fn key(self) -> &'static str {
        match self {
            ExpenseCategory::Taxes => "opex_taxes",
            ExpenseCategory::Insurance => "opex_insurance",
            ExpenseCategory::Cam => "opex_cam",
            ExpenseCategory::Utilities => "opex_utilities",
            ExpenseCategory::Admin => "opex_admin",
            ExpenseCategory::Reserves => "opex_reserves",
            ExpenseCategory::Custom => "opex_custom",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseBasis {
    /// Fixed annual amount
    #[default]
    Annual,
    /// Annual amount per unit of rentable area
    PerArea,
    /// Fraction of the month's effective gross income
    PercentOfEgi,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseLine {
    pub name: String,
    pub category: ExpenseCategory,
    pub amount: Decimal,
    #[serde(default)]
    pub basis: ExpenseBasis,
    /// Annual growth stepped on each anniversary of the analysis start
    #[serde(default)]
    pub growth_rate: Rate,
    /// Whether the line participates in tenant recoveries
    #[serde(default = "default_true")]
    pub recoverable: bool,
}

/// Share of recoverable expenses billed back to tenants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseType {
    /// Full pass-through
    #[serde(alias = "NNN")]
    Nnn,
    /// Half pass-through
    ModifiedGross,
    /// No pass-through
    #[default]
    Gross,
}

impl LeaseType {
    pub fn recovery_share(self) -> f64 {
        match self {
            LeaseType::Nnn => 1.0,
            LeaseType::ModifiedGross => 0.5,
            LeaseType::Gross => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    #[serde(default)]
    pub lease_type: LeaseType,
    /// Administrative markup on recovered amounts
    #[serde(default)]
    pub admin_fee: Rate,
    /// Maximum annual growth of recovered CAM over the first year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam_cap: Option<Rate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherIncome {
    pub name: String,
    pub annual_amount: Money,
    #[serde(default)]
    pub growth_rate: Rate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatingInput {
    /// Applied to scheduled revenue
    #[serde(default)]
    pub vacancy_rate: Rate,
    /// Applied to revenue after vacancy
    #[serde(default)]
    pub credit_loss_rate: Rate,
    #[serde(default)]
    pub expenses: Vec<ExpenseLine>,
    #[serde(default)]
    pub recoveries: RecoveryPolicy,
    #[serde(default)]
    pub other_income: Vec<OtherIncome>,
}

#[derive(Debug, Clone)]
pub struct OperatingProjection {
    pub other_income: Series,
    pub vacancy_loss: Series,
    pub credit_loss: Series,
    pub effective_gross_income: Series,
    pub operating_expenses: Series,
    pub expense_recoveries: Series,
    pub noi: Series,
    pub by_category: BTreeMap<ExpenseCategory, Series>,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

fn grown_monthly(annual: f64, growth: f64, months: usize) -> Vec<f64> {
    (0..months)
        .map(|t| annual / 12.0 * anniversary_growth(growth, t))
        .collect()
}

/// Limit each month's recovered CAM to the same month of year one grown at
/// the cap rate.
fn apply_cam_cap(recovered: &[f64], cap: f64) -> Vec<f64> {
    recovered
        .iter()
        .enumerate()
        .map(|(t, v)| {
            if t < 12 {
                *v
            } else {
                v.min(recovered[t % 12] * anniversary_growth(cap, t))
            }
        })
        .collect()
}

/// Revenue build-up, expenses and recoveries down to NOI.
pub fn project_operating(
    input: &OperatingInput,
    gross_potential_rent: &Series,
    free_rent: &Series,
    rentable_area: f64,
) -> UnderwritingResult<OperatingProjection> {
    let months = gross_potential_rent.len();

    let mut other = vec![0.0; months];
    for line in &input.other_income {
        let monthly = grown_monthly(to_f64(line.annual_amount), to_f64(line.growth_rate), months);
        for (acc, v) in other.iter_mut().zip(monthly) {
            *acc += v;
        }
    }
    let other_income = Series::new(other)?;

    let scheduled = gross_potential_rent.subtract(free_rent)?.add(&other_income)?;
    let vacancy_loss = scheduled.multiply(to_f64(input.vacancy_rate))?;
    let after_vacancy = scheduled.subtract(&vacancy_loss)?;
    let credit_loss = after_vacancy.multiply(to_f64(input.credit_loss_rate))?;
    let egi = after_vacancy.subtract(&credit_loss)?;

    let share = input.recoveries.lease_type.recovery_share();
    let mut total = vec![0.0; months];
    let mut recoverable_cam = vec![0.0; months];
    let mut recoverable_other = vec![0.0; months];
    let mut by_category: BTreeMap<ExpenseCategory, Vec<f64>> = BTreeMap::new();

    for line in &input.expenses {
        let amount = to_f64(line.amount);
        let growth = to_f64(line.growth_rate);
        let monthly = match line.basis {
            ExpenseBasis::Annual => grown_monthly(amount, growth, months),
            ExpenseBasis::PerArea => grown_monthly(amount * rentable_area, growth, months),
            ExpenseBasis::PercentOfEgi => egi.values().iter().map(|v| v * amount).collect(),
        };
        let category = by_category
            .entry(line.category)
            .or_insert_with(|| vec![0.0; months]);
        for t in 0..months {
            total[t] += monthly[t];
            category[t] += monthly[t];
            if line.recoverable {
                if line.category == ExpenseCategory::Cam {
                    recoverable_cam[t] += monthly[t] * share;
                } else {
                    recoverable_other[t] += monthly[t] * share;
                }
            }
        }
    }

    if let Some(cap) = input.recoveries.cam_cap {
        recoverable_cam = apply_cam_cap(&recoverable_cam, to_f64(cap));
    }
    let admin = 1.0 + to_f64(input.recoveries.admin_fee);
    let recoveries = Series::new(
        recoverable_cam
            .iter()
            .zip(&recoverable_other)
            .map(|(cam, other)| (cam + other) * admin)
            .collect(),
    )?;

    let operating_expenses = Series::new(total)?;
    let noi = egi.subtract(&operating_expenses)?.add(&recoveries)?;
    let by_category = by_category
        .into_iter()
        .map(|(k, v)| Ok((k, Series::new(v)?)))
        .collect::<UnderwritingResult<_>>()?;

    Ok(OperatingProjection {
        other_income,
        vacancy_loss,
        credit_loss,
        effective_gross_income: egi,
        operating_expenses,
        expense_recoveries: recoveries,
        noi,
        by_category,
    })
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

fn check_fraction(value: Decimal, path: &str, label: &str, issues: &mut Vec<ValidationIssue>) {
    if value < Decimal::ZERO || value > Decimal::ONE {
        issues.push(ValidationIssue::new(
            path,
            format!("{label} must be in [0, 1]"),
        ));
    }
}

pub struct OperatingModule;

impl DealModule for OperatingModule {
    fn name(&self) -> &'static str {
        "operating"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::GROSS_POTENTIAL_RENT, keys::FREE_RENT]
    }

    fn validate(
        &self,
        input: &DealInput,
        _config: &EngineConfig,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let op = &input.modules.operating;
        check_fraction(
            op.vacancy_rate,
            "modules.operating.vacancy_rate",
            "Vacancy rate",
            issues,
        );
        check_fraction(
            op.credit_loss_rate,
            "modules.operating.credit_loss_rate",
            "Credit loss rate",
            issues,
        );
        for (i, line) in op.expenses.iter().enumerate() {
            let path = format!("modules.operating.expenses[{i}]");
            if line.amount < Decimal::ZERO {
                issues.push(ValidationIssue::new(
                    format!("{path}.amount"),
                    "Expense amount cannot be negative",
                ));
            }
            if line.basis == ExpenseBasis::PercentOfEgi && line.amount > Decimal::ONE {
                issues.push(ValidationIssue::new(
                    format!("{path}.amount"),
                    "Percent-of-EGI expense must be a decimal fraction (<= 1)",
                ));
            }
            if line.growth_rate <= -Decimal::ONE {
                issues.push(ValidationIssue::new(
                    format!("{path}.growth_rate"),
                    "Growth rate must be greater than -100%",
                ));
            }
        }
        for (i, line) in op.other_income.iter().enumerate() {
            if line.growth_rate <= -Decimal::ONE {
                issues.push(ValidationIssue::new(
                    format!("modules.operating.other_income[{i}].growth_rate"),
                    "Growth rate must be greater than -100%",
                ));
            }
        }
        if op.recoveries.admin_fee < Decimal::ZERO {
            issues.push(ValidationIssue::new(
                "modules.operating.recoveries.admin_fee",
                "Admin fee cannot be negative",
            ));
        }
        if op.recoveries.cam_cap.is_some_and(|c| c < Decimal::ZERO) {
            issues.push(ValidationIssue::new(
                "modules.operating.recoveries.cam_cap",
                "CAM cap cannot be negative",
            ));
        }
    }

    fn compute(
        &self,
        input: &DealInput,
        _config: &EngineConfig,
        ctx: &mut DealContext,
    ) -> UnderwritingResult<()> {
        let gpr = ctx.require_series(keys::GROSS_POTENTIAL_RENT, self.name())?;
        let free = ctx.require_series(keys::FREE_RENT, self.name())?;
        let p = project_operating(&input.modules.operating, gpr, free, input.rentable_area())?;

        let close = ctx.timeline().close_month() as usize;
        let egi_year1 = p.effective_gross_income.forward12(close)?;
        let opex_year1 = p.operating_expenses.forward12(close)?;
        if egi_year1 > 0.0 {
            ctx.set_metric("operating_expense_ratio", opex_year1 / egi_year1)?;
        }
        if p.noi.values().iter().any(|v| *v < 0.0) {
            ctx.warn("NOI is negative in at least one month");
        }

        let revenue = p.effective_gross_income.add(&p.expense_recoveries)?;
        ctx.set_series(keys::OTHER_INCOME, p.other_income)?;
        ctx.set_series(keys::VACANCY_LOSS, p.vacancy_loss)?;
        ctx.set_series(keys::CREDIT_LOSS, p.credit_loss)?;
        ctx.set_series(keys::EFFECTIVE_GROSS_INCOME, p.effective_gross_income)?;
        ctx.set_series(keys::EXPENSES, p.operating_expenses.clone())?;
        ctx.set_series(keys::OPERATING_EXPENSES, p.operating_expenses)?;
        ctx.set_series(keys::EXPENSE_RECOVERIES, p.expense_recoveries)?;
        ctx.set_series(keys::REVENUE, revenue)?;
        ctx.set_series(keys::NOI, p.noi)?;
        for (category, series) in p.by_category {
            ctx.set_series(category.key(), series)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn flat(months: usize, value: f64) -> Series {
        Series::constant(months, value).unwrap()
    }

    fn line(category: ExpenseCategory, amount: Decimal) -> ExpenseLine {
        ExpenseLine {
            name: format!("{category:?}"),
            category,
            amount,
            basis: ExpenseBasis::Annual,
            growth_rate: dec!(0),
            recoverable: true,
        }
    }

    #[test]
    fn test_vacancy_then_credit_loss() {
        let input = OperatingInput {
            vacancy_rate: dec!(0.10),
            credit_loss_rate: dec!(0.05),
            ..Default::default()
        };
        let p = project_operating(&input, &flat(12, 1000.0), &Series::zeros(12), 1.0).unwrap();
        // 1000 -> 900 after vacancy -> 855 after credit loss
        assert!((p.vacancy_loss.get(0).unwrap() - 100.0).abs() < 1e-9);
        assert!((p.credit_loss.get(0).unwrap() - 45.0).abs() < 1e-9);
        assert!((p.effective_gross_income.get(0).unwrap() - 855.0).abs() < 1e-9);
        assert!((p.noi.get(0).unwrap() - 855.0).abs() < 1e-9);
    }

    #[test]
    fn test_free_rent_and_other_income() {
        let input = OperatingInput {
            other_income: vec![OtherIncome {
                name: "Parking".into(),
                annual_amount: dec!(1200),
                growth_rate: dec!(0.10),
            }],
            ..Default::default()
        };
        let p = project_operating(&input, &flat(24, 1000.0), &flat(24, 1000.0), 1.0).unwrap();
        assert!((p.effective_gross_income.get(0).unwrap() - 100.0).abs() < 1e-9);
        assert!((p.effective_gross_income.get(12).unwrap() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_expense_growth_and_bases() {
        let mut per_area = line(ExpenseCategory::Utilities, dec!(2));
        per_area.basis = ExpenseBasis::PerArea;
        let mut mgmt = line(ExpenseCategory::Admin, dec!(0.03));
        mgmt.basis = ExpenseBasis::PercentOfEgi;
        let mut taxes = line(ExpenseCategory::Taxes, dec!(12000));
        taxes.growth_rate = dec!(0.05);
        let input = OperatingInput {
            expenses: vec![taxes, per_area, mgmt],
            ..Default::default()
        };
        let p = project_operating(&input, &flat(24, 10_000.0), &Series::zeros(24), 600.0).unwrap();
        let taxes = &p.by_category[&ExpenseCategory::Taxes];
        assert!((taxes.get(11).unwrap() - 1000.0).abs() < 1e-9);
        assert!((taxes.get(12).unwrap() - 1050.0).abs() < 1e-9);
        // 2 * 600 / 12 + 3% of 10,000 + taxes
        assert!((p.operating_expenses.get(0).unwrap() - (100.0 + 300.0 + 1000.0)).abs() < 1e-9);
        // Gross lease: nothing recovered
        assert_eq!(p.expense_recoveries.sum(), 0.0);
    }

    #[test]
    fn test_recovery_policies() {
        let mut excluded = line(ExpenseCategory::Reserves, dec!(1200));
        excluded.recoverable = false;
        let expenses = vec![line(ExpenseCategory::Taxes, dec!(12000)), excluded];
        let run = |lease_type, admin_fee| {
            let input = OperatingInput {
                expenses: expenses.clone(),
                recoveries: RecoveryPolicy {
                    lease_type,
                    admin_fee,
                    cam_cap: None,
                },
                ..Default::default()
            };
            project_operating(&input, &flat(12, 5000.0), &Series::zeros(12), 1.0)
                .unwrap()
                .expense_recoveries
                .get(0)
                .unwrap()
        };
        assert!((run(LeaseType::Nnn, dec!(0)) - 1000.0).abs() < 1e-9);
        assert!((run(LeaseType::ModifiedGross, dec!(0)) - 500.0).abs() < 1e-9);
        assert_eq!(run(LeaseType::Gross, dec!(0)), 0.0);
        assert!((run(LeaseType::Nnn, dec!(0.10)) - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn test_cam_cap_limits_recovery_growth() {
        let mut cam = line(ExpenseCategory::Cam, dec!(12000));
        cam.growth_rate = dec!(0.10);
        let input = OperatingInput {
            expenses: vec![cam],
            recoveries: RecoveryPolicy {
                lease_type: LeaseType::Nnn,
                admin_fee: dec!(0),
                cam_cap: Some(dec!(0.05)),
            },
            ..Default::default()
        };
        let p = project_operating(&input, &flat(24, 5000.0), &Series::zeros(24), 1.0).unwrap();
        assert!((p.operating_expenses.get(12).unwrap() - 1100.0).abs() < 1e-9);
        assert!((p.expense_recoveries.get(12).unwrap() - 1050.0).abs() < 1e-9);
        // NOI = 5000 - 1100 + 1050
        assert!((p.noi.get(12).unwrap() - 4950.0).abs() < 1e-9);
    }

    #[test]
    fn test_lease_type_accepts_upper_case_alias() {
        let lt: LeaseType = serde_json::from_str("\"NNN\"").unwrap();
        assert_eq!(lt, LeaseType::Nnn);
        let lt: LeaseType = serde_json::from_str("\"modified_gross\"").unwrap();
        assert_eq!(lt, LeaseType::ModifiedGross);
    }
}
