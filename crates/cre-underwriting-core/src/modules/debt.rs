use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::DealModule;
use crate::context::{keys, DealContext};
use crate::deal::DealInput;
use crate::engine::EngineConfig;
use crate::error::{UnderwritingError, ValidationIssue};
use crate::series::Series;
use crate::time_value::{annuity_payment, present_value_of_annuity_payment};
use crate::types::{to_f64, Money, Rate};
use crate::UnderwritingResult;

/// DSCR reported for months with no debt service.
pub const NO_DEBT_DSCR: f64 = 999.0;

/// Balances below this are treated as fully repaid.
const BALANCE_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How the loan principal is determined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LoanSizing {
    Explicit {
        amount: Money,
    },
    /// Fraction of the purchase price
    Ltv { ltv: Rate },
    /// Largest loan whose level payment keeps forward DSCR at `min_dscr`
    Dscr {
        min_dscr: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_ltv: Option<Rate>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterestRate {
    Fixed {
        rate: Rate,
    },
    Floating {
        index_rate: Rate,
        spread: Rate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        floor: Option<Rate>,
    },
}

impl InterestRate {
    /// Annual all-in coupon.
    pub fn all_in(&self) -> Decimal {
        match self {
            InterestRate::Fixed { rate } => *rate,
            InterestRate::Floating {
                index_rate,
                spread,
                floor,
            } => {
                let floating = index_rate + spread;
                floor.map_or(floating, |f| floating.max(f))
            }
        }
    }
}

fn default_sweep_share() -> Rate {
    dec!(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Covenants {
    /// Months with forward DSCR below this are reported as breaches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_dscr: Option<Decimal>,
    /// Forward DSCR below this diverts excess cash to principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_sweep_dscr: Option<Decimal>,
    /// Fraction of excess cash swept
    #[serde(default = "default_sweep_share")]
    pub sweep_share: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtInput {
    pub sizing: LoanSizing,
    pub rate: InterestRate,
    /// Amortization period after any interest-only window; 0 means
    /// interest-only for the whole term
    #[serde(default)]
    pub amortization_months: u32,
    #[serde(default)]
    pub interest_only_months: u32,
    pub term_months: u32,
    /// Upfront fee as a fraction of principal, paid by equity at funding
    #[serde(default)]
    pub origination_fee_rate: Rate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covenants: Option<Covenants>,
}

/// Loan terms after sizing, in floating point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: f64,
    pub annual_rate: f64,
    pub amortization_months: u32,
    pub interest_only_months: u32,
    pub term_months: u32,
    pub funding_month: usize,
    pub origination_fee: f64,
    pub min_dscr: Option<f64>,
    pub sweep_dscr: Option<f64>,
    pub sweep_share: f64,
}

impl LoanTerms {
    fn amortizes(&self) -> bool {
        self.amortization_months > 0 && self.interest_only_months < self.term_months
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanPeriod {
    pub month: usize,
    pub opening_balance: f64,
    pub interest: f64,
    /// Scheduled amortization
    pub principal: f64,
    /// Cash-sweep prepayment
    pub sweep: f64,
    /// Balance repaid at maturity
    pub balloon: f64,
    pub ending_balance: f64,
    /// Interest plus scheduled principal
    pub debt_service: f64,
    /// Debt service plus sweep
    pub debt_service_total: f64,
    pub dscr: f64,
}

impl LoanPeriod {
    fn idle(month: usize, dscr: f64) -> Self {
        Self {
            month,
            opening_balance: 0.0,
            interest: 0.0,
            principal: 0.0,
            sweep: 0.0,
            balloon: 0.0,
            ending_balance: 0.0,
            debt_service: 0.0,
            debt_service_total: 0.0,
            dscr,
        }
    }
}

/// Month-by-month amortization over the hold period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanSchedule {
    pub terms: LoanTerms,
    /// Level payment once amortization begins; 0 for interest-only loans
    pub monthly_payment: f64,
    pub periods: Vec<LoanPeriod>,
    pub breach_months: Vec<usize>,
    pub sweep_months: Vec<usize>,
    /// Month a non-trivial balloon falls due inside the hold period
    pub balloon_month: Option<usize>,
}

/// The schedule as context-ready monthly series.
#[derive(Debug, Clone)]
pub struct LoanSeries {
    pub interest: Series,
    pub principal: Series,
    pub sweep: Series,
    pub balloon: Series,
    pub balance: Series,
    pub debt_service: Series,
    pub debt_service_total: Series,
    pub dscr: Series,
}

impl LoanSeries {
    /// All-zero debt flows with a constant sentinel DSCR.
    pub fn none(months: usize, no_debt_dscr: f64) -> UnderwritingResult<Self> {
        Ok(Self {
            interest: Series::zeros(months),
            principal: Series::zeros(months),
            sweep: Series::zeros(months),
            balloon: Series::zeros(months),
            balance: Series::zeros(months),
            debt_service: Series::zeros(months),
            debt_service_total: Series::zeros(months),
            dscr: Series::constant(months, no_debt_dscr)?,
        })
    }

    pub fn publish(self, ctx: &mut DealContext) -> UnderwritingResult<()> {
        ctx.set_series(keys::LOAN_INTEREST, self.interest)?;
        ctx.set_series(keys::LOAN_PRINCIPAL, self.principal)?;
        ctx.set_series(keys::LOAN_SWEEP, self.sweep)?;
        ctx.set_series(keys::LOAN_BALLOON, self.balloon)?;
        ctx.set_series(keys::LOAN_BALANCE, self.balance)?;
        ctx.set_series(keys::DEBT_SERVICE, self.debt_service)?;
        ctx.set_series(keys::DEBT_SERVICE_TOTAL, self.debt_service_total)?;
        ctx.set_series(keys::DSCR, self.dscr)?;
        Ok(())
    }
}

impl LoanSchedule {
    pub fn series(&self) -> UnderwritingResult<LoanSeries> {
        let pick = |f: fn(&LoanPeriod) -> f64| Series::new(self.periods.iter().map(f).collect());
        Ok(LoanSeries {
            interest: pick(|p| p.interest)?,
            principal: pick(|p| p.principal)?,
            sweep: pick(|p| p.sweep)?,
            balloon: pick(|p| p.balloon)?,
            balance: pick(|p| p.ending_balance)?,
            debt_service: pick(|p| p.debt_service)?,
            debt_service_total: pick(|p| p.debt_service_total)?,
            dscr: pick(|p| p.dscr)?,
        })
    }

    /// Mean and minimum DSCR over `start..end`, counting only months with
    /// debt service.
    pub fn dscr_stats(&self, start: usize, end: usize) -> Option<(f64, f64)> {
        let serviced: Vec<f64> = self
            .periods
            .iter()
            .filter(|p| p.month >= start && p.month < end && p.debt_service > 0.0)
            .map(|p| p.dscr)
            .collect();
        if serviced.is_empty() {
            return None;
        }
        let mean = serviced.iter().sum::<f64>() / serviced.len() as f64;
        let min = serviced.iter().copied().fold(f64::INFINITY, f64::min);
        Some((mean, min))
    }

    pub fn total_swept(&self) -> f64 {
        self.periods.iter().map(|p| p.sweep).sum()
    }
}

// ---------------------------------------------------------------------------
// Sizing and amortization
// ---------------------------------------------------------------------------

/// Forward-12 NOI from `month`, annualized when fewer than 12 months remain.
pub fn forward_annual_noi(noi: &Series, month: usize) -> UnderwritingResult<f64> {
    let available = noi.len().saturating_sub(month).min(12);
    let sum = noi.forward12(month)?;
    Ok(sum * 12.0 / available as f64)
}

/// Size the loan. `rate_override` replaces the all-in coupon (scenario sweeps).
pub fn resolve_terms(
    input: &DebtInput,
    noi: &Series,
    funding_month: usize,
    purchase_price: f64,
    rate_override: Option<f64>,
) -> UnderwritingResult<LoanTerms> {
    let annual_rate = rate_override.unwrap_or_else(|| to_f64(input.rate.all_in()));
    let covenants = input.covenants.as_ref();
    let mut terms = LoanTerms {
        principal: 0.0,
        annual_rate,
        amortization_months: input.amortization_months,
        interest_only_months: input.interest_only_months,
        term_months: input.term_months,
        funding_month,
        origination_fee: 0.0,
        min_dscr: covenants.and_then(|c| c.min_dscr).map(to_f64),
        sweep_dscr: covenants.and_then(|c| c.cash_sweep_dscr).map(to_f64),
        sweep_share: covenants.map_or(1.0, |c| to_f64(c.sweep_share)),
    };

    terms.principal = match &input.sizing {
        LoanSizing::Explicit { amount } => to_f64(*amount),
        LoanSizing::Ltv { ltv } => to_f64(*ltv) * purchase_price,
        LoanSizing::Dscr { min_dscr, max_ltv } => {
            let forward_noi = forward_annual_noi(noi, funding_month)?;
            if forward_noi <= 0.0 {
                return Err(UnderwritingError::invalid(
                    "modules.debt.sizing",
                    "DSCR sizing requires positive forward NOI at funding",
                ));
            }
            let payment = forward_noi / to_f64(*min_dscr) / 12.0;
            let monthly_rate = annual_rate / 12.0;
            let sized = if terms.amortizes() {
                present_value_of_annuity_payment(monthly_rate, terms.amortization_months, payment)?
            } else if monthly_rate > 0.0 {
                payment / monthly_rate
            } else {
                return Err(UnderwritingError::DivisionByZero {
                    context: "DSCR sizing of an interest-only loan at a zero rate".into(),
                });
            };
            match max_ltv {
                Some(ltv) => sized.min(to_f64(*ltv) * purchase_price),
                None => sized,
            }
        }
    };
    terms.origination_fee = terms.principal * to_f64(input.origination_fee_rate);
    Ok(terms)
}

fn forward_dscr(noi: &Series, month: usize, debt_service: f64, no_debt_dscr: f64) -> UnderwritingResult<f64> {
    if debt_service <= 0.0 {
        return Ok(no_debt_dscr);
    }
    Ok(forward_annual_noi(noi, month)? / (debt_service * 12.0))
}

/// Amortize `terms` across the months of `noi`. Shared by the debt module and
/// the scenario sweep so covenants and sweeps behave identically in both.
pub fn build_loan_schedule(
    terms: &LoanTerms,
    noi: &Series,
    no_debt_dscr: f64,
) -> UnderwritingResult<LoanSchedule> {
    let months = noi.len();
    let monthly_rate = terms.annual_rate / 12.0;
    let mut periods = Vec::with_capacity(months);
    let mut breach_months = Vec::new();
    let mut sweep_months = Vec::new();
    let mut balloon_month = None;
    let mut level_payment: Option<f64> = None;
    let mut balance = 0.0;

    for month in 0..months {
        if month < terms.funding_month {
            periods.push(LoanPeriod::idle(month, no_debt_dscr));
            continue;
        }
        let k = month - terms.funding_month;
        if k == 0 {
            balance = terms.principal;
        }
        let opening = balance;
        if opening <= BALANCE_EPSILON || k >= terms.term_months as usize {
            periods.push(LoanPeriod::idle(month, no_debt_dscr));
            continue;
        }

        let interest = opening * monthly_rate;
        let mut principal = if !terms.amortizes() || k < terms.interest_only_months as usize {
            0.0
        } else {
            let payment = match level_payment {
                Some(p) => p,
                None => {
                    let p = annuity_payment(monthly_rate, terms.amortization_months, opening)?;
                    level_payment = Some(p);
                    p
                }
            };
            (payment - interest).clamp(0.0, opening)
        };
        let maturity = k + 1 == terms.term_months as usize;
        if maturity && opening - principal < BALANCE_EPSILON {
            principal = opening;
        }

        let debt_service = interest + principal;
        let dscr = forward_dscr(noi, month, debt_service, no_debt_dscr)?;
        if terms.min_dscr.is_some_and(|min| dscr < min) {
            breach_months.push(month);
        }

        let remaining = opening - principal;
        let mut sweep = 0.0;
        if terms.sweep_dscr.is_some_and(|trigger| dscr < trigger) {
            let excess = noi.get(month)? - debt_service;
            if excess > 0.0 {
                sweep = (excess * terms.sweep_share).min(remaining);
                sweep_months.push(month);
            }
        }

        let balloon = if maturity { remaining - sweep } else { 0.0 };
        if balloon > BALANCE_EPSILON {
            balloon_month = Some(month);
        }
        let mut ending = remaining - sweep - balloon;
        if ending < BALANCE_EPSILON {
            ending = 0.0;
        }
        balance = ending;

        periods.push(LoanPeriod {
            month,
            opening_balance: opening,
            interest,
            principal,
            sweep,
            balloon,
            ending_balance: ending,
            debt_service,
            debt_service_total: debt_service + sweep,
            dscr,
        });
    }

    Ok(LoanSchedule {
        terms: *terms,
        monthly_payment: level_payment.unwrap_or(0.0),
        periods,
        breach_months,
        sweep_months,
        balloon_month,
    })
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

fn validate_debt(debt: &DebtInput, issues: &mut Vec<ValidationIssue>) {
    const P: &str = "modules.debt";
    if debt.term_months == 0 {
        issues.push(ValidationIssue::new(
            format!("{P}.term_months"),
            "Loan term must be at least one month",
        ));
    }
    if debt.interest_only_months > debt.term_months {
        issues.push(ValidationIssue::new(
            format!("{P}.interest_only_months"),
            "Interest-only period cannot exceed the loan term",
        ));
    }
    match &debt.sizing {
        LoanSizing::Explicit { amount } => {
            if *amount <= Decimal::ZERO {
                issues.push(ValidationIssue::new(
                    format!("{P}.sizing.amount"),
                    "Loan amount must be positive",
                ));
            }
        }
        LoanSizing::Ltv { ltv } => {
            if *ltv <= Decimal::ZERO || *ltv > Decimal::ONE {
                issues.push(ValidationIssue::new(
                    format!("{P}.sizing.ltv"),
                    "LTV must be in (0, 1]",
                ));
            }
        }
        LoanSizing::Dscr { min_dscr, max_ltv } => {
            if *min_dscr <= Decimal::ZERO {
                issues.push(ValidationIssue::new(
                    format!("{P}.sizing.min_dscr"),
                    "Minimum DSCR must be positive",
                ));
            }
            if max_ltv.is_some_and(|l| l <= Decimal::ZERO || l > Decimal::ONE) {
                issues.push(ValidationIssue::new(
                    format!("{P}.sizing.max_ltv"),
                    "Maximum LTV must be in (0, 1]",
                ));
            }
        }
    }
    if debt.rate.all_in() < Decimal::ZERO {
        issues.push(ValidationIssue::new(
            format!("{P}.rate"),
            "All-in interest rate cannot be negative",
        ));
    }
    if debt.origination_fee_rate < Decimal::ZERO || debt.origination_fee_rate >= Decimal::ONE {
        issues.push(ValidationIssue::new(
            format!("{P}.origination_fee_rate"),
            "Origination fee rate must be in [0, 1)",
        ));
    }
    if let Some(c) = &debt.covenants {
        if c.min_dscr.is_some_and(|d| d <= Decimal::ZERO) {
            issues.push(ValidationIssue::new(
                format!("{P}.covenants.min_dscr"),
                "Covenant DSCR must be positive",
            ));
        }
        if c.cash_sweep_dscr.is_some_and(|d| d <= Decimal::ZERO) {
            issues.push(ValidationIssue::new(
                format!("{P}.covenants.cash_sweep_dscr"),
                "Sweep trigger DSCR must be positive",
            ));
        }
        if c.sweep_share <= Decimal::ZERO || c.sweep_share > Decimal::ONE {
            issues.push(ValidationIssue::new(
                format!("{P}.covenants.sweep_share"),
                "Sweep share must be in (0, 1]",
            ));
        }
    }
}

pub struct DebtModule;

impl DebtModule {
    fn publish_no_debt(&self, config: &EngineConfig, ctx: &mut DealContext) -> UnderwritingResult<()> {
        LoanSeries::none(ctx.months(), config.no_debt_dscr)?.publish(ctx)?;
        ctx.set_metric(keys::LOAN_AMOUNT, 0.0)?;
        ctx.set_metric("loan_fees", 0.0)?;
        ctx.set_metric(keys::AVERAGE_DSCR, config.no_debt_dscr)?;
        ctx.set_metric(keys::MIN_DSCR, config.no_debt_dscr)?;
        Ok(())
    }
}

impl DealModule for DebtModule {
    fn name(&self) -> &'static str {
        "debt"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::NOI]
    }

    fn validate(
        &self,
        input: &DealInput,
        _config: &EngineConfig,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if let Some(debt) = &input.modules.debt {
            validate_debt(debt, issues);
        }
    }

    fn compute(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        ctx: &mut DealContext,
    ) -> UnderwritingResult<()> {
        let Some(debt) = &input.modules.debt else {
            return self.publish_no_debt(config, ctx);
        };
        let timeline = *ctx.timeline();
        let close = timeline.close_month() as usize;
        let exit = timeline.exit_month() as usize;
        let purchase_price = input.modules.acquisition.purchase_price();

        let noi = ctx.require_series(keys::NOI, self.name())?;
        let terms = resolve_terms(debt, noi, close, purchase_price, None)?;
        let schedule = build_loan_schedule(&terms, noi, config.no_debt_dscr)?;
        let forward_noi = forward_annual_noi(noi, close)?;
        let series = schedule.series()?;

        let (average_dscr, min_dscr) = schedule
            .dscr_stats(close, exit)
            .unwrap_or((config.no_debt_dscr, config.no_debt_dscr));

        if terms.principal > purchase_price {
            ctx.warn("Loan amount exceeds the purchase price");
        }
        if let (Some(required), false) = (terms.min_dscr, schedule.breach_months.is_empty()) {
            ctx.warn(format!(
                "DSCR covenant breached in {} month(s); minimum {min_dscr:.2}x vs required {required:.2}x",
                schedule.breach_months.len()
            ));
        }
        if !schedule.sweep_months.is_empty() {
            ctx.warn(format!(
                "Cash sweep applied in {} month(s), prepaying {:.2} of principal",
                schedule.sweep_months.len(),
                schedule.total_swept()
            ));
        }
        if let Some(month) = schedule.balloon_month.filter(|m| *m < exit) {
            let balloon = schedule.periods[month].balloon;
            ctx.warn(format!(
                "Loan matures in month {month} before exit month {exit}; balloon of {balloon:.2} repaid from equity"
            ));
        }
        if average_dscr < 1.0 {
            ctx.warn(format!("Average DSCR {average_dscr:.2}x is below 1.00x"));
        }

        series.publish(ctx)?;
        ctx.set_metric(keys::LOAN_AMOUNT, terms.principal)?;
        ctx.set_metric("loan_fees", terms.origination_fee)?;
        ctx.set_metric("loan_rate", terms.annual_rate)?;
        ctx.set_metric("monthly_payment", schedule.monthly_payment)?;
        ctx.set_metric(keys::AVERAGE_DSCR, average_dscr)?;
        ctx.set_metric(keys::MIN_DSCR, min_dscr)?;
        ctx.set_metric("loan_to_value", terms.principal / purchase_price)?;
        if terms.principal > 0.0 {
            ctx.set_metric("debt_yield", forward_noi / terms.principal)?;
        }
        ctx.set_metric("covenant_breach_months", schedule.breach_months.len() as f64)?;
        ctx.set_metric("total_swept", schedule.total_swept())?;
        ctx.artifacts_mut().loan = Some(schedule);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Timeline;
    use chrono::NaiveDate;

    fn terms(principal: f64, rate: f64, amort: u32, io: u32, term: u32) -> LoanTerms {
        LoanTerms {
            principal,
            annual_rate: rate,
            amortization_months: amort,
            interest_only_months: io,
            term_months: term,
            funding_month: 0,
            origination_fee: 0.0,
            min_dscr: None,
            sweep_dscr: None,
            sweep_share: 1.0,
        }
    }

    fn noi(months: usize, monthly: f64) -> Series {
        Series::constant(months, monthly).unwrap()
    }

    #[test]
    fn test_level_payment() {
        let s = build_loan_schedule(&terms(1_000_000.0, 0.06, 300, 0, 300), &noi(12, 20_000.0), NO_DEBT_DSCR)
            .unwrap();
        assert!((s.monthly_payment - 6443.01).abs() < 0.01);
        let first = s.periods[0];
        assert!((first.interest - 5000.0).abs() < 1e-9);
        assert!((first.principal - (s.monthly_payment - 5000.0)).abs() < 1e-9);
    }

    #[test]
    fn test_interest_only_window() {
        let s = build_loan_schedule(&terms(1_000_000.0, 0.06, 300, 24, 120), &noi(36, 20_000.0), NO_DEBT_DSCR)
            .unwrap();
        for p in &s.periods[..24] {
            assert_eq!(p.principal, 0.0);
            assert!((p.debt_service - 5000.0).abs() < 1e-9);
        }
        assert!(s.periods[24].principal > 0.0);
        assert!((s.periods[23].ending_balance - 1_000_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_fully_amortizing_loan_retires() {
        let s = build_loan_schedule(&terms(500_000.0, 0.05, 60, 0, 60), &noi(72, 20_000.0), NO_DEBT_DSCR)
            .unwrap();
        assert_eq!(s.periods[59].ending_balance, 0.0);
        assert_eq!(s.periods[59].balloon, 0.0);
        assert_eq!(s.balloon_month, None);
        assert_eq!(s.periods[60].debt_service, 0.0);
        assert_eq!(s.periods[60].dscr, NO_DEBT_DSCR);
    }

    #[test]
    fn test_balloon_at_maturity() {
        let s = build_loan_schedule(&terms(1_000_000.0, 0.06, 300, 0, 24), &noi(36, 20_000.0), NO_DEBT_DSCR)
            .unwrap();
        assert_eq!(s.balloon_month, Some(23));
        let p = s.periods[23];
        assert!(p.balloon > 900_000.0);
        assert_eq!(p.ending_balance, 0.0);
        assert_eq!(s.periods[24].debt_service_total, 0.0);
    }

    #[test]
    fn test_dscr_is_forward_noi_over_annual_debt_service() {
        let s = build_loan_schedule(&terms(1_000_000.0, 0.06, 0, 0, 120), &noi(24, 10_000.0), NO_DEBT_DSCR)
            .unwrap();
        // 120,000 / (5,000 * 12)
        assert!((s.periods[0].dscr - 2.0).abs() < 1e-9);
        // Clipped window is annualized
        assert!((s.periods[20].dscr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cash_sweep_prepays_principal() {
        let mut t = terms(1_000_000.0, 0.06, 0, 0, 120);
        t.sweep_dscr = Some(1.5);
        t.sweep_share = 0.5;
        // DSCR = 72,000 / 60,000 = 1.2, below the trigger
        let s = build_loan_schedule(&t, &noi(12, 6_000.0), NO_DEBT_DSCR).unwrap();
        let first = s.periods[0];
        assert!((first.sweep - 500.0).abs() < 1e-9);
        assert!((first.debt_service_total - 5500.0).abs() < 1e-9);
        assert!((first.ending_balance - 999_500.0).abs() < 1e-9);
        assert_eq!(s.sweep_months.len(), 12);
    }

    #[test]
    fn test_covenant_breach_recorded() {
        let mut t = terms(1_000_000.0, 0.06, 0, 0, 120);
        t.min_dscr = Some(1.25);
        let s = build_loan_schedule(&t, &noi(12, 6_000.0), NO_DEBT_DSCR).unwrap();
        assert_eq!(s.breach_months.len(), 12);
        assert!(s.sweep_months.is_empty());
    }

    #[test]
    fn test_funding_at_close_month() {
        let mut t = terms(1_000_000.0, 0.06, 0, 0, 120);
        t.funding_month = 3;
        let s = build_loan_schedule(&t, &noi(12, 10_000.0), NO_DEBT_DSCR).unwrap();
        assert_eq!(s.periods[2].debt_service, 0.0);
        assert_eq!(s.periods[2].dscr, NO_DEBT_DSCR);
        assert!((s.periods[3].opening_balance - 1_000_000.0).abs() < 1e-9);
    }

    fn debt_input(sizing: LoanSizing, amort: u32) -> DebtInput {
        DebtInput {
            sizing,
            rate: InterestRate::Fixed { rate: dec!(0.06) },
            amortization_months: amort,
            interest_only_months: 0,
            term_months: 120,
            origination_fee_rate: dec!(0.01),
            covenants: None,
        }
    }

    #[test]
    fn test_dscr_sizing() {
        let input = debt_input(
            LoanSizing::Dscr {
                min_dscr: dec!(1.25),
                max_ltv: None,
            },
            0,
        );
        // 1.2M forward NOI / 1.25 = 960k a year = 80k a month of interest
        let t = resolve_terms(&input, &noi(24, 100_000.0), 0, 10_000_000.0, None).unwrap();
        assert!((t.principal - 16_000_000.0).abs() < 1e-6);
        assert!((t.origination_fee - 160_000.0).abs() < 1e-6);

        let capped = debt_input(
            LoanSizing::Dscr {
                min_dscr: dec!(1.25),
                max_ltv: Some(dec!(0.5)),
            },
            300,
        );
        let t = resolve_terms(&capped, &noi(24, 100_000.0), 0, 10_000_000.0, None).unwrap();
        assert!((t.principal - 5_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_dscr_sizing_amortizing_hits_target() {
        let input = debt_input(
            LoanSizing::Dscr {
                min_dscr: dec!(1.30),
                max_ltv: None,
            },
            360,
        );
        let n = noi(36, 50_000.0);
        let t = resolve_terms(&input, &n, 0, 100_000_000.0, None).unwrap();
        let s = build_loan_schedule(&t, &n, NO_DEBT_DSCR).unwrap();
        assert!((s.periods[0].dscr - 1.30).abs() < 1e-9);
    }

    #[test]
    fn test_ltv_sizing_and_rate_override() {
        let input = debt_input(LoanSizing::Ltv { ltv: dec!(0.65) }, 300);
        let t = resolve_terms(&input, &noi(12, 1.0), 0, 8_500_000.0, Some(0.07)).unwrap();
        assert!((t.principal - 5_525_000.0).abs() < 1e-6);
        assert_eq!(t.annual_rate, 0.07);
    }

    #[test]
    fn test_floating_rate_floor() {
        let rate = InterestRate::Floating {
            index_rate: dec!(0.01),
            spread: dec!(0.02),
            floor: Some(dec!(0.045)),
        };
        assert_eq!(rate.all_in(), dec!(0.045));
        let rate = InterestRate::Floating {
            index_rate: dec!(0.04),
            spread: dec!(0.02),
            floor: Some(dec!(0.045)),
        };
        assert_eq!(rate.all_in(), dec!(0.06));
    }

    #[test]
    fn test_no_debt_publishes_sentinel() {
        let mut deal = crate::modules::fixtures::office_deal();
        deal.modules.debt = None;
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut ctx = DealContext::new(Timeline::new(start, 12, 12, 0).unwrap());
        ctx.set_series(keys::NOI, noi(12, 1000.0)).unwrap();
        DebtModule
            .compute(&deal, &EngineConfig::default(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.series(keys::DEBT_SERVICE).unwrap().sum(), 0.0);
        assert!(ctx.series(keys::DSCR).unwrap().values().iter().all(|d| *d == 999.0));
        assert_eq!(ctx.metric(keys::AVERAGE_DSCR), Some(999.0));
    }

    #[test]
    fn test_sizing_modes_deserialize() {
        let json = r#"{
            "sizing": { "mode": "dscr", "min_dscr": 1.25, "max_ltv": "0.7" },
            "rate": { "type": "floating", "index_rate": "0.04", "spread": "0.02" },
            "term_months": 60,
            "covenants": { "cash_sweep_dscr": "1.2" }
        }"#;
        let d: DebtInput = serde_json::from_str(json).unwrap();
        assert!(matches!(d.sizing, LoanSizing::Dscr { .. }));
        assert_eq!(d.rate.all_in(), dec!(0.06));
        assert_eq!(d.covenants.unwrap().sweep_share, dec!(1));
    }
}
