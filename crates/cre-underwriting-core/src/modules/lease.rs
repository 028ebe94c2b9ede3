use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{anniversary_growth, DealModule};
use crate::context::{keys, DealContext};
use crate::deal::DealInput;
use crate::engine::EngineConfig;
use crate::error::ValidationIssue;
use crate::series::Series;
use crate::timeline::Timeline;
use crate::types::{to_f64, Money, Rate};
use crate::UnderwritingResult;

/// Longest lease or rollover term accepted, in months (100 years).
pub const MAX_LEASE_TERM_MONTHS: u32 = 1200;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a tenant's `base_rent` figure is quoted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentBasis {
    /// Annual rent per unit of leased area
    #[default]
    AnnualPerArea,
    /// Annual rent for the whole premises
    AnnualTotal,
    /// Monthly rent for the whole premises
    MonthlyTotal,
}

impl RentBasis {
    fn annualize(self, amount: f64, area: f64) -> f64 {
        match self {
            RentBasis::AnnualPerArea => amount * area,
            RentBasis::AnnualTotal => amount,
            RentBasis::MonthlyTotal => amount * 12.0,
        }
    }
}

/// A date-bounded contractual rent, quoted on the tenant's rent basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentStep {
    pub start: NaiveDate,
    /// Last date the step applies (inclusive); open-ended when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    pub rent: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasis {
    /// Amount per unit of leased area
    PerArea,
    /// Lump sum
    Fixed,
    /// Fraction of total contractual rent over the lease term
    PercentOfLeaseRent,
}

/// A one-time tenant-improvement or leasing-commission cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeasingCost {
    pub basis: CostBasis,
    pub amount: Decimal,
}

/// Market assumptions used to synthesize the lease that follows an expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloverPolicy {
    /// Vacant months between expiry and the successor's start
    #[serde(default)]
    pub downtime_months: u32,
    pub term_months: u32,
    /// Annual market rent growth
    #[serde(default)]
    pub market_rent_growth: Rate,
    /// Mark-to-market premium (or discount) over the grown rent
    #[serde(default)]
    pub market_spread: Rate,
    /// Annual market rent per area as of the analysis start. When absent the
    /// expiring rent is grown through the downtime instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_rent: Option<Money>,
    /// Annual bump applied within the successor lease
    #[serde(default)]
    pub escalation_rate: Rate,
    #[serde(default)]
    pub free_rent_months: u32,
    /// Probability the sitting tenant renews; scales re-leasing costs only
    #[serde(default)]
    pub renewal_probability: Rate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_improvements: Option<LeasingCost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leasing_commissions: Option<LeasingCost>,
}

/// An in-place lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantLease {
    pub name: String,
    pub area: Money,
    pub start: NaiveDate,
    /// Last day of the lease; give either this or `term_months`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_months: Option<u32>,
    pub base_rent: Money,
    #[serde(default)]
    pub rent_basis: RentBasis,
    /// Annual bump compounded on each anniversary of the lease start
    #[serde(default)]
    pub escalation_rate: Rate,
    /// Explicit schedule; when non-empty it replaces the bump entirely
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rent_steps: Vec<RentStep>,
    #[serde(default)]
    pub free_rent_months: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_improvements: Option<LeasingCost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leasing_commissions: Option<LeasingCost>,
    /// Overrides the deal-wide rollover policy for this tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollover: Option<RolloverPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseInput {
    pub tenants: Vec<TenantLease>,
    /// Deal-wide default applied to tenants without their own policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_rollover: Option<RolloverPolicy>,
}

/// One row of the rent roll: an in-place lease or a synthesized successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseSummary {
    pub tenant: String,
    /// 0 for the in-place lease, n for the n-th rollover
    pub generation: u32,
    pub area: f64,
    pub start: NaiveDate,
    /// First day of the final lease month
    pub end: NaiveDate,
    pub term_months: u32,
    pub initial_annual_rent: f64,
    pub final_annual_rent: f64,
    /// Contractual rent over the term net of abatement
    pub total_net_rent: f64,
    pub tenant_improvements: f64,
    pub leasing_commissions: f64,
}

/// Lease-level series over the hold period plus the rent roll.
#[derive(Debug, Clone)]
pub struct LeaseProjection {
    pub gross_potential_rent: Series,
    pub free_rent: Series,
    pub leasing_costs: Series,
    pub rollover_costs: Series,
    pub occupied_area: Series,
    pub rent_roll: Vec<LeaseSummary>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

enum RentSchedule {
    Bump { initial_annual: f64, rate: f64 },
    Steps { initial_annual: f64, steps: Vec<ResolvedStep> },
}

struct ResolvedStep {
    start: i64,
    /// Exclusive month offset
    end: Option<i64>,
    annual: f64,
}

/// A lease placed on the deal's month grid. Offsets may be negative for
/// leases signed before the analysis start.
struct PlacedLease {
    name: String,
    generation: u32,
    area: f64,
    start: i64,
    months: u32,
    schedule: RentSchedule,
    free_rent_months: u32,
}

impl PlacedLease {
    fn end(&self) -> i64 {
        self.start + self.months as i64
    }

    fn annual_rent_at(&self, offset: i64) -> f64 {
        match &self.schedule {
            RentSchedule::Bump {
                initial_annual,
                rate,
            } => {
                let elapsed = (offset - self.start).max(0) as usize;
                initial_annual * anniversary_growth(*rate, elapsed)
            }
            RentSchedule::Steps {
                initial_annual,
                steps,
            } => steps
                .iter()
                .rev()
                .find(|s| s.start <= offset && s.end.map_or(true, |e| offset < e))
                .map_or(*initial_annual, |s| s.annual),
        }
    }

    fn is_abated(&self, offset: i64) -> bool {
        offset - self.start < self.free_rent_months as i64
    }

    fn total_net_rent(&self) -> f64 {
        let end = self.end().min(self.start + MAX_LEASE_TERM_MONTHS as i64);
        (self.start..end)
            .filter(|o| !self.is_abated(*o))
            .map(|o| self.annual_rent_at(o) / 12.0)
            .sum()
    }

    fn cost(&self, cost: Option<&LeasingCost>) -> f64 {
        let Some(cost) = cost else {
            return 0.0;
        };
        let amount = to_f64(cost.amount);
        match cost.basis {
            CostBasis::PerArea => amount * self.area,
            CostBasis::Fixed => amount,
            CostBasis::PercentOfLeaseRent => amount * self.total_net_rent(),
        }
    }
}

fn lease_months(tenant: &TenantLease, timeline: &Timeline) -> u32 {
    match (tenant.term_months, tenant.end) {
        (Some(term), _) => term,
        (None, Some(end)) => {
            let months = timeline.month_offset(end) - timeline.month_offset(tenant.start) + 1;
            months.max(0) as u32
        }
        (None, None) => 0,
    }
}

fn place_tenant(tenant: &TenantLease, timeline: &Timeline) -> PlacedLease {
    let area = to_f64(tenant.area);
    let initial_annual = tenant.rent_basis.annualize(to_f64(tenant.base_rent), area);
    let schedule = if tenant.rent_steps.is_empty() {
        RentSchedule::Bump {
            initial_annual,
            rate: to_f64(tenant.escalation_rate),
        }
    } else {
        RentSchedule::Steps {
            initial_annual,
            steps: tenant
                .rent_steps
                .iter()
                .map(|s| ResolvedStep {
                    start: timeline.month_offset(s.start),
                    end: s.end.map(|e| timeline.month_offset(e) + 1),
                    annual: tenant.rent_basis.annualize(to_f64(s.rent), area),
                })
                .collect(),
        }
    };
    PlacedLease {
        name: tenant.name.clone(),
        generation: 0,
        area,
        start: timeline.month_offset(tenant.start),
        months: lease_months(tenant, timeline),
        schedule,
        free_rent_months: tenant.free_rent_months,
    }
}

fn successor(previous: &PlacedLease, policy: &RolloverPolicy, root_name: &str) -> PlacedLease {
    let start = previous.end() + policy.downtime_months as i64;
    let growth = to_f64(policy.market_rent_growth);
    let spread = 1.0 + to_f64(policy.market_spread);
    let market = match policy.market_rent {
        Some(rent) => {
            to_f64(rent) * previous.area * (1.0 + growth).powf(start.max(0) as f64 / 12.0)
        }
        None => {
            previous.annual_rent_at(previous.end() - 1)
                * (1.0 + growth).powf(policy.downtime_months as f64 / 12.0)
        }
    };
    let generation = previous.generation + 1;
    PlacedLease {
        name: format!("{root_name} (rollover {generation})"),
        generation,
        area: previous.area,
        start,
        months: policy.term_months,
        schedule: RentSchedule::Bump {
            initial_annual: market * spread,
            rate: to_f64(policy.escalation_rate),
        },
        free_rent_months: policy.free_rent_months,
    }
}

struct Buffers {
    gpr: Vec<f64>,
    free: Vec<f64>,
    leasing: Vec<f64>,
    rollover: Vec<f64>,
    occupied: Vec<f64>,
}

impl Buffers {
    fn new(months: usize) -> Self {
        Self {
            gpr: vec![0.0; months],
            free: vec![0.0; months],
            leasing: vec![0.0; months],
            rollover: vec![0.0; months],
            occupied: vec![0.0; months],
        }
    }

    fn place(&mut self, lease: &PlacedLease) {
        let hold = self.gpr.len() as i64;
        for offset in lease.start.max(0)..lease.end().min(hold) {
            let t = offset as usize;
            let monthly = lease.annual_rent_at(offset) / 12.0;
            self.gpr[t] += monthly;
            if lease.is_abated(offset) {
                self.free[t] += monthly;
            }
            self.occupied[t] += lease.area;
        }
    }

    /// Book a one-time cost at the lease start when it falls in the window.
    fn book_cost(&mut self, offset: i64, amount: f64, rollover: bool) {
        if offset < 0 || offset >= self.gpr.len() as i64 || amount == 0.0 {
            return;
        }
        self.leasing[offset as usize] += amount;
        if rollover {
            self.rollover[offset as usize] += amount;
        }
    }
}

fn summarize(
    lease: &PlacedLease,
    timeline: &Timeline,
    ti: f64,
    lc: f64,
) -> UnderwritingResult<LeaseSummary> {
    Ok(LeaseSummary {
        tenant: lease.name.clone(),
        generation: lease.generation,
        area: lease.area,
        start: timeline.date_at_offset(lease.start)?,
        end: timeline.date_at_offset(lease.end() - 1)?,
        term_months: lease.months,
        initial_annual_rent: lease.annual_rent_at(lease.start),
        final_annual_rent: lease.annual_rent_at(lease.end() - 1),
        total_net_rent: lease.total_net_rent(),
        tenant_improvements: ti,
        leasing_commissions: lc,
    })
}

/// Project every tenant, and every rollover successor, onto the timeline.
pub fn project_leases(
    input: &LeaseInput,
    timeline: &Timeline,
    max_generations: u32,
) -> UnderwritingResult<LeaseProjection> {
    let mut buffers = Buffers::new(timeline.len());
    let mut rent_roll = Vec::new();
    let mut warnings = Vec::new();
    let exit = timeline.exit_month() as i64;
    let hold = timeline.len() as i64;

    for tenant in &input.tenants {
        let mut lease = place_tenant(tenant, timeline);
        buffers.place(&lease);
        let ti = lease.cost(tenant.tenant_improvements.as_ref());
        let lc = lease.cost(tenant.leasing_commissions.as_ref());
        buffers.book_cost(lease.start, ti + lc, false);
        rent_roll.push(summarize(&lease, timeline, ti, lc)?);

        let Some(policy) = tenant.rollover.as_ref().or(input.market_rollover.as_ref()) else {
            continue;
        };
        let renewal = to_f64(policy.renewal_probability);
        while lease.end() < exit {
            if lease.generation >= max_generations {
                warnings.push(format!(
                    "{}: stopped rolling over after {max_generations} generations",
                    tenant.name
                ));
                break;
            }
            let next = successor(&lease, policy, &tenant.name);
            if next.start >= hold {
                break;
            }
            buffers.place(&next);
            let ti = next.cost(policy.tenant_improvements.as_ref()) * (1.0 - renewal);
            let lc = next.cost(policy.leasing_commissions.as_ref()) * (1.0 - renewal);
            buffers.book_cost(next.start, ti + lc, true);
            rent_roll.push(summarize(&next, timeline, ti, lc)?);
            lease = next;
        }
    }

    Ok(LeaseProjection {
        gross_potential_rent: Series::new(buffers.gpr)?,
        free_rent: Series::new(buffers.free)?,
        leasing_costs: Series::new(buffers.leasing)?,
        rollover_costs: Series::new(buffers.rollover)?,
        occupied_area: Series::new(buffers.occupied)?,
        rent_roll,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_cost(cost: Option<&LeasingCost>, path: String, issues: &mut Vec<ValidationIssue>) {
    let Some(cost) = cost else {
        return;
    };
    if cost.amount < Decimal::ZERO {
        issues.push(ValidationIssue::new(
            format!("{path}.amount"),
            "Leasing cost cannot be negative",
        ));
    }
    if cost.basis == CostBasis::PercentOfLeaseRent && cost.amount > Decimal::ONE {
        issues.push(ValidationIssue::new(
            format!("{path}.amount"),
            "Percent-of-rent cost must be a decimal fraction (<= 1)",
        ));
    }
}

fn term_too_long(path: String) -> ValidationIssue {
    ValidationIssue::new(
        path,
        format!("Lease term cannot exceed {MAX_LEASE_TERM_MONTHS} months"),
    )
}

/// Calendar months covered by `start..=end`, counting both partial months.
fn months_spanned(start: NaiveDate, end: NaiveDate) -> i64 {
    (end.year() as i64 - start.year() as i64) * 12 + end.month() as i64 - start.month() as i64 + 1
}

fn validate_policy(policy: &RolloverPolicy, path: &str, issues: &mut Vec<ValidationIssue>) {
    if policy.term_months == 0 {
        issues.push(ValidationIssue::new(
            format!("{path}.term_months"),
            "Rollover term must be at least one month",
        ));
    } else if policy.term_months > MAX_LEASE_TERM_MONTHS {
        issues.push(term_too_long(format!("{path}.term_months")));
    }
    if policy.free_rent_months > policy.term_months {
        issues.push(ValidationIssue::new(
            format!("{path}.free_rent_months"),
            "Free rent cannot exceed the rollover term",
        ));
    }
    if policy.renewal_probability < Decimal::ZERO || policy.renewal_probability > Decimal::ONE {
        issues.push(ValidationIssue::new(
            format!("{path}.renewal_probability"),
            "Renewal probability must be in [0, 1]",
        ));
    }
    if policy.market_rent_growth <= -Decimal::ONE {
        issues.push(ValidationIssue::new(
            format!("{path}.market_rent_growth"),
            "Market rent growth must be greater than -100%",
        ));
    }
    if policy.market_spread <= -Decimal::ONE {
        issues.push(ValidationIssue::new(
            format!("{path}.market_spread"),
            "Market spread must be greater than -100%",
        ));
    }
    if policy.market_rent.is_some_and(|r| r < Decimal::ZERO) {
        issues.push(ValidationIssue::new(
            format!("{path}.market_rent"),
            "Market rent cannot be negative",
        ));
    }
    validate_cost(
        policy.tenant_improvements.as_ref(),
        format!("{path}.tenant_improvements"),
        issues,
    );
    validate_cost(
        policy.leasing_commissions.as_ref(),
        format!("{path}.leasing_commissions"),
        issues,
    );
}

fn validate_tenant(tenant: &TenantLease, path: &str, issues: &mut Vec<ValidationIssue>) {
    if tenant.area <= Decimal::ZERO {
        issues.push(ValidationIssue::new(
            format!("{path}.area"),
            "Leased area must be positive",
        ));
    }
    if tenant.base_rent < Decimal::ZERO {
        issues.push(ValidationIssue::new(
            format!("{path}.base_rent"),
            "Base rent cannot be negative",
        ));
    }
    if tenant.escalation_rate <= -Decimal::ONE {
        issues.push(ValidationIssue::new(
            format!("{path}.escalation_rate"),
            "Escalation must be greater than -100%",
        ));
    }
    match (tenant.end, tenant.term_months) {
        (Some(_), Some(_)) | (None, None) => issues.push(ValidationIssue::new(
            path.to_string(),
            "Exactly one of end or term_months is required",
        )),
        (Some(end), None) if end < tenant.start => issues.push(ValidationIssue::new(
            format!("{path}.end"),
            "Lease end precedes lease start",
        )),
        (Some(end), None) if months_spanned(tenant.start, end) > MAX_LEASE_TERM_MONTHS as i64 => {
            issues.push(term_too_long(format!("{path}.end")))
        }
        (None, Some(0)) => issues.push(ValidationIssue::new(
            format!("{path}.term_months"),
            "Lease term must be at least one month",
        )),
        (None, Some(term)) if term > MAX_LEASE_TERM_MONTHS => {
            issues.push(term_too_long(format!("{path}.term_months")))
        }
        _ => {}
    }
    if let Some(term) = tenant.term_months {
        if tenant.free_rent_months > term {
            issues.push(ValidationIssue::new(
                format!("{path}.free_rent_months"),
                "Free rent cannot exceed the lease term",
            ));
        }
    }
    for (j, step) in tenant.rent_steps.iter().enumerate() {
        if step.end.is_some_and(|end| end < step.start) {
            issues.push(ValidationIssue::new(
                format!("{path}.rent_steps[{j}].end"),
                "Step end precedes step start",
            ));
        }
        if step.rent < Decimal::ZERO {
            issues.push(ValidationIssue::new(
                format!("{path}.rent_steps[{j}].rent"),
                "Step rent cannot be negative",
            ));
        }
    }
    validate_cost(
        tenant.tenant_improvements.as_ref(),
        format!("{path}.tenant_improvements"),
        issues,
    );
    validate_cost(
        tenant.leasing_commissions.as_ref(),
        format!("{path}.leasing_commissions"),
        issues,
    );
    if let Some(policy) = &tenant.rollover {
        validate_policy(policy, &format!("{path}.rollover"), issues);
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

pub struct LeaseModule;

impl DealModule for LeaseModule {
    fn name(&self) -> &'static str {
        "lease"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    fn validate(
        &self,
        input: &DealInput,
        _config: &EngineConfig,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let lease = &input.modules.lease;
        if lease.tenants.is_empty() {
            issues.push(ValidationIssue::new(
                "modules.lease.tenants",
                "At least one tenant is required",
            ));
        }
        for (i, tenant) in lease.tenants.iter().enumerate() {
            validate_tenant(tenant, &format!("modules.lease.tenants[{i}]"), issues);
        }
        if let Some(policy) = &lease.market_rollover {
            validate_policy(policy, "modules.lease.market_rollover", issues);
        }
    }

    fn compute(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        ctx: &mut DealContext,
    ) -> UnderwritingResult<()> {
        let projection = project_leases(
            &input.modules.lease,
            ctx.timeline(),
            config.max_rollover_generations,
        )?;
        for warning in projection.warnings {
            ctx.warn(warning);
        }

        let rentable_area = input.rentable_area();
        let occupancy = projection.occupied_area.divide(rentable_area)?;
        let peak_occupancy = occupancy.values().iter().copied().fold(0.0, f64::max);
        if peak_occupancy > 1.0 + 1e-9 {
            ctx.warn(format!(
                "Leased area exceeds rentable area (peak occupancy {:.1}%)",
                peak_occupancy * 100.0
            ));
        }
        let average_occupancy = occupancy.sum() / ctx.months() as f64;
        let close = ctx.timeline().close_month() as usize;
        let in_place_rent = projection.gross_potential_rent.get(close)? * 12.0;
        let rollover_count = projection
            .rent_roll
            .iter()
            .filter(|r| r.generation > 0)
            .count();

        ctx.set_series(keys::GROSS_POTENTIAL_RENT, projection.gross_potential_rent)?;
        ctx.set_series(keys::FREE_RENT, projection.free_rent)?;
        let total_leasing = projection.leasing_costs.sum();
        ctx.set_series(keys::LEASING_COSTS, projection.leasing_costs)?;
        ctx.set_series(keys::ROLLOVER_COSTS, projection.rollover_costs)?;
        ctx.set_series(keys::OCCUPIED_AREA, projection.occupied_area)?;
        ctx.set_series(keys::OCCUPANCY, occupancy)?;

        ctx.set_metric("tenant_count", input.modules.lease.tenants.len() as f64)?;
        ctx.set_metric("rollover_count", rollover_count as f64)?;
        ctx.set_metric("in_place_annual_rent", in_place_rent)?;
        ctx.set_metric("total_leasing_costs", total_leasing)?;
        ctx.set_metric("average_occupancy", average_occupancy)?;
        ctx.set_metric("peak_occupancy", peak_occupancy)?;
        ctx.artifacts_mut().rent_roll = projection.rent_roll;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
