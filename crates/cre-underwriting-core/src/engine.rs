//! Pipeline orchestration: validate, build the timeline, run each module in
//! order, summarize.

use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::context::{keys, DealContext};
use crate::deal::DealInput;
use crate::error::{UnderwritingError, ValidationIssue};
use crate::modules::debt::NO_DEBT_DSCR;
use crate::modules::pipeline;
use crate::root_finding::SolverConfig;
use crate::types::ComputationMetadata;
use crate::UnderwritingResult;

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub solver: SolverConfig,
    /// Starting guess for monthly IRR solves
    pub irr_guess: f64,
    /// DSCR reported for months without debt service
    pub no_debt_dscr: f64,
    pub max_scenario_cells: usize,
    /// Cap on successive rollovers synthesized per tenant
    pub max_rollover_generations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            irr_guess: 0.01,
            no_debt_dscr: NO_DEBT_DSCR,
            max_scenario_cells: 10_000,
            max_rollover_generations: 20,
        }
    }
}

/// Headline figures lifted from the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealSummary {
    pub deal_name: String,
    pub currency: String,
    pub hold_period_months: u32,
    pub exit_month: u32,
    pub purchase_price: f64,
    pub total_project_cost: f64,
    pub loan_amount: f64,
    pub total_equity: f64,
    pub noi_year1: f64,
    pub going_in_cap_rate: f64,
    pub exit_cap_rate: f64,
    pub exit_value: f64,
    pub unlevered_irr: f64,
    pub levered_irr: f64,
    pub unlevered_equity_multiple: f64,
    pub equity_multiple: f64,
    pub average_dscr: f64,
    pub min_dscr: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<DealContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DealSummary>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationIssue>>,
    pub metadata: ComputationMetadata,
}

impl EngineResult {
    fn failure(errors: Vec<ValidationIssue>, warnings: Vec<String>, start: Instant) -> Self {
        Self {
            success: false,
            context: None,
            summary: None,
            warnings,
            errors: Some(errors),
            metadata: ComputationMetadata::new(start.elapsed().as_micros() as u64),
        }
    }

    /// Metric lookup on a successful result.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.context.as_ref().and_then(|c| c.metric(name))
    }
}

/// Map a fatal module error onto the `{path, message}` error list.
fn module_issue(module: &str, error: &UnderwritingError) -> ValidationIssue {
    match error {
        UnderwritingError::InvalidInput { field, reason } if field.starts_with("modules.") => {
            ValidationIssue::new(field.clone(), reason.clone())
        }
        _ => {
            let wrapped = UnderwritingError::Module {
                module: module.to_string(),
                message: error.to_string(),
            };
            ValidationIssue::new(format!("modules.{module}"), wrapped.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every structural and range problem with `input`, deal-level first.
    pub fn validate(&self, input: &DealInput) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        input.validate(&mut issues);
        for module in pipeline() {
            if module.is_configured(input) {
                module.validate(input, &self.config, &mut issues);
            }
        }
        issues
    }

    /// [`Engine::validate`] as a `Result`.
    pub fn check(&self, input: &DealInput) -> UnderwritingResult<()> {
        let issues = self.validate(input);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(UnderwritingError::Validation(issues))
        }
    }

    /// Parse a JSON document and run it. Parse failures come back as a
    /// single validation error at `$`.
    pub fn run_json(&self, json: &str) -> EngineResult {
        match DealInput::from_json_str(json) {
            Ok(input) => self.run(&input),
            Err(e) => EngineResult::failure(
                vec![ValidationIssue::new("$", e.to_string())],
                Vec::new(),
                Instant::now(),
            ),
        }
    }

    pub fn run_value(&self, value: serde_json::Value) -> EngineResult {
        match DealInput::from_value(value) {
            Ok(input) => self.run(&input),
            Err(e) => EngineResult::failure(
                vec![ValidationIssue::new("$", e.to_string())],
                Vec::new(),
                Instant::now(),
            ),
        }
    }

    pub fn run(&self, input: &DealInput) -> EngineResult {
        let start = Instant::now();

        let issues = self.validate(input);
        if !issues.is_empty() {
            info!("validation failed with {} issue(s)", issues.len());
            return EngineResult::failure(issues, Vec::new(), start);
        }

        let timeline = match input.timeline() {
            Ok(t) => t,
            Err(e) => {
                return EngineResult::failure(
                    vec![ValidationIssue::new("deal", e.to_string())],
                    Vec::new(),
                    start,
                )
            }
        };
        let mut ctx = DealContext::new(timeline);

        for module in pipeline() {
            if !module.is_configured(input) {
                debug!("skipping {}: not configured", module.name());
                continue;
            }
            let outcome = module
                .requires()
                .iter()
                .find(|key| !ctx.contains(key))
                .map_or(Ok(()), |missing| {
                    Err(UnderwritingError::Sequencing {
                        module: module.name().to_string(),
                        missing: missing.to_string(),
                    })
                })
                .and_then(|_| {
                    debug!("running {}", module.name());
                    module.compute(input, &self.config, &mut ctx)
                });
            if let Err(e) = outcome {
                info!("module {} failed: {e}", module.name());
                let warnings = ctx.take_warnings();
                return EngineResult::failure(vec![module_issue(module.name(), &e)], warnings, start);
            }
        }

        let summary = match summarize(input, &mut ctx) {
            Ok(s) => s,
            Err(e) => {
                let warnings = ctx.take_warnings();
                return EngineResult::failure(vec![module_issue("summary", &e)], warnings, start);
            }
        };
        let warnings = ctx.take_warnings();
        info!(
            "underwrote {:?}: levered IRR {:.4}, {} warning(s)",
            summary.deal_name,
            summary.levered_irr,
            warnings.len()
        );

        EngineResult {
            success: true,
            context: Some(ctx),
            summary: Some(summary),
            warnings,
            errors: None,
            metadata: ComputationMetadata::new(start.elapsed().as_micros() as u64),
        }
    }
}

/// Run with the default configuration.
pub fn run_deal(input: &DealInput) -> EngineResult {
    Engine::default().run(input)
}

fn summarize(input: &DealInput, ctx: &mut DealContext) -> UnderwritingResult<DealSummary> {
    let close = ctx.timeline().close_month() as usize;
    let noi_year1 = ctx.require_series(keys::NOI, "summary")?.forward12(close)?;
    let purchase_price = input.modules.acquisition.purchase_price();
    let going_in_cap_rate = noi_year1 / purchase_price;
    ctx.set_metric(keys::NOI_YEAR1, noi_year1)?;
    ctx.set_metric(keys::GOING_IN_CAP_RATE, going_in_cap_rate)?;

    let m = |name: &str| ctx.metric(name).unwrap_or(0.0);
    Ok(DealSummary {
        deal_name: input.deal.name.clone(),
        currency: input.deal.currency.to_string(),
        hold_period_months: input.deal.hold_period_months,
        exit_month: input.exit_month(),
        purchase_price,
        total_project_cost: m(keys::TOTAL_PROJECT_COST),
        loan_amount: m(keys::LOAN_AMOUNT),
        total_equity: m(keys::TOTAL_EQUITY),
        noi_year1,
        going_in_cap_rate,
        exit_cap_rate: m(keys::EXIT_CAP_RATE),
        exit_value: m(keys::EXIT_VALUE),
        unlevered_irr: m(keys::UNLEVERED_IRR),
        levered_irr: m(keys::LEVERED_IRR),
        unlevered_equity_multiple: m(keys::UNLEVERED_EQUITY_MULTIPLE),
        equity_multiple: m(keys::EQUITY_MULTIPLE),
        average_dscr: m(keys::AVERAGE_DSCR),
        min_dscr: m(keys::MIN_DSCR),
    })
}
