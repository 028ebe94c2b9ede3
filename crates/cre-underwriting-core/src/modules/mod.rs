//! Deal modules and the fixed order they run in.
//!
//! Each module reads upstream entries from the [`DealContext`], publishes its
//! own, and never mutates what another module wrote.

pub mod debt;
pub mod exit;
pub mod lease;
pub mod operating;
pub mod scenario;
pub mod waterfall;

use crate::context::DealContext;
use crate::deal::DealInput;
use crate::engine::EngineConfig;
use crate::error::ValidationIssue;
use crate::UnderwritingResult;

pub trait DealModule: Sync {
    fn name(&self) -> &'static str;

    /// Context entries that must be present before [`DealModule::compute`].
    fn requires(&self) -> &'static [&'static str];

    /// Optional modules return false when their input block is absent.
    fn is_configured(&self, _input: &DealInput) -> bool {
        true
    }

    /// Append every problem with this module's input block.
    fn validate(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        issues: &mut Vec<ValidationIssue>,
    );

    fn compute(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        ctx: &mut DealContext,
    ) -> UnderwritingResult<()>;
}

static PIPELINE: [&dyn DealModule; 6] = [
    &lease::LeaseModule,
    &operating::OperatingModule,
    &debt::DebtModule,
    &exit::ExitModule,
    &waterfall::WaterfallModule,
    &scenario::ScenarioModule,
];

/// Registered modules in execution order.
pub fn pipeline() -> &'static [&'static dyn DealModule] {
    &PIPELINE
}

/// Monthly growth factor for an annual rate stepped on each anniversary.
pub(crate) fn anniversary_growth(annual_rate: f64, months_elapsed: usize) -> f64 {
    (1.0 + annual_rate).powi((months_elapsed / 12) as i32)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    use crate::deal::DealInput;

    /// 60-month single-tenant office deal used across module tests.
    pub fn office_deal() -> DealInput {
        let value = json!({
            "deal": {
                "name": "Test Office",
                "analysis_start": "2025-01-01",
                "hold_period_months": 60,
                "rentable_area": "50000"
            },
            "modules": {
                "acquisition": { "purchase_price": "8500000" },
                "lease": {
                    "tenants": [{
                        "name": "Anchor",
                        "area": "50000",
                        "start": "2025-01-01",
                        "term_months": 120,
                        "base_rent": "25",
                        "escalation_rate": "0.03"
                    }]
                },
                "operating": {
                    "vacancy_rate": "0.05",
                    "credit_loss_rate": "0.01",
                    "expenses": [
                        { "name": "Taxes", "category": "taxes", "amount": "150000", "growth_rate": "0.02" },
                        { "name": "Insurance", "category": "insurance", "amount": "40000" }
                    ]
                },
                "debt": {
                    "sizing": { "mode": "ltv", "ltv": "0.65" },
                    "rate": { "type": "fixed", "rate": "0.06" },
                    "amortization_months": 300,
                    "term_months": 120
                },
                "exit": { "exit_cap_rate": "0.075", "sale_cost_rate": "0.02" }
            }
        });
        serde_json::from_value(value).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order() {
        let names: Vec<&str> = pipeline().iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec!["lease", "operating", "debt", "exit", "waterfall", "scenario"]
        );
    }

    #[test]
    fn test_optional_modules_follow_their_input() {
        let deal = fixtures::office_deal();
        let configured: Vec<&str> = pipeline()
            .iter()
            .filter(|m| m.is_configured(&deal))
            .map(|m| m.name())
            .collect();
        assert_eq!(configured, vec!["lease", "operating", "debt", "exit"]);
    }

    #[test]
    fn test_anniversary_growth_steps_yearly() {
        assert_eq!(anniversary_growth(0.03, 11), 1.0);
        assert!((anniversary_growth(0.03, 12) - 1.03).abs() < 1e-12);
        assert!((anniversary_growth(0.03, 35) - 1.0609).abs() < 1e-12);
    }
}
