use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{UnderwritingError, ValidationIssue};
use crate::modules::debt::DebtInput;
use crate::modules::exit::ExitInput;
use crate::modules::lease::LeaseInput;
use crate::modules::operating::OperatingInput;
use crate::modules::scenario::ScenarioInput;
use crate::modules::waterfall::WaterfallInput;
use crate::timeline::Timeline;
use crate::types::{to_f64, Currency, Money, Rate};
use crate::UnderwritingResult;

/// Longest hold the engine accepts (50 years of months).
pub const MAX_HOLD_PERIOD_MONTHS: u32 = 600;

/// The full underwriting request: deal facts plus one block per module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealInput {
    pub deal: DealInfo,
    pub modules: ModulesInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealInfo {
    #[serde(default)]
    pub name: String,
    /// Any date inside the first analysed month
    pub analysis_start: NaiveDate,
    pub hold_period_months: u32,
    /// Month index of the sale; defaults to the end of the hold period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_month: Option<u32>,
    /// Month index at which the acquisition closes and the loan funds
    #[serde(default)]
    pub close_month: u32,
    /// Net rentable area of the asset
    pub rentable_area: Money,
    #[serde(default)]
    pub currency: Currency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesInput {
    pub acquisition: AcquisitionInput,
    pub lease: LeaseInput,
    pub operating: OperatingInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debt: Option<DebtInput>,
    pub exit: ExitInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waterfall: Option<WaterfallInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<ScenarioInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionInput {
    pub purchase_price: Money,
    /// Closing costs as a fraction of the purchase price
    #[serde(default)]
    pub closing_cost_rate: Rate,
    /// Fixed closing costs on top of the percentage
    #[serde(default)]
    pub closing_costs: Money,
    /// Day-one capital spend funded with equity
    #[serde(default)]
    pub initial_capex: Money,
}

impl AcquisitionInput {
    pub fn purchase_price(&self) -> f64 {
        to_f64(self.purchase_price)
    }

    /// Purchase price plus closing costs plus initial capex.
    pub fn total_cost(&self) -> f64 {
        to_f64(
            self.purchase_price * (Decimal::ONE + self.closing_cost_rate)
                + self.closing_costs
                + self.initial_capex,
        )
    }
}

impl DealInput {
    pub fn from_json_str(json: &str) -> UnderwritingResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> UnderwritingResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn exit_month(&self) -> u32 {
        self.deal.exit_month.unwrap_or(self.deal.hold_period_months)
    }

    pub fn rentable_area(&self) -> f64 {
        to_f64(self.deal.rentable_area)
    }

    pub fn timeline(&self) -> UnderwritingResult<Timeline> {
        Timeline::new(
            self.deal.analysis_start,
            self.deal.hold_period_months,
            self.exit_month(),
            self.deal.close_month,
        )
        .map_err(|e| match e {
            UnderwritingError::InvalidInput { field, reason } => UnderwritingError::InvalidInput {
                field: format!("deal.{field}"),
                reason,
            },
            other => other,
        })
    }

    /// Deal-level and acquisition checks. Module blocks validate themselves.
    pub fn validate(&self, issues: &mut Vec<ValidationIssue>) {
        let deal = &self.deal;
        if deal.hold_period_months == 0 {
            issues.push(ValidationIssue::new(
                "deal.hold_period_months",
                "Hold period must be at least one month",
            ));
        } else if deal.hold_period_months > MAX_HOLD_PERIOD_MONTHS {
            issues.push(ValidationIssue::new(
                "deal.hold_period_months",
                format!("Hold period may not exceed {MAX_HOLD_PERIOD_MONTHS} months"),
            ));
        }

        let exit_month = self.exit_month();
        if exit_month == 0 || exit_month > deal.hold_period_months {
            issues.push(ValidationIssue::new(
                "deal.exit_month",
                format!(
                    "Exit month must be between 1 and the hold period ({}), got {exit_month}",
                    deal.hold_period_months
                ),
            ));
        }
        if deal.close_month >= exit_month {
            issues.push(ValidationIssue::new(
                "deal.close_month",
                "Close month must precede the exit month",
            ));
        }
        if deal.rentable_area <= Decimal::ZERO {
            issues.push(ValidationIssue::new(
                "deal.rentable_area",
                "Rentable area must be positive",
            ));
        }

        let acq = &self.modules.acquisition;
        if acq.purchase_price <= Decimal::ZERO {
            issues.push(ValidationIssue::new(
                "modules.acquisition.purchase_price",
                "Purchase price must be positive",
            ));
        }
        if acq.closing_cost_rate < Decimal::ZERO || acq.closing_cost_rate >= Decimal::ONE {
            issues.push(ValidationIssue::new(
                "modules.acquisition.closing_cost_rate",
                "Closing cost rate must be in [0, 1)",
            ));
        }
        if acq.closing_costs < Decimal::ZERO {
            issues.push(ValidationIssue::new(
                "modules.acquisition.closing_costs",
                "Closing costs cannot be negative",
            ));
        }
        if acq.initial_capex < Decimal::ZERO {
            issues.push(ValidationIssue::new(
                "modules.acquisition.initial_capex",
                "Initial capex cannot be negative",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::fixtures::office_deal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exit_defaults_to_hold_period() {
        let deal = office_deal();
        assert_eq!(deal.exit_month(), 60);
        let timeline = deal.timeline().unwrap();
        assert_eq!(timeline.exit_month(), 60);
        assert_eq!(timeline.len(), 60);
    }

    #[test]
    fn test_total_cost_includes_closing_and_capex() {
        let mut deal = office_deal();
        deal.modules.acquisition.closing_cost_rate = dec!(0.02);
        deal.modules.acquisition.closing_costs = dec!(15000);
        deal.modules.acquisition.initial_capex = dec!(250000);
        assert_eq!(deal.modules.acquisition.total_cost(), 8_935_000.0);
    }

    #[test]
    fn test_deal_level_issues_collected() {
        let mut deal = office_deal();
        deal.deal.exit_month = Some(61);
        deal.deal.rentable_area = Decimal::ZERO;
        deal.modules.acquisition.closing_cost_rate = dec!(1);
        let mut issues = Vec::new();
        deal.validate(&mut issues);
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "deal.exit_month",
                "deal.rentable_area",
                "modules.acquisition.closing_cost_rate"
            ]
        );
    }

    #[test]
    fn test_timeline_errors_carry_deal_prefix() {
        let mut deal = office_deal();
        deal.deal.close_month = 60;
        match deal.timeline() {
            Err(UnderwritingError::InvalidInput { field, .. }) => {
                assert_eq!(field, "deal.close_month")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
