use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DealModule;
use crate::context::{keys, DealContext};
use crate::deal::DealInput;
use crate::engine::EngineConfig;
use crate::error::{UnderwritingError, ValidationIssue};
use crate::time_value::{annualize, internal_rate_of_return_with};
use crate::types::{to_f64, Rate};
use crate::UnderwritingResult;

/// A hurdle and the GP's promote above it. Accepted in the input but
/// distributions are currently pro-rata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteTier {
    pub hurdle_irr: Rate,
    pub gp_promote: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallInput {
    /// LP share of contributions and distributions
    pub lp_share: Rate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promote_tiers: Vec<PromoteTier>,
}

/// Cash flows and returns for one partner class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerReturns {
    pub share: f64,
    pub cash_flows: Vec<f64>,
    pub contributions: f64,
    pub distributions: f64,
    pub irr: Option<f64>,
    pub equity_multiple: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallSplit {
    pub lp: PartnerReturns,
    pub gp: PartnerReturns,
}

fn partner(share: f64, levered: &[f64], config: &EngineConfig) -> PartnerReturns {
    let cash_flows: Vec<f64> = levered.iter().map(|v| v * share).collect();
    let contributions: f64 = cash_flows.iter().filter(|v| **v < 0.0).map(|v| -v).sum();
    let distributions: f64 = cash_flows.iter().filter(|v| **v > 0.0).sum();
    let irr = internal_rate_of_return_with(&cash_flows, config.irr_guess, &config.solver)
        .ok()
        .map(|r| annualize(r, 12));
    PartnerReturns {
        share,
        contributions,
        distributions,
        irr,
        equity_multiple: (contributions > 0.0).then(|| distributions / contributions),
        cash_flows,
    }
}

/// Pro-rata split of the levered equity vector.
pub fn split_pro_rata(levered: &[f64], lp_share: f64, config: &EngineConfig) -> WaterfallSplit {
    WaterfallSplit {
        lp: partner(lp_share, levered, config),
        gp: partner(1.0 - lp_share, levered, config),
    }
}

pub struct WaterfallModule;

impl DealModule for WaterfallModule {
    fn name(&self) -> &'static str {
        "waterfall"
    }

    fn requires(&self) -> &'static [&'static str] {
        &[keys::LEVERED_CASH_FLOW, keys::LEVERED_IRR]
    }

    fn is_configured(&self, input: &DealInput) -> bool {
        input.modules.waterfall.is_some()
    }

    fn validate(
        &self,
        input: &DealInput,
        _config: &EngineConfig,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let Some(w) = &input.modules.waterfall else {
            return;
        };
        if w.lp_share < Decimal::ZERO || w.lp_share > Decimal::ONE {
            issues.push(ValidationIssue::new(
                "modules.waterfall.lp_share",
                "LP share must be in [0, 1]",
            ));
        }
        for (i, tier) in w.promote_tiers.iter().enumerate() {
            if tier.gp_promote < Decimal::ZERO || tier.gp_promote > Decimal::ONE {
                issues.push(ValidationIssue::new(
                    format!("modules.waterfall.promote_tiers[{i}].gp_promote"),
                    "Promote must be in [0, 1]",
                ));
            }
        }
    }

    fn compute(
        &self,
        input: &DealInput,
        config: &EngineConfig,
        ctx: &mut DealContext,
    ) -> UnderwritingResult<()> {
        let Some(w) = &input.modules.waterfall else {
            return Ok(());
        };
        let lp_share = to_f64(w.lp_share);
        if !w.promote_tiers.is_empty() {
            ctx.warn(format!(
                "{} promote tier(s) ignored; distributions split pro-rata",
                w.promote_tiers.len()
            ));
        }

        let levered = ctx.require_series(keys::LEVERED_CASH_FLOW, self.name())?;
        let lp_series = levered.multiply(lp_share)?;
        let gp_series = levered.multiply(1.0 - lp_share)?;
        let exit = ctx
            .artifacts()
            .exit
            .as_ref()
            .ok_or_else(|| UnderwritingError::Sequencing {
                module: self.name().into(),
                missing: "exit valuation".into(),
            })?;
        let split = split_pro_rata(&exit.levered_cash_flows, lp_share, config);

        ctx.set_series(keys::LP_CASH_FLOW, lp_series)?;
        ctx.set_series(keys::GP_CASH_FLOW, gp_series)?;
        if let Some(irr) = split.lp.irr {
            ctx.set_metric("lp_irr", irr)?;
        }
        if let Some(irr) = split.gp.irr {
            ctx.set_metric("gp_irr", irr)?;
        }
        if let Some(m) = split.lp.equity_multiple {
            ctx.set_metric("lp_equity_multiple", m)?;
        }
        if let Some(m) = split.gp.equity_multiple {
            ctx.set_metric("gp_equity_multiple", m)?;
        }
        ctx.artifacts_mut().waterfall = Some(split);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pro_rata_split_preserves_totals() {
        let levered = [-1000.0, 50.0, 50.0, 1200.0];
        let split = split_pro_rata(&levered, 0.9, &EngineConfig::default());
        assert!((split.lp.contributions - 900.0).abs() < 1e-9);
        assert!((split.gp.contributions - 100.0).abs() < 1e-9);
        for (i, v) in levered.iter().enumerate() {
            assert!((split.lp.cash_flows[i] + split.gp.cash_flows[i] - v).abs() < 1e-9);
        }
        // Scaling a vector leaves its IRR and multiple unchanged
        let lp_irr = split.lp.irr.unwrap();
        let gp_irr = split.gp.irr.unwrap();
        assert!((lp_irr - gp_irr).abs() < 1e-8);
        assert!((split.lp.equity_multiple.unwrap() - 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_zero_gp_share_has_no_returns() {
        let split = split_pro_rata(&[-100.0, 120.0], 1.0, &EngineConfig::default());
        assert!(split.gp.irr.is_none());
        assert!(split.gp.equity_multiple.is_none());
        assert!((split.lp.irr.unwrap() - (1.2_f64.powi(12) - 1.0)).abs() < 1e-6);
    }
}
