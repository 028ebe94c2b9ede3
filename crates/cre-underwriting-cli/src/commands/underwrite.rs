use clap::Args;
use serde_json::{json, Value};

use cre_underwriting_core::{DealInput, Engine, EngineConfig, UnderwritingError, ValidationIssue};

use crate::input;

/// Arguments for a full underwriting run
#[derive(Args)]
pub struct UnderwriteArgs {
    /// Path to a JSON or YAML deal document (otherwise read from stdin)
    #[arg(long)]
    pub input: Option<String>,

    /// Path to a JSON or YAML engine configuration
    #[arg(long)]
    pub config: Option<String>,

    /// Include the monthly series (one CSV column per series)
    #[arg(long)]
    pub series: bool,

    /// Include the full deal context: series, metrics, rent roll, loan schedule
    #[arg(long)]
    pub full: bool,
}

/// Arguments for deal validation
#[derive(Args)]
pub struct ValidateArgs {
    /// Path to a JSON or YAML deal document (otherwise read from stdin)
    #[arg(long)]
    pub input: Option<String>,
}

fn read_deal(path: Option<&str>) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        input::file::read_document_value(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(data)
    } else {
        Err("--input <deal.json|deal.yaml> or stdin required".into())
    }
}

fn load_engine(config: Option<&str>) -> Result<Engine, Box<dyn std::error::Error>> {
    let config: EngineConfig = match config {
        Some(path) => input::file::read_document(path)?,
        None => EngineConfig::default(),
    };
    Ok(Engine::new(config))
}

fn describe_issues(headline: &str, issues: &[ValidationIssue]) -> String {
    let mut message = format!("{headline} ({} issue(s))", issues.len());
    for issue in issues {
        message.push_str("\n  ");
        message.push_str(&issue.to_string());
    }
    message
}

pub fn run_underwrite(args: UnderwriteArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let engine = load_engine(args.config.as_deref())?;
    let deal = read_deal(args.input.as_deref())?;
    let result = engine.run_value(deal);

    if !result.success {
        for warning in &result.warnings {
            log::warn!("{warning}");
        }
        let issues = result.errors.unwrap_or_default();
        return Err(describe_issues("deal could not be underwritten", &issues).into());
    }

    let mut envelope = json!({
        "result": result.summary,
        "warnings": result.warnings,
        "metadata": result.metadata,
    });
    if let Some(ctx) = &result.context {
        if let Some(grid) = &ctx.artifacts().scenarios {
            envelope["scenarios"] = serde_json::to_value(&grid.cells)?;
        }
        if args.series {
            envelope["series"] = serde_json::to_value(ctx.all_series())?;
        }
        if args.full {
            envelope["context"] = serde_json::to_value(ctx)?;
        }
    }
    Ok(envelope)
}

pub fn run_validate(args: ValidateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let value = read_deal(args.input.as_deref())?;
    let deal = DealInput::from_value(value)?;
    match Engine::default().check(&deal) {
        Ok(()) => Ok(json!({
            "result": {
                "valid": true,
                "deal": deal.deal.name,
                "hold_period_months": deal.deal.hold_period_months,
                "exit_month": deal.exit_month(),
            }
        })),
        Err(UnderwritingError::Validation(issues)) => {
            Err(describe_issues("deal is invalid", &issues).into())
        }
        Err(e) => Err(e.into()),
    }
}
