use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use cre_underwriting_core::time_value::{
    annualize, internal_rate_of_return, internal_rate_of_return_irregular, net_present_value,
    pmt,
};
use cre_underwriting_core::to_f64;

use crate::input;

const DEFAULT_GUESS: f64 = 0.1;

/// A typed document from `--input` or stdin, if either was given.
fn read_input<T: DeserializeOwned>(
    path: Option<&str>,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        Ok(Some(input::file::read_document(path)?))
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(Some(serde_json::from_value(data)?))
    } else {
        Ok(None)
    }
}

fn to_f64_vec(values: &[Decimal]) -> Vec<f64> {
    values.iter().copied().map(to_f64).collect()
}

// ---------------------------------------------------------------------------
// IRR
// ---------------------------------------------------------------------------

/// Arguments for IRR
#[derive(Args)]
pub struct IrrArgs {
    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Periodic cash flows (comma-separated, e.g. "-100,30,30,130")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub cash_flows: Option<Vec<Decimal>>,

    /// Starting guess for the periodic rate
    #[arg(long)]
    pub guess: Option<Decimal>,

    /// Also report the rate compounded over this many periods per year
    #[arg(long)]
    pub periods_per_year: Option<u32>,
}

#[derive(Deserialize)]
struct IrrInput {
    cash_flows: Vec<Decimal>,
    #[serde(default)]
    guess: Option<Decimal>,
    #[serde(default)]
    periods_per_year: Option<u32>,
}

pub fn run_irr(args: IrrArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let irr_input = match read_input::<IrrInput>(args.input.as_deref())? {
        Some(doc) => doc,
        None => IrrInput {
            cash_flows: args
                .cash_flows
                .ok_or("--cash-flows is required (or provide --input)")?,
            guess: args.guess,
            periods_per_year: args.periods_per_year,
        },
    };

    let flows = to_f64_vec(&irr_input.cash_flows);
    let guess = irr_input.guess.map_or(DEFAULT_GUESS, to_f64);
    let irr = internal_rate_of_return(&flows, guess)?;

    let mut result = json!({ "irr": irr, "periods": flows.len() });
    if let Some(ppy) = irr_input.periods_per_year {
        result["annualized_irr"] = json!(annualize(irr, ppy));
    }
    Ok(json!({ "result": result }))
}

// ---------------------------------------------------------------------------
// XIRR
// ---------------------------------------------------------------------------

/// Arguments for XIRR
#[derive(Args)]
pub struct XirrArgs {
    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Cash flows (comma-separated)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub cash_flows: Option<Vec<Decimal>>,

    /// Dates matching each cash flow (comma-separated, YYYY-MM-DD)
    #[arg(long, value_delimiter = ',')]
    pub dates: Option<Vec<NaiveDate>>,

    /// Starting guess for the annual rate
    #[arg(long)]
    pub guess: Option<Decimal>,
}

#[derive(Deserialize)]
struct XirrInput {
    cash_flows: Vec<Decimal>,
    dates: Vec<NaiveDate>,
    #[serde(default)]
    guess: Option<Decimal>,
}

pub fn run_xirr(args: XirrArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let xirr_input = match read_input::<XirrInput>(args.input.as_deref())? {
        Some(doc) => doc,
        None => XirrInput {
            cash_flows: args
                .cash_flows
                .ok_or("--cash-flows is required (or provide --input)")?,
            dates: args.dates.ok_or("--dates is required (or provide --input)")?,
            guess: args.guess,
        },
    };

    let flows = to_f64_vec(&xirr_input.cash_flows);
    let guess = xirr_input.guess.map_or(DEFAULT_GUESS, to_f64);
    let xirr = internal_rate_of_return_irregular(&flows, &xirr_input.dates, guess)?;
    Ok(json!({ "result": { "xirr": xirr, "periods": flows.len() } }))
}

// ---------------------------------------------------------------------------
// NPV
// ---------------------------------------------------------------------------

/// Arguments for NPV
#[derive(Args)]
pub struct NpvArgs {
    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Periodic discount rate
    #[arg(long)]
    pub rate: Option<Decimal>,

    /// Cash flows, the first undiscounted (comma-separated)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub cash_flows: Option<Vec<Decimal>>,
}

#[derive(Deserialize)]
struct NpvInput {
    rate: Decimal,
    cash_flows: Vec<Decimal>,
}

pub fn run_npv(args: NpvArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let npv_input = match read_input::<NpvInput>(args.input.as_deref())? {
        Some(doc) => doc,
        None => NpvInput {
            rate: args.rate.ok_or("--rate is required (or provide --input)")?,
            cash_flows: args
                .cash_flows
                .ok_or("--cash-flows is required (or provide --input)")?,
        },
    };

    let npv = net_present_value(to_f64(npv_input.rate), &to_f64_vec(&npv_input.cash_flows))?;
    Ok(json!({ "result": { "npv": npv, "rate": npv_input.rate } }))
}

// ---------------------------------------------------------------------------
// PMT
// ---------------------------------------------------------------------------

/// Arguments for a level annuity payment (spreadsheet sign convention)
#[derive(Args)]
pub struct PmtArgs {
    /// Periodic rate, e.g. 0.005 for 6% a year paid monthly
    #[arg(long)]
    pub rate: Decimal,

    /// Number of periods
    #[arg(long)]
    pub nper: u32,

    /// Present value (loan principal)
    #[arg(long, allow_hyphen_values = true)]
    pub present_value: Decimal,

    /// Balance remaining after the last payment
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub future_value: Decimal,
}

pub fn run_pmt(args: PmtArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let payment = pmt(
        to_f64(args.rate),
        args.nper,
        to_f64(args.present_value),
        to_f64(args.future_value),
    )?;
    Ok(json!({ "result": { "payment": payment, "total_paid": -payment * args.nper as f64 } }))
}
