use chrono::NaiveDate;
use napi::Result as NapiResult;
use napi_derive::napi;
use serde::{Deserialize, Serialize};

use cre_underwriting_core::time_value::{
    internal_rate_of_return, internal_rate_of_return_irregular, net_present_value,
};
use cre_underwriting_core::{DealInput, Engine, EngineConfig};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> NapiResult<String> {
    serde_json::to_string(value).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Underwriting
// ---------------------------------------------------------------------------

/// Run the full pipeline. Invalid deals still resolve: the returned document
/// carries `success: false` and the error list.
#[napi]
pub fn underwrite(input_json: String, config_json: Option<String>) -> NapiResult<String> {
    let config: EngineConfig = match config_json {
        Some(json) => serde_json::from_str(&json).map_err(to_napi_error)?,
        None => EngineConfig::default(),
    };
    let result = Engine::new(config).run_json(&input_json);
    to_json(&result)
}

/// Validation issues as a JSON array; empty when the deal is valid.
#[napi]
pub fn validate_deal(input_json: String) -> NapiResult<String> {
    let input = DealInput::from_json_str(&input_json).map_err(to_napi_error)?;
    to_json(&Engine::default().validate(&input))
}

// ---------------------------------------------------------------------------
// Time value
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct IrrInput {
    cash_flows: Vec<f64>,
    #[serde(default = "default_guess")]
    guess: f64,
}

#[derive(Deserialize)]
struct XirrInput {
    cash_flows: Vec<f64>,
    dates: Vec<NaiveDate>,
    #[serde(default = "default_guess")]
    guess: f64,
}

#[derive(Deserialize)]
struct NpvInput {
    rate: f64,
    cash_flows: Vec<f64>,
}

#[derive(Serialize)]
struct RateOutput {
    rate: f64,
}

#[derive(Serialize)]
struct NpvOutput {
    npv: f64,
}

fn default_guess() -> f64 {
    0.1
}

#[napi]
pub fn irr(input_json: String) -> NapiResult<String> {
    let input: IrrInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let rate = internal_rate_of_return(&input.cash_flows, input.guess).map_err(to_napi_error)?;
    to_json(&RateOutput { rate })
}

#[napi]
pub fn xirr(input_json: String) -> NapiResult<String> {
    let input: XirrInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let rate = internal_rate_of_return_irregular(&input.cash_flows, &input.dates, input.guess)
        .map_err(to_napi_error)?;
    to_json(&RateOutput { rate })
}

#[napi]
pub fn npv(input_json: String) -> NapiResult<String> {
    let input: NpvInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let npv = net_present_value(input.rate, &input.cash_flows).map_err(to_napi_error)?;
    to_json(&NpvOutput { npv })
}
