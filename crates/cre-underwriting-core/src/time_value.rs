use chrono::NaiveDate;
use log::debug;

use crate::error::UnderwritingError;
use crate::root_finding::{find_root, SolverConfig};
use crate::UnderwritingResult;

/// Alternate starting points tried, in order, after the caller's guess.
const IRR_RETRY_GUESSES: [f64; 9] = [0.1, 0.2, 0.05, -0.5, 0.5, 1.0, 2.0, 5.0, 10.0];

const DAYS_PER_YEAR: f64 = 365.0;

/// Shared preconditions for every cash-flow consuming entry point.
fn check_cash_flows(function: &str, cash_flows: &[f64]) -> UnderwritingResult<()> {
    if cash_flows.len() < 2 {
        return Err(UnderwritingError::InsufficientData(format!(
            "{function} requires at least 2 cash flows"
        )));
    }
    if let Some(index) = cash_flows.iter().position(|cf| !cf.is_finite()) {
        return Err(UnderwritingError::NonFiniteValue {
            context: format!("{function} cash flows"),
            index,
        });
    }
    let has_positive = cash_flows.iter().any(|cf| *cf > 0.0);
    let has_negative = cash_flows.iter().any(|cf| *cf < 0.0);
    if !has_positive || !has_negative {
        return Err(UnderwritingError::invalid(
            "cash_flows",
            format!("{function} requires at least one positive and one negative cash flow"),
        ));
    }
    Ok(())
}

/// Net Present Value: `sum(flow[t] / (1 + rate)^t)`, first flow undiscounted.
pub fn net_present_value(rate: f64, cash_flows: &[f64]) -> UnderwritingResult<f64> {
    if !rate.is_finite() || rate <= -1.0 {
        return Err(UnderwritingError::invalid(
            "rate",
            "Discount rate must be finite and greater than -100%",
        ));
    }
    if let Some(index) = cash_flows.iter().position(|cf| !cf.is_finite()) {
        return Err(UnderwritingError::NonFiniteValue {
            context: "NPV cash flows".into(),
            index,
        });
    }

    let one_plus_r = 1.0 + rate;
    let mut discount = 1.0;
    let mut result = 0.0;
    for (t, cf) in cash_flows.iter().enumerate() {
        if t > 0 {
            discount *= one_plus_r;
        }
        result += cf / discount;
    }

    if !result.is_finite() {
        return Err(UnderwritingError::DivisionByZero {
            context: "NPV discount factor".into(),
        });
    }
    Ok(result)
}

/// Periodic Internal Rate of Return with the default solver settings.
pub fn internal_rate_of_return(cash_flows: &[f64], guess: f64) -> UnderwritingResult<f64> {
    internal_rate_of_return_with(cash_flows, guess, &SolverConfig::default())
}

/// Periodic Internal Rate of Return.
///
/// Each attempt runs the full Newton → bracket → bisection chain; when it
/// fails the solve is retried from each of the alternate guesses before the
/// last error is returned.
pub fn internal_rate_of_return_with(
    cash_flows: &[f64],
    guess: f64,
    config: &SolverConfig,
) -> UnderwritingResult<f64> {
    check_cash_flows("IRR", cash_flows)?;

    let f = |r: f64| {
        let base = 1.0 + r;
        cash_flows
            .iter()
            .enumerate()
            .map(|(t, cf)| cf * base.powi(-(t as i32)))
            .sum::<f64>()
    };
    let df = |r: f64| {
        let base = 1.0 + r;
        cash_flows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(t, cf)| -(t as f64) * cf * base.powi(-(t as i32) - 1))
            .sum::<f64>()
    };

    solve_with_retries("IRR", f, df, guess, config)
}

/// Extended IRR for irregularly dated cash flows (365-day year from the
/// first flow's date).
pub fn internal_rate_of_return_irregular(
    cash_flows: &[f64],
    dates: &[NaiveDate],
    guess: f64,
) -> UnderwritingResult<f64> {
    internal_rate_of_return_irregular_with(cash_flows, dates, guess, &SolverConfig::default())
}

pub fn internal_rate_of_return_irregular_with(
    cash_flows: &[f64],
    dates: &[NaiveDate],
    guess: f64,
    config: &SolverConfig,
) -> UnderwritingResult<f64> {
    check_cash_flows("XIRR", cash_flows)?;
    if dates.len() != cash_flows.len() {
        return Err(UnderwritingError::ShapeMismatch {
            expected: cash_flows.len(),
            actual: dates.len(),
        });
    }

    let base_date = dates[0];
    let mut year_fractions = Vec::with_capacity(dates.len());
    for date in dates {
        let days = (*date - base_date).num_days();
        if days < 0 {
            return Err(UnderwritingError::DateError(format!(
                "XIRR date {date} precedes the first cash flow date {base_date}"
            )));
        }
        year_fractions.push(days as f64 / DAYS_PER_YEAR);
    }

    let f = |r: f64| {
        let base = 1.0 + r;
        cash_flows
            .iter()
            .zip(&year_fractions)
            .map(|(cf, yf)| cf / base.powf(*yf))
            .sum::<f64>()
    };
    let df = |r: f64| {
        let base = 1.0 + r;
        cash_flows
            .iter()
            .zip(&year_fractions)
            .map(|(cf, yf)| -yf * cf / base.powf(yf + 1.0))
            .sum::<f64>()
    };

    solve_with_retries("XIRR", f, df, guess, config)
}

fn solve_with_retries<F, D>(
    name: &str,
    f: F,
    df: D,
    guess: f64,
    config: &SolverConfig,
) -> UnderwritingResult<f64>
where
    F: Fn(f64) -> f64,
    D: Fn(f64) -> f64,
{
    let mut last_error = match find_root(name, &f, &df, guess, config) {
        Ok(rate) => return Ok(rate),
        Err(e) => e,
    };
    for alternate in IRR_RETRY_GUESSES {
        debug!("{name}: retrying from guess {alternate} after: {last_error}");
        match find_root(name, &f, &df, alternate, config) {
            Ok(rate) => return Ok(rate),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

/// Convert a periodic rate to an effective annual rate.
pub fn annualize(periodic_rate: f64, periods_per_year: u32) -> f64 {
    (1.0 + periodic_rate).powi(periods_per_year as i32) - 1.0
}

/// Present Value (spreadsheet sign convention: money paid out is negative).
pub fn pv(rate: f64, nper: u32, pmt: f64, fv: f64) -> UnderwritingResult<f64> {
    if rate == 0.0 {
        return Ok(-(pmt * nper as f64 + fv));
    }

    let factor = (1.0 + rate).powi(nper as i32);
    if factor == 0.0 || !factor.is_finite() {
        return Err(UnderwritingError::DivisionByZero {
            context: "PV factor".into(),
        });
    }

    let annuity_factor = (1.0 - 1.0 / factor) / rate;
    Ok(-(pmt * annuity_factor + fv / factor))
}

/// Payment (spreadsheet sign convention).
pub fn pmt(rate: f64, nper: u32, present_value: f64, future_value: f64) -> UnderwritingResult<f64> {
    if nper == 0 {
        return Err(UnderwritingError::invalid(
            "nper",
            "Number of periods must be > 0",
        ));
    }

    if rate == 0.0 {
        return Ok(-(present_value + future_value) / nper as f64);
    }

    let factor = (1.0 + rate).powi(nper as i32);
    let annuity_factor = (factor - 1.0) / rate;

    if annuity_factor == 0.0 || !annuity_factor.is_finite() {
        return Err(UnderwritingError::DivisionByZero {
            context: "PMT annuity factor".into(),
        });
    }

    Ok(-(present_value * factor + future_value) / annuity_factor)
}

/// Level payment that amortizes `principal` over `periods` at periodic `rate`.
pub fn annuity_payment(rate: f64, periods: u32, principal: f64) -> UnderwritingResult<f64> {
    Ok(-pmt(rate, periods, principal, 0.0)?)
}

/// Principal supported by a level `payment` over `periods` at periodic `rate`.
pub fn present_value_of_annuity_payment(
    rate: f64,
    periods: u32,
    payment: f64,
) -> UnderwritingResult<f64> {
    if periods == 0 {
        return Err(UnderwritingError::invalid(
            "periods",
            "Number of periods must be > 0",
        ));
    }
    Ok(-pv(rate, periods, payment, 0.0)?)
}
