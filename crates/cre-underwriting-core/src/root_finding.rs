//! One-dimensional root finding with a three-tier fallback.
//!
//! 1. Newton-Raphson from the caller's guess, iterates clamped to the bounds.
//! 2. Bracket discovery over the bound range, then Brent's method
//!    (inverse quadratic interpolation with bisection safeguards).
//! 3. Plain bisection over the same bracket if Brent's method fails.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::UnderwritingError;
use crate::UnderwritingResult;

/// Bounds, tolerances and iteration limits for [`find_root`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Accept when `|f(x)| < tolerance` or successive iterates differ by less.
    pub tolerance: f64,
    pub max_newton_iterations: u32,
    /// Number of equal sub-intervals scanned when looking for a sign change.
    pub bracket_scan_intervals: u32,
    /// Iteration cap for Brent's method and for bisection.
    pub max_bracket_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            lower_bound: -0.99,
            upper_bound: 10.0,
            tolerance: 1e-10,
            max_newton_iterations: 50,
            bracket_scan_intervals: 200,
            max_bracket_iterations: 200,
        }
    }
}

/// Result of the derivative-based stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NewtonOutcome {
    Converged(f64),
    /// Derivative was zero or non-finite at `at`.
    DerivativeFailure { at: f64 },
    /// The function itself evaluated to a non-finite value at `at`.
    NonFiniteValue { at: f64 },
    NotConverged { last: f64, residual: f64 },
}

/// Why Brent's method gave up on a bracket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BracketFailure {
    NotBracketed,
    NonFiniteValue { at: f64 },
    MaxIterations { last: f64 },
}

/// Find a root of `f` inside the configured bounds.
///
/// `name` only labels errors and log lines.
pub fn find_root<F, D>(
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
    match newton(&f, &df, guess, config) {
        NewtonOutcome::Converged(root) => return Ok(root),
        outcome => debug!("{name}: newton search from {guess} failed ({outcome:?}); bracketing"),
    }

    let (a, b) = find_bracket(&f, config).ok_or_else(|| UnderwritingError::NoBracket {
        function: name.to_string(),
        lower: config.lower_bound,
        upper: config.upper_bound,
    })?;

    match brent(&f, a, b, config) {
        Ok(root) => Ok(root),
        Err(failure) => {
            debug!("{name}: brent failed on [{a}, {b}] ({failure:?}); bisecting");
            bisection(name, &f, a, b, config)
        }
    }
}

/// Newton-Raphson bounded to `[lower_bound, upper_bound]`.
pub fn newton<F, D>(f: &F, df: &D, guess: f64, config: &SolverConfig) -> NewtonOutcome
where
    F: Fn(f64) -> f64,
    D: Fn(f64) -> f64,
{
    let (lo, hi) = (config.lower_bound, config.upper_bound);
    let mut x = if guess.is_finite() { guess.clamp(lo, hi) } else { 0.0 };
    let mut pinned_steps = 0u32;
    let mut residual = f64::NAN;

    for _ in 0..config.max_newton_iterations {
        let fx = f(x);
        if !fx.is_finite() {
            return NewtonOutcome::NonFiniteValue { at: x };
        }
        residual = fx;
        if fx.abs() < config.tolerance {
            return NewtonOutcome::Converged(x);
        }

        let dfx = df(x);
        if !dfx.is_finite() || dfx == 0.0 {
            return NewtonOutcome::DerivativeFailure { at: x };
        }

        let raw = x - fx / dfx;
        if !raw.is_finite() {
            return NewtonOutcome::DerivativeFailure { at: x };
        }
        let next = raw.clamp(lo, hi);
        let clamped = next != raw;

        // Pinned against a bound twice in a row: the root lies outside.
        if clamped {
            pinned_steps += 1;
            if pinned_steps >= 2 {
                return NewtonOutcome::NotConverged { last: next, residual };
            }
        } else {
            pinned_steps = 0;
        }

        if (next - x).abs() < config.tolerance {
            if clamped {
                return NewtonOutcome::NotConverged { last: next, residual };
            }
            return NewtonOutcome::Converged(next);
        }
        x = next;
    }

    NewtonOutcome::NotConverged { last: x, residual }
}

/// Locate an interval with a sign change: the bounds themselves first, then
/// a scan over equal sub-intervals. Non-finite samples are skipped.
pub fn find_bracket<F>(f: &F, config: &SolverConfig) -> Option<(f64, f64)>
where
    F: Fn(f64) -> f64,
{
    let (lo, hi) = (config.lower_bound, config.upper_bound);
    let f_lo = f(lo);
    let f_hi = f(hi);
    if f_lo.is_finite() && f_hi.is_finite() && f_lo * f_hi <= 0.0 {
        return Some((lo, hi));
    }

    let intervals = config.bracket_scan_intervals.max(1);
    let width = (hi - lo) / intervals as f64;
    let mut prev: Option<(f64, f64)> = f_lo.is_finite().then_some((lo, f_lo));

    for i in 1..=intervals {
        let x = if i == intervals { hi } else { lo + width * i as f64 };
        let fx = if i == intervals { f_hi } else { f(x) };
        if !fx.is_finite() {
            continue;
        }
        if let Some((px, pf)) = prev {
            if pf * fx <= 0.0 {
                return Some((px, x));
            }
        }
        prev = Some((x, fx));
    }
    None
}

/// Brent's method on a sign-changing bracket `[a, b]`.
pub fn brent<F>(f: &F, a: f64, b: f64, config: &SolverConfig) -> Result<f64, BracketFailure>
where
    F: Fn(f64) -> f64,
{
    let tol = config.tolerance;
    let (mut a, mut b, mut c) = (a, b, b);
    let mut fa = f(a);
    let mut fb = f(b);
    if !fa.is_finite() {
        return Err(BracketFailure::NonFiniteValue { at: a });
    }
    if !fb.is_finite() {
        return Err(BracketFailure::NonFiniteValue { at: b });
    }
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa * fb > 0.0 {
        return Err(BracketFailure::NotBracketed);
    }

    let mut fc = fb;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..config.max_bracket_iterations {
        if fb * fc > 0.0 {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        // Interval check at machine precision; the residual check below is
        // what normally terminates.
        let tol1 = 2.0 * f64::EPSILON * b.abs().max(1e-3);
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb.abs() < tol {
            return Ok(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Attempt inverse quadratic interpolation (secant when a == c)
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let qa = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * qa * (qa - r) - (b - a) * (r - 1.0)),
                    (qa - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol1 { d } else { tol1.copysign(xm) };
        fb = f(b);
        if !fb.is_finite() {
            return Err(BracketFailure::NonFiniteValue { at: b });
        }
    }

    Err(BracketFailure::MaxIterations { last: b })
}

/// Plain bisection on `[a, b]`. After the iteration cap the midpoint of the
/// remaining interval is returned.
pub fn bisection<F>(
    name: &str,
    f: &F,
    a: f64,
    b: f64,
    config: &SolverConfig,
) -> UnderwritingResult<f64>
where
    F: Fn(f64) -> f64,
{
    let (mut lo, mut hi) = (a.min(b), a.max(b));
    let mut f_lo = f(lo);
    let f_hi = f(hi);
    if f_lo == 0.0 {
        return Ok(lo);
    }
    if f_hi == 0.0 {
        return Ok(hi);
    }
    if !f_lo.is_finite() || !f_hi.is_finite() || f_lo * f_hi > 0.0 {
        return Err(UnderwritingError::NoBracket {
            function: name.to_string(),
            lower: lo,
            upper: hi,
        });
    }

    for i in 0..config.max_bracket_iterations {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if !f_mid.is_finite() {
            return Err(UnderwritingError::ConvergenceFailure {
                function: name.to_string(),
                iterations: i,
                last_delta: f_mid,
            });
        }
        if f_mid == 0.0 || mid <= lo || mid >= hi {
            return Ok(mid);
        }
        if f_lo * f_mid < 0.0 {
            hi = mid;
        } else {
            lo = mid;
            f_lo = f_mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SolverConfig {
        SolverConfig::default()
    }

    #[test]
    fn test_newton_converges_on_smooth_function() {
        let f = |x: f64| x * x - 0.25;
        let df = |x: f64| 2.0 * x;
        match newton(&f, &df, 1.0, &cfg()) {
            NewtonOutcome::Converged(r) => assert!((r - 0.5).abs() < 1e-9),
            other => panic!("expected convergence, got {other:?}"),
        }
    }

    #[test]
    fn test_newton_reports_zero_derivative() {
        let f = |x: f64| x * x - 0.25;
        let df = |_x: f64| 0.0;
        assert!(matches!(
            newton(&f, &df, 1.0, &cfg()),
            NewtonOutcome::DerivativeFailure { .. }
        ));
    }

    #[test]
    fn test_newton_pinned_outside_bounds() {
        // Root at 20, outside [-0.99, 10]
        let f = |x: f64| x - 20.0;
        let df = |_x: f64| 1.0;
        assert!(matches!(
            newton(&f, &df, 0.0, &cfg()),
            NewtonOutcome::NotConverged { .. }
        ));
    }

    #[test]
    fn test_find_root_falls_back_when_derivative_is_wrong() {
        let f = |x: f64| x.powi(3) - 0.125;
        let df = |_x: f64| f64::NAN;
        let root = find_root("cube", f, df, 0.1, &cfg()).unwrap();
        assert!((root - 0.5).abs() < 1e-8);
    }

    #[test]
    fn test_bracket_scan_finds_interior_sign_change() {
        // Same sign at both bounds, two roots near 0.3 and 0.4
        let f = |x: f64| (x - 0.3) * (x - 0.4);
        let (a, b) = find_bracket(&f, &cfg()).unwrap();
        assert!(f(a) * f(b) <= 0.0);
        assert!(a >= -0.99 && b <= 10.0);
    }

    #[test]
    fn test_no_bracket_is_an_error() {
        let f = |x: f64| x * x + 1.0;
        let df = |x: f64| 2.0 * x;
        let err = find_root("positive", f, df, 0.5, &cfg()).unwrap_err();
        assert!(matches!(err, UnderwritingError::NoBracket { .. }));
    }

    #[test]
    fn test_brent_and_bisection_agree() {
        let f = |x: f64| (x - 1.234).tanh();
        let b = brent(&f, -0.5, 5.0, &cfg()).unwrap();
        let c = bisection("tanh", &f, -0.5, 5.0, &cfg()).unwrap();
        assert!((b - 1.234).abs() < 1e-9);
        assert!((c - 1.234).abs() < 1e-9);
    }

    #[test]
    fn test_brent_rejects_unbracketed_interval() {
        let f = |x: f64| x * x + 1.0;
        assert_eq!(brent(&f, 0.0, 1.0, &cfg()), Err(BracketFailure::NotBracketed));
    }
}
