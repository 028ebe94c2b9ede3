use chrono::NaiveDate;
use cre_underwriting_core::root_finding::{find_root, SolverConfig};
use cre_underwriting_core::time_value::{
    annualize, internal_rate_of_return, internal_rate_of_return_irregular, net_present_value, pmt,
    pv,
};
use cre_underwriting_core::UnderwritingError;

// ===========================================================================
// IRR / NPV
// ===========================================================================

#[test]
fn test_single_period_irr() {
    let irr = internal_rate_of_return(&[-100.0, 110.0], 0.1).unwrap();
    assert!((irr - 0.10).abs() < 1e-10);
    assert!(net_present_value(0.10, &[-100.0, 110.0]).unwrap().abs() < 1e-10);
}

#[test]
fn test_irr_residual_is_small() {
    let vectors: [&[f64]; 4] = [
        &[-1000.0, 300.0, 400.0, 500.0],
        &[-100.0, 0.0, 0.0, 0.0, 0.0, 0.0, 400.0],
        &[-100.0, 10.0, 10.0, 10.0, 10.0, 60.0],
        &[-1.0, 9.0],
    ];
    for flows in vectors {
        let r = internal_rate_of_return(flows, 0.1).unwrap();
        let npv = net_present_value(r, flows).unwrap();
        assert!(npv.abs() < 1e-8, "flows {flows:?}: r={r}, npv={npv}");
    }
}

#[test]
fn test_irr_residual_scales_with_notional() {
    // Rounding in a 5M-notional NPV sum alone is on the order of 1e-9
    let flows = [-5_000_000.0, 350_000.0, 360_000.0, 370_000.0, 6_100_000.0];
    let r = internal_rate_of_return(&flows, 0.1).unwrap();
    let npv = net_present_value(r, &flows).unwrap();
    assert!(npv.abs() < 1e-8 * flows[0].abs(), "r={r}, npv={npv}");
}

#[test]
fn test_irr_from_poor_guess_still_converges() {
    // Newton from 5.0 wanders; the bracket stage finishes the job
    let flows = [-1000.0, 100.0, 100.0, 100.0, 1100.0];
    let r = internal_rate_of_return(&flows, 5.0).unwrap();
    assert!((r - 0.10).abs() < 1e-9);
}

#[test]
fn test_irr_requires_sign_change() {
    assert!(internal_rate_of_return(&[100.0, 50.0], 0.1).is_err());
    assert!(internal_rate_of_return(&[-100.0], 0.1).is_err());
    assert!(matches!(
        internal_rate_of_return(&[-100.0, f64::NAN], 0.1),
        Err(UnderwritingError::NonFiniteValue { .. })
    ));
}

#[test]
fn test_monthly_irr_annualizes() {
    let mut flows = vec![-100.0];
    flows.extend(std::iter::repeat(1.0).take(11));
    flows.push(101.0);
    let monthly = internal_rate_of_return(&flows, 0.01).unwrap();
    assert!((monthly - 0.01).abs() < 1e-10);
    assert!((annualize(monthly, 12) - 0.126_825_030_131_969_7).abs() < 1e-9);
}

#[test]
fn test_xirr_one_year_apart() {
    let dates = [
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
    ];
    let r = internal_rate_of_return_irregular(&[-100.0, 112.0], &dates, 0.1).unwrap();
    assert!((r - 0.12).abs() < 1e-9);
}

#[test]
fn test_xirr_rejects_unordered_dates() {
    let dates = [
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
    ];
    assert!(matches!(
        internal_rate_of_return_irregular(&[-100.0, 112.0], &dates, 0.1),
        Err(UnderwritingError::DateError(_))
    ));
}

// ===========================================================================
// Root finding
// ===========================================================================

#[test]
fn test_find_root_zero_derivative_falls_back() {
    // f'(0) = 0 defeats Newton from the starting guess
    let f = |x: f64| x * x - 4.0;
    let df = |x: f64| 2.0 * x;
    let root = find_root("test", &f, &df, 0.0, &SolverConfig::default()).unwrap();
    assert!((root - 2.0).abs() < 1e-9);
}

#[test]
fn test_find_root_without_bracket_fails() {
    let f = |x: f64| x * x + 1.0;
    let df = |x: f64| 2.0 * x;
    let err = find_root("test", &f, &df, 0.5, &SolverConfig::default()).unwrap_err();
    assert!(err.is_numerical());
}

// ===========================================================================
// Annuities
// ===========================================================================

#[test]
fn test_pmt_and_pv_are_inverse() {
    let payment = pmt(0.06 / 12.0, 360, 1_000_000.0, 0.0).unwrap();
    assert!((payment + 5995.505_251_527_5).abs() < 1e-4);
    let principal = pv(0.06 / 12.0, 360, payment, 0.0).unwrap();
    assert!((principal - 1_000_000.0).abs() < 1e-6);
}

#[test]
fn test_zero_rate_annuity() {
    assert_eq!(pmt(0.0, 10, 1000.0, 0.0).unwrap(), -100.0);
    assert_eq!(pv(0.0, 10, -100.0, 0.0).unwrap(), 1000.0);
}
