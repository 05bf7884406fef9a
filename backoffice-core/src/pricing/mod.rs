//! Bond pricing collaborator.
//!
//! A pure evaluation function: interpolate a par yield off the curve,
//! build the coupon schedule, price from yield, solve the yield to
//! maturity with Newton-Raphson, and derive duration and dv01. Numeric
//! work is `f64`; callers convert at the boundary.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::str::FromStr;
use thiserror::Error;

/// Version tag echoed in every evaluated price.
pub const MODEL_VERSION: &str = "v1.0.0";

const YIELD_TOLERANCE: f64 = 1e-8;
const MAX_SOLVER_ITERATIONS: usize = 50;

/// Pricing failures.
#[derive(Error, Debug, PartialEq)]
pub enum PricingError {
    #[error("curve has no points")]
    EmptyCurve,
    #[error("instrument matured before as-of date")]
    Matured,
    #[error("no future cashflows")]
    NoCashflows,
}

/// Day count convention for year fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DayCount {
    /// ACT/ACT, approximated with a 365.25-day year
    #[default]
    ActAct,
    Act360,
    Act365,
    Thirty360,
}

impl FromStr for DayCount {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACT/ACT" => Ok(DayCount::ActAct),
            "ACT/360" => Ok(DayCount::Act360),
            "ACT/365" => Ok(DayCount::Act365),
            "30/360" => Ok(DayCount::Thirty360),
            _ => Err(()),
        }
    }
}

/// One tenor point on a par yield curve.
#[derive(Debug, Clone, Copy)]
pub struct CurvePoint {
    pub tenor_years: f64,
    /// Par yield in percent
    pub par_yield: f64,
}

/// A yield curve with its provenance.
#[derive(Debug, Clone)]
pub struct CurveData {
    pub as_of_date: DateTime<Utc>,
    pub points: Vec<CurvePoint>,
    pub source_url: String,
    pub source_hash: String,
}

/// The instrument terms pricing needs.
#[derive(Debug, Clone)]
pub struct InstrumentTerms {
    pub cusip: String,
    /// Annual coupon in percent of par
    pub coupon: f64,
    pub issue_date: DateTime<Utc>,
    pub maturity_date: DateTime<Utc>,
    /// Coupons per year; zero or negative means a zero-coupon bond
    pub coupon_frequency: i32,
    pub day_count: DayCount,
}

/// The evaluated price and risk numbers.
#[derive(Debug, Clone)]
pub struct EvaluatedPrice {
    pub cusip: String,
    pub as_of_date: DateTime<Utc>,
    pub clean_price: f64,
    pub dirty_price: f64,
    pub accrued_interest: f64,
    /// In percent
    pub yield_to_maturity: f64,
    pub modified_duration: f64,
    pub dv01: f64,
    pub model_version: &'static str,
    pub curve_source_url: String,
    pub curve_source_hash: String,
    pub computed_at: DateTime<Utc>,
}

struct Cashflow {
    time_years: f64,
    amount: f64,
}

/// Evaluate an instrument against a curve as of a date.
pub fn evaluate(
    instrument: &InstrumentTerms,
    curve: &CurveData,
    as_of: DateTime<Utc>,
) -> Result<EvaluatedPrice, PricingError> {
    if curve.points.is_empty() {
        return Err(PricingError::EmptyCurve);
    }
    if instrument.maturity_date <= as_of {
        return Err(PricingError::Matured);
    }

    let tenor = year_fraction(as_of, instrument.maturity_date, instrument.day_count);
    let interpolated = interpolate_yield(tenor, &curve.points);

    let cashflows = build_cashflows(instrument, as_of);
    if cashflows.is_empty() {
        return Err(PricingError::NoCashflows);
    }

    let dirty_price = price_from_yield(&cashflows, interpolated);
    let accrued = accrued_interest(instrument, as_of);
    let clean_price = dirty_price - accrued;

    let ytm = solve_yield(&cashflows, dirty_price, interpolated);
    let duration = modified_duration(&cashflows, dirty_price, ytm);
    let dv01 = duration * dirty_price * 0.0001;

    Ok(EvaluatedPrice {
        cusip: instrument.cusip.clone(),
        as_of_date: as_of,
        clean_price,
        dirty_price,
        accrued_interest: accrued,
        yield_to_maturity: ytm * 100.0,
        modified_duration: duration,
        dv01,
        model_version: MODEL_VERSION,
        curve_source_url: curve.source_url.clone(),
        curve_source_hash: curve.source_hash.clone(),
        computed_at: Utc::now(),
    })
}

fn build_cashflows(instrument: &InstrumentTerms, as_of: DateTime<Utc>) -> Vec<Cashflow> {
    if instrument.coupon_frequency <= 0 || instrument.coupon == 0.0 {
        let years = year_fraction(as_of, instrument.maturity_date, instrument.day_count);
        return vec![Cashflow {
            time_years: years,
            amount: 100.0,
        }];
    }

    let period_months = 12 / instrument.coupon_frequency;
    let coupon_amount = instrument.coupon / instrument.coupon_frequency as f64;
    let mut next_coupon = next_coupon_date(instrument.issue_date, as_of, period_months);

    let mut flows = Vec::new();
    while next_coupon <= instrument.maturity_date {
        let mut amount = coupon_amount;
        if same_date(next_coupon, instrument.maturity_date) {
            amount += 100.0;
        }
        flows.push(Cashflow {
            time_years: year_fraction(as_of, next_coupon, instrument.day_count),
            amount,
        });
        next_coupon = add_months(next_coupon, period_months);
    }

    flows
}

/// Linear interpolation between tenor points; flat extrapolation beyond
/// the ends. Returns a decimal yield.
fn interpolate_yield(maturity_years: f64, points: &[CurvePoint]) -> f64 {
    let mut sorted: Vec<CurvePoint> = points.to_vec();
    sorted.sort_by(|a, b| a.tenor_years.total_cmp(&b.tenor_years));

    let first = sorted[0];
    let last = sorted[sorted.len() - 1];
    if maturity_years <= first.tenor_years {
        return first.par_yield / 100.0;
    }
    if maturity_years >= last.tenor_years {
        return last.par_yield / 100.0;
    }

    for window in sorted.windows(2) {
        let (prev, curr) = (window[0], window[1]);
        if maturity_years <= curr.tenor_years {
            let weight = (maturity_years - prev.tenor_years) / (curr.tenor_years - prev.tenor_years);
            return (prev.par_yield + weight * (curr.par_yield - prev.par_yield)) / 100.0;
        }
    }

    last.par_yield / 100.0
}

fn price_from_yield(flows: &[Cashflow], yield_rate: f64) -> f64 {
    flows
        .iter()
        .map(|flow| flow.amount / (1.0 + yield_rate).powf(flow.time_years))
        .sum()
}

/// Newton-Raphson yield solve, clamped to [-0.5, 1.0].
fn solve_yield(flows: &[Cashflow], target_price: f64, initial_yield: f64) -> f64 {
    let mut yield_rate = initial_yield;
    for _ in 0..MAX_SOLVER_ITERATIONS {
        let price = price_from_yield(flows, yield_rate);
        let diff = price - target_price;
        if diff.abs() < YIELD_TOLERANCE {
            return yield_rate;
        }

        let derivative: f64 = flows
            .iter()
            .filter(|flow| flow.time_years != 0.0)
            .map(|flow| {
                -flow.time_years * flow.amount / (1.0 + yield_rate).powf(flow.time_years + 1.0)
            })
            .sum();
        if derivative == 0.0 {
            break;
        }

        yield_rate -= diff / derivative;
        yield_rate = yield_rate.clamp(-0.5, 1.0);
    }
    yield_rate
}

fn modified_duration(flows: &[Cashflow], price: f64, yield_rate: f64) -> f64 {
    if price == 0.0 {
        return 0.0;
    }
    let weighted: f64 = flows
        .iter()
        .map(|flow| {
            let pv = flow.amount / (1.0 + yield_rate).powf(flow.time_years);
            flow.time_years * pv
        })
        .sum();
    let macaulay = weighted / price;
    macaulay / (1.0 + yield_rate)
}

fn accrued_interest(instrument: &InstrumentTerms, as_of: DateTime<Utc>) -> f64 {
    if instrument.coupon_frequency <= 0 || instrument.coupon == 0.0 {
        return 0.0;
    }

    let period_months = 12 / instrument.coupon_frequency;
    let next_coupon = next_coupon_date(instrument.issue_date, as_of, period_months);
    let mut last_coupon = add_months(next_coupon, -period_months);
    if last_coupon > as_of {
        last_coupon = instrument.issue_date;
    }

    let period_fraction = year_fraction(last_coupon, next_coupon, instrument.day_count);
    if period_fraction == 0.0 {
        return 0.0;
    }

    let accrual_fraction =
        year_fraction(last_coupon, as_of, instrument.day_count) / period_fraction;
    let coupon_amount = instrument.coupon / instrument.coupon_frequency as f64;
    coupon_amount * accrual_fraction
}

fn next_coupon_date(
    issue_date: DateTime<Utc>,
    as_of: DateTime<Utc>,
    period_months: i32,
) -> DateTime<Utc> {
    if issue_date >= as_of {
        return issue_date;
    }
    let mut next = issue_date;
    while next <= as_of {
        next = add_months(next, period_months);
    }
    next
}

fn add_months(date: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    let mut year = date.year();
    let mut month = date.month() as i32 + months;
    while month > 12 {
        month -= 12;
        year += 1;
    }
    while month <= 0 {
        month += 12;
        year -= 1;
    }
    let day = date.day().min(last_day_of_month(year, month as u32));
    // Components are normalized above, so this cannot be ambiguous
    Utc.with_ymd_and_hms(year, month as u32, day, 0, 0, 0)
        .single()
        .unwrap_or(date)
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    (first_of_next - Duration::days(1)).day()
}

fn year_fraction(start: DateTime<Utc>, end: DateTime<Utc>, day_count: DayCount) -> f64 {
    if end < start {
        return 0.0;
    }
    let days = (end - start).num_seconds() as f64 / 86_400.0;
    match day_count {
        DayCount::Thirty360 => day_count_30_360(start, end),
        DayCount::Act360 => days / 360.0,
        DayCount::Act365 => days / 365.0,
        DayCount::ActAct => days / 365.25,
    }
}

fn day_count_30_360(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let (sy, sm, mut sd) = (start.year(), start.month() as i32, start.day() as i32);
    let (ey, em, mut ed) = (end.year(), end.month() as i32, end.day() as i32);

    if sd == 31 {
        sd = 30;
    }
    if ed == 31 && sd == 30 {
        ed = 30;
    }

    let days = (ey - sy) * 360 + (em - sm) * 30 + (ed - sd);
    days as f64 / 360.0
}

fn same_date(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn flat_curve(level: f64) -> CurveData {
        CurveData {
            as_of_date: date(2026, 1, 2),
            points: vec![
                CurvePoint { tenor_years: 1.0, par_yield: level },
                CurvePoint { tenor_years: 10.0, par_yield: level },
                CurvePoint { tenor_years: 30.0, par_yield: level },
            ],
            source_url: "https://example.test/curve".to_string(),
            source_hash: "abc123".to_string(),
        }
    }

    fn coupon_bond() -> InstrumentTerms {
        InstrumentTerms {
            cusip: "912828XG55".to_string(),
            coupon: 4.0,
            issue_date: date(2021, 1, 15),
            maturity_date: date(2031, 1, 15),
            coupon_frequency: 2,
            day_count: DayCount::ActAct,
        }
    }

    #[test]
    fn test_interpolation_is_linear_between_points() {
        let points = vec![
            CurvePoint { tenor_years: 2.0, par_yield: 4.0 },
            CurvePoint { tenor_years: 10.0, par_yield: 5.0 },
        ];
        let y = interpolate_yield(6.0, &points);
        assert!((y - 0.045).abs() < 1e-12);
    }

    #[test]
    fn test_interpolation_clamps_at_ends() {
        let points = vec![
            CurvePoint { tenor_years: 2.0, par_yield: 4.0 },
            CurvePoint { tenor_years: 10.0, par_yield: 5.0 },
        ];
        assert_eq!(interpolate_yield(0.5, &points), 0.04);
        assert_eq!(interpolate_yield(50.0, &points), 0.05);
    }

    #[test]
    fn test_day_counts() {
        let start = date(2026, 1, 1);
        let end = date(2027, 1, 1);
        assert!((year_fraction(start, end, DayCount::Act365) - 1.0).abs() < 0.01);
        assert!((year_fraction(start, end, DayCount::Act360) - 365.0 / 360.0).abs() < 0.01);
        assert!((year_fraction(start, end, DayCount::Thirty360) - 1.0).abs() < 1e-9);
        // Reversed range is zero, not negative
        assert_eq!(year_fraction(end, start, DayCount::ActAct), 0.0);
    }

    #[test]
    fn test_day_count_parsing() {
        assert_eq!("30/360".parse::<DayCount>().unwrap(), DayCount::Thirty360);
        assert_eq!("ACT/360".parse::<DayCount>().unwrap(), DayCount::Act360);
        assert!("ACT/999".parse::<DayCount>().is_err());
    }

    #[test]
    fn test_zero_coupon_prices_below_par() {
        let zero = InstrumentTerms {
            cusip: "ZC".to_string(),
            coupon: 0.0,
            issue_date: date(2024, 1, 2),
            maturity_date: date(2031, 1, 2),
            coupon_frequency: 0,
            day_count: DayCount::ActAct,
        };
        let evaluated = evaluate(&zero, &flat_curve(4.0), date(2026, 1, 2)).unwrap();

        // A single 100 cashflow discounted at 4% for ~5 years
        assert!(evaluated.dirty_price < 100.0);
        assert!(evaluated.dirty_price > 75.0);
        assert_eq!(evaluated.accrued_interest, 0.0);
        assert!((evaluated.yield_to_maturity - 4.0).abs() < 0.05);
    }

    #[test]
    fn test_par_bond_yields_near_coupon() {
        // Coupon equals the flat curve level: price near par, ytm near
        // the coupon
        let evaluated = evaluate(&coupon_bond(), &flat_curve(4.0), date(2026, 1, 15)).unwrap();
        assert!((evaluated.dirty_price - 100.0).abs() < 2.0);
        assert!((evaluated.yield_to_maturity - 4.0).abs() < 0.1);
        assert!(evaluated.modified_duration > 3.0);
        assert!(evaluated.modified_duration < 6.0);
        assert!((evaluated.dv01 - evaluated.modified_duration * evaluated.dirty_price * 0.0001).abs() < 1e-12);
    }

    #[test]
    fn test_accrued_interest_grows_through_period() {
        let bond = coupon_bond();
        let early = accrued_interest(&bond, date(2026, 1, 20));
        let late = accrued_interest(&bond, date(2026, 6, 20));
        assert!(early >= 0.0);
        assert!(late > early);
        // Never more than one coupon
        assert!(late <= bond.coupon / bond.coupon_frequency as f64 + 1e-9);
    }

    #[test]
    fn test_rejects_degenerate_inputs() {
        let bond = coupon_bond();
        let mut empty = flat_curve(4.0);
        empty.points.clear();
        assert_eq!(
            evaluate(&bond, &empty, date(2026, 1, 2)).unwrap_err(),
            PricingError::EmptyCurve
        );

        assert_eq!(
            evaluate(&bond, &flat_curve(4.0), date(2040, 1, 2)).unwrap_err(),
            PricingError::Matured
        );
    }

    #[test]
    fn test_add_months_handles_month_ends() {
        let jan31 = date(2026, 1, 31);
        let feb = add_months(jan31, 1);
        assert_eq!((feb.year(), feb.month(), feb.day()), (2026, 2, 28));

        let back = add_months(date(2026, 1, 15), -2);
        assert_eq!((back.year(), back.month(), back.day()), (2025, 11, 15));
    }

    #[test]
    fn test_evaluate_echoes_provenance() {
        let evaluated = evaluate(&coupon_bond(), &flat_curve(4.0), date(2026, 1, 15)).unwrap();
        assert_eq!(evaluated.model_version, MODEL_VERSION);
        assert_eq!(evaluated.curve_source_hash, "abc123");
    }
}
