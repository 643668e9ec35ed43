use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Instant;

use crate::allocation::rvps::{build_waterfall_ranges, value_per_share, WaterfallRange};
use crate::breakpoints::{Breakpoint, BreakpointType};
use crate::error::AllocationError;
use crate::pricing::black_scholes::{
    bs_price, compute_bs_params, validate_vol_and_time, BlackScholesInput, OptionKind,
};
use crate::pricing::math::exp_decimal;
use crate::types::*;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Market inputs for the option pricing method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpmParams {
    pub company_value: Money,
    pub volatility: Rate,
    pub risk_free_rate: Rate,
    pub time_to_liquidity: Years,
    #[serde(default)]
    pub dividend_yield: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAllocation {
    pub name: String,
    pub shares: Decimal,
    pub percentage: Rate,
    pub allocated_value: Money,
}

/// One call-option spread: a call struck at the range start less a call
/// struck at the range end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpmBreakpointResult {
    pub range_index: usize,
    pub breakpoint_type: BreakpointType,
    pub exercise_price: Money,
    pub range_end: Option<Money>,
    /// Undefined for a zero strike.
    pub d1: Option<Decimal>,
    pub d2: Option<Decimal>,
    pub call_option_value: Money,
    pub incremental_value: Money,
    pub security_allocations: Vec<SecurityAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySummary {
    pub name: String,
    pub total_value: Money,
    pub total_shares: Decimal,
    pub average_per_share_value: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpmAnalysisResult {
    /// Call struck at zero: S * e^(-qT).
    pub total_equity_value: Money,
    pub breakpoint_results: Vec<OpmBreakpointResult>,
    pub security_summary: Vec<SecuritySummary>,
    /// Increments falling in ranges nobody participates in.
    pub unallocated_value: Money,
}

impl OpmAnalysisResult {
    pub fn per_share_value(&self, name: &str) -> Option<Money> {
        self.security_summary
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.average_per_share_value)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub(crate) fn validate_params(params: &OpmParams) -> AllocationResult<()> {
    if params.company_value <= Decimal::ZERO {
        return Err(AllocationError::invalid("company_value", "must be positive"));
    }
    if params.dividend_yield < Decimal::ZERO {
        return Err(AllocationError::invalid(
            "dividend_yield",
            "must be non-negative",
        ));
    }
    validate_vol_and_time(
        params.volatility,
        params.time_to_liquidity,
        "time_to_liquidity",
    )
}

// ---------------------------------------------------------------------------
// Call values per strike
// ---------------------------------------------------------------------------

struct StrikeValue {
    d1: Option<Decimal>,
    d2: Option<Decimal>,
    call: Money,
}

fn call_at(params: &OpmParams, strike: Money) -> AllocationResult<StrikeValue> {
    if strike <= Decimal::ZERO {
        return Ok(StrikeValue {
            d1: None,
            d2: None,
            call: params.company_value
                * exp_decimal(-params.dividend_yield * params.time_to_liquidity),
        });
    }
    let input = BlackScholesInput {
        spot_price: params.company_value,
        strike_price: strike,
        time_to_expiry: params.time_to_liquidity,
        risk_free_rate: params.risk_free_rate,
        volatility: params.volatility,
        dividend_yield: params.dividend_yield,
    };
    let bs = compute_bs_params(&input)?;
    Ok(StrikeValue {
        d1: Some(bs.d1),
        d2: Some(bs.d2),
        call: bs_price(params.company_value, strike, &bs, OptionKind::Call),
    })
}

/// Price every range as a call spread and split each spread by percentage.
pub(crate) fn allocate_ranges(
    params: &OpmParams,
    ranges: &[WaterfallRange],
) -> AllocationResult<OpmAnalysisResult> {
    let mut strikes: HashMap<Decimal, StrikeValue> = HashMap::new();
    let mut results = Vec::with_capacity(ranges.len());
    let mut unallocated = Decimal::ZERO;

    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, (Decimal, Money)> = HashMap::new();

    for range in ranges {
        for strike in std::iter::once(range.range_start).chain(range.range_end) {
            if let Entry::Vacant(slot) = strikes.entry(strike) {
                slot.insert(call_at(params, strike)?);
            }
        }
        // C(infinity) = 0 for the open-ended top range.
        let upper_call = range
            .range_end
            .and_then(|end| strikes.get(&end))
            .map(|v| v.call)
            .unwrap_or(Decimal::ZERO);
        let lower = strikes
            .get(&range.range_start)
            .ok_or_else(|| AllocationError::Inconsistency("strike not priced".into()))?;
        let incremental = lower.call - upper_call;

        let security_allocations: Vec<SecurityAllocation> = range
            .participating_shares
            .iter()
            .map(|p| SecurityAllocation {
                name: p.name.clone(),
                shares: p.shares,
                percentage: p.percentage,
                allocated_value: incremental * p.percentage,
            })
            .collect();
        if security_allocations.is_empty() {
            unallocated += incremental;
        }
        for a in &security_allocations {
            let slot = totals.entry(a.name.clone()).or_insert_with(|| {
                order.push(a.name.clone());
                (a.shares, Decimal::ZERO)
            });
            slot.1 += a.allocated_value;
        }

        results.push(OpmBreakpointResult {
            range_index: range.index,
            breakpoint_type: range.breakpoint_type,
            exercise_price: range.range_start,
            range_end: range.range_end,
            d1: lower.d1,
            d2: lower.d2,
            call_option_value: lower.call,
            incremental_value: incremental,
            security_allocations,
        });
    }

    let security_summary = order
        .into_iter()
        .filter_map(|name| totals.remove(&name).map(|t| (name, t)))
        .map(|(name, (shares, value))| {
            Ok(SecuritySummary {
                average_per_share_value: value_per_share(value, shares, "opm")?,
                name,
                total_value: value,
                total_shares: shares,
            })
        })
        .collect::<AllocationResult<Vec<_>>>()?;

    Ok(OpmAnalysisResult {
        total_equity_value: call_at(params, Decimal::ZERO)?.call,
        breakpoint_results: results,
        security_summary,
        unallocated_value: unallocated,
    })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Value each security as its share of a strip of call-option spreads on
/// total equity, struck at the waterfall breakpoints.
///
/// Increments telescope to `company_value * e^(-qT)`, so security values
/// reconcile to total equity up to `unallocated_value`.
pub fn run_opm_backsolve(
    params: &OpmParams,
    breakpoints: &[Breakpoint],
) -> AllocationResult<ComputationOutput<OpmAnalysisResult>> {
    let start = Instant::now();
    validate_params(params)?;
    if breakpoints.is_empty() {
        return Err(AllocationError::invalid(
            "breakpoints",
            "at least one breakpoint is required",
        ));
    }
    let mut warnings = Vec::new();

    let ranges = build_waterfall_ranges(breakpoints);
    let result = allocate_ranges(params, &ranges)?;

    if result.unallocated_value > Decimal::ZERO {
        warnings.push(format!(
            "{} of option value falls in ranges without participants",
            result.unallocated_value.round_dp(2)
        ));
    }
    if !params.dividend_yield.is_zero() {
        warnings.push(format!(
            "Dividend yield {} reduces total equity to {}",
            params.dividend_yield,
            result.total_equity_value.round_dp(2)
        ));
    }
    log::debug!(
        "OPM over {} ranges: total equity {}",
        ranges.len(),
        result.total_equity_value
    );

    let assumptions = serde_json::json!({
        "company_value": params.company_value.to_string(),
        "volatility": params.volatility.to_string(),
        "risk_free_rate": params.risk_free_rate.to_string(),
        "time_to_liquidity": params.time_to_liquidity.to_string(),
        "dividend_yield": params.dividend_yield.to_string(),
        "strikes": "waterfall range starts",
    });
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Option pricing method (Black-Scholes call spreads over breakpoints)",
        &assumptions,
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoints::ParticipatingShare;
    use rust_decimal_macros::dec;

    fn approx_eq(a: Decimal, b: Decimal, tol: Decimal) -> bool {
        (a - b).abs() < tol
    }

    fn params() -> OpmParams {
        OpmParams {
            company_value: dec!(2000000),
            volatility: dec!(0.5),
            risk_free_rate: dec!(0.04),
            time_to_liquidity: dec!(3),
            dividend_yield: dec!(0),
        }
    }

    fn share(name: &str, shares: Decimal, pct: Decimal) -> ParticipatingShare {
        ParticipatingShare {
            name: name.into(),
            shares,
            percentage: pct,
        }
    }

    fn bp(
        kind: BreakpointType,
        start: Decimal,
        end: Option<Decimal>,
        parts: Vec<ParticipatingShare>,
    ) -> Breakpoint {
        Breakpoint {
            breakpoint_type: kind,
            exit_value: end
                .filter(|_| kind == BreakpointType::LiquidationPreference)
                .unwrap_or(start),
            range_start: start,
            range_end: end,
            per_share_threshold: None,
            affected_securities: parts.iter().map(|p| p.name.clone()).collect(),
            participating_shares: parts,
            priority_order: 0,
            explanation: String::new(),
            mathematical_derivation: String::new(),
            dependencies: vec![],
        }
    }

    fn waterfall() -> Vec<Breakpoint> {
        vec![
            bp(
                BreakpointType::LiquidationPreference,
                dec!(0),
                Some(dec!(500000)),
                vec![share("Series A", dec!(500000), dec!(1))],
            ),
            bp(
                BreakpointType::ProRataDistribution,
                dec!(500000),
                Some(dec!(1500000)),
                vec![share("Common", dec!(1000000), dec!(1))],
            ),
            bp(
                BreakpointType::VoluntaryConversion,
                dec!(1500000),
                None,
                vec![
                    share("Common", dec!(1000000), dec!(2) / dec!(3)),
                    share("Series A", dec!(500000), dec!(1) / dec!(3)),
                ],
            ),
        ]
    }

    #[test]
    fn test_increments_reconcile_to_company_value() {
        let out = run_opm_backsolve(&params(), &waterfall()).unwrap();
        let r = &out.result;
        let sum: Decimal = r.breakpoint_results.iter().map(|b| b.incremental_value).sum();
        assert!(approx_eq(sum, dec!(2000000), dec!(0.0001)), "sum {sum}");
        let alloc: Decimal = r.security_summary.iter().map(|s| s.total_value).sum();
        assert!(approx_eq(alloc, dec!(2000000), dec!(0.0001)), "alloc {alloc}");
        assert_eq!(r.total_equity_value, dec!(2000000));
        assert_eq!(r.unallocated_value, Decimal::ZERO);
    }

    #[test]
    fn test_zero_strike_has_no_d1() {
        let out = run_opm_backsolve(&params(), &waterfall()).unwrap();
        let first = &out.result.breakpoint_results[0];
        assert!(first.d1.is_none());
        assert_eq!(first.call_option_value, dec!(2000000));
        let second = &out.result.breakpoint_results[1];
        assert!(second.d1.is_some());
        assert!(second.call_option_value < dec!(2000000));
    }

    #[test]
    fn test_increments_non_negative_and_senior_first() {
        let out = run_opm_backsolve(&params(), &waterfall()).unwrap();
        for b in &out.result.breakpoint_results {
            assert!(b.incremental_value >= Decimal::ZERO);
        }
        // The preference strip is nearly riskless at this company value.
        let pref = out.result.per_share_value("Series A").unwrap();
        let common = out.result.per_share_value("Common").unwrap();
        assert!(pref > common, "pref {pref} common {common}");
    }

    #[test]
    fn test_dividend_yield_reduces_total_equity() {
        let p = OpmParams {
            dividend_yield: dec!(0.02),
            ..params()
        };
        let out = run_opm_backsolve(&p, &waterfall()).unwrap();
        let expected = dec!(2000000) * exp_decimal(dec!(-0.06));
        assert!(approx_eq(
            out.result.total_equity_value,
            expected,
            dec!(0.0001)
        ));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_empty_range_value_reported_unallocated() {
        let mut bps = waterfall();
        bps[2].participating_shares.clear();
        let out = run_opm_backsolve(&params(), &bps).unwrap();
        assert!(out.result.unallocated_value > Decimal::ZERO);
        let alloc: Decimal = out
            .result
            .security_summary
            .iter()
            .map(|s| s.total_value)
            .sum();
        assert!(approx_eq(
            alloc + out.result.unallocated_value,
            dec!(2000000),
            dec!(0.0001)
        ));
    }

    #[test]
    fn test_invalid_params() {
        let p = OpmParams {
            volatility: dec!(0),
            ..params()
        };
        match run_opm_backsolve(&p, &waterfall()).unwrap_err() {
            AllocationError::InvalidInput { field, .. } => assert_eq!(field, "volatility"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
        let p = OpmParams {
            company_value: dec!(-1),
            ..params()
        };
        assert!(run_opm_backsolve(&p, &waterfall()).is_err());
        assert!(run_opm_backsolve(&params(), &[]).is_err());
    }
}
