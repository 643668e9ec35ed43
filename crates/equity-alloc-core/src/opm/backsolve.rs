use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::allocation::{allocate_ranges, validate_params, OpmAnalysisResult, OpmParams};
use crate::allocation::rvps::{build_waterfall_ranges, WaterfallRange};
use crate::breakpoints::Breakpoint;
use crate::error::AllocationError;
use crate::types::*;
use crate::AllocationResult;

const BISECTION_MAX_ITER: u32 = 200;
const BRACKET_MAX_DOUBLINGS: u32 = 60;
const DEFAULT_TOLERANCE: Decimal = dec!(0.000001);

/// Solve for the company value implied by a known per-share price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacksolveInput {
    /// Security whose price is observed, typically the latest round.
    pub target_security: String,
    pub target_price_per_share: Money,
    pub volatility: Rate,
    pub risk_free_rate: Rate,
    pub time_to_liquidity: Years,
    #[serde(default)]
    pub dividend_yield: Rate,
    /// Per-share price tolerance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacksolveResult {
    pub implied_company_value: Money,
    pub achieved_price_per_share: Money,
    pub iterations: u32,
    pub opm: OpmAnalysisResult,
}

fn params_at(input: &BacksolveInput, company_value: Money) -> OpmParams {
    OpmParams {
        company_value,
        volatility: input.volatility,
        risk_free_rate: input.risk_free_rate,
        time_to_liquidity: input.time_to_liquidity,
        dividend_yield: input.dividend_yield,
    }
}

fn price_at(
    input: &BacksolveInput,
    ranges: &[WaterfallRange],
    company_value: Money,
) -> AllocationResult<(Money, OpmAnalysisResult)> {
    let opm = allocate_ranges(&params_at(input, company_value), ranges)?;
    let price = opm
        .per_share_value(&input.target_security)
        .unwrap_or(Decimal::ZERO);
    Ok((price, opm))
}

/// Bisect on company value until the target security's OPM value per share
/// matches the observed price.
pub fn backsolve_company_value(
    input: &BacksolveInput,
    breakpoints: &[Breakpoint],
) -> AllocationResult<ComputationOutput<BacksolveResult>> {
    let start = Instant::now();
    if input.target_price_per_share <= Decimal::ZERO {
        return Err(AllocationError::invalid(
            "target_price_per_share",
            "must be positive",
        ));
    }
    validate_params(&params_at(input, Decimal::ONE))?;
    let ranges = build_waterfall_ranges(breakpoints);
    let known = ranges.iter().any(|r| {
        r.participating_shares
            .iter()
            .any(|p| p.name == input.target_security)
    });
    if !known {
        return Err(AllocationError::invalid(
            "target_security",
            format!("'{}' does not participate in any range", input.target_security),
        ));
    }
    let tol = input.tolerance.unwrap_or(DEFAULT_TOLERANCE);
    let target = input.target_price_per_share;

    // Bracket: value per share rises with company value.
    let mut lo = dec!(0.01);
    let (p_lo, _) = price_at(input, &ranges, lo)?;
    if p_lo > target {
        return Err(AllocationError::invalid(
            "target_price_per_share",
            format!("below the minimum attainable value {}", p_lo.round_dp(6)),
        ));
    }
    let top_breakpoint = ranges
        .last()
        .map(|r| r.range_start)
        .unwrap_or(Decimal::ZERO);
    let mut hi = (top_breakpoint * dec!(2)).max(Decimal::ONE);
    let mut doublings = 0;
    loop {
        let (p_hi, _) = price_at(input, &ranges, hi)?;
        if p_hi >= target {
            break;
        }
        if doublings == BRACKET_MAX_DOUBLINGS {
            return Err(AllocationError::ConvergenceFailure {
                function: "backsolve_company_value".into(),
                iterations: 0,
                last_delta: (p_hi - target).abs(),
            });
        }
        lo = hi;
        hi *= dec!(2);
        doublings += 1;
    }

    let mut last_delta = Decimal::MAX;
    for iter in 1..=BISECTION_MAX_ITER {
        let mid = (lo + hi) / dec!(2);
        let (price, opm) = price_at(input, &ranges, mid)?;
        let error = price - target;
        last_delta = error.abs();

        if last_delta < tol || (hi - lo) < tol {
            log::debug!("backsolve converged after {iter} iterations at {mid}");
            let mut warnings = Vec::new();
            if last_delta >= tol {
                warnings.push(format!(
                    "Bracket collapsed with price error {}",
                    last_delta.round_dp(8)
                ));
            }
            let assumptions = serde_json::json!({
                "target_security": input.target_security,
                "target_price_per_share": target.to_string(),
                "volatility": input.volatility.to_string(),
                "risk_free_rate": input.risk_free_rate.to_string(),
                "time_to_liquidity": input.time_to_liquidity.to_string(),
                "dividend_yield": input.dividend_yield.to_string(),
                "tolerance": tol.to_string(),
            });
            let elapsed = start.elapsed().as_micros() as u64;
            return Ok(with_metadata(
                "OPM backsolve (bisection on company value)",
                &assumptions,
                warnings,
                elapsed,
                BacksolveResult {
                    implied_company_value: mid,
                    achieved_price_per_share: price,
                    iterations: iter,
                    opm,
                },
            ));
        }

        if error > Decimal::ZERO {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    Err(AllocationError::ConvergenceFailure {
        function: "backsolve_company_value".into(),
        iterations: BISECTION_MAX_ITER,
        last_delta,
    })
}
