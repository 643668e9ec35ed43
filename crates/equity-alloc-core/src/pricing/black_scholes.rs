use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::math::{exp_decimal, ln_checked, norm_s_dist, sqrt_decimal};
use crate::error::AllocationError;
use crate::types::*;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Call,
    Put,
}

/// Black-Scholes inputs. `dividend_yield` is a continuous yield.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackScholesInput {
    pub spot_price: Money,
    pub strike_price: Money,
    pub time_to_expiry: Years,
    pub risk_free_rate: Rate,
    pub volatility: Rate,
    #[serde(default)]
    pub dividend_yield: Rate,
}

/// d1/d2 and the discount factors shared by call and put valuation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BsParams {
    pub d1: Decimal,
    pub d2: Decimal,
    pub exp_neg_qt: Decimal,
    pub exp_neg_rt: Decimal,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub(crate) fn validate_vol_and_time(
    volatility: Rate,
    time: Years,
    time_field: &str,
) -> AllocationResult<()> {
    if volatility <= Decimal::ZERO {
        return Err(AllocationError::invalid("volatility", "must be positive"));
    }
    if time <= Decimal::ZERO {
        return Err(AllocationError::invalid(time_field, "must be positive"));
    }
    Ok(())
}

fn validate_input(input: &BlackScholesInput) -> AllocationResult<()> {
    if input.spot_price <= Decimal::ZERO {
        return Err(AllocationError::invalid("spot_price", "must be positive"));
    }
    if input.strike_price <= Decimal::ZERO {
        return Err(AllocationError::invalid("strike_price", "must be positive"));
    }
    validate_vol_and_time(input.volatility, input.time_to_expiry, "time_to_expiry")
}

// ---------------------------------------------------------------------------
// Black-Scholes
// ---------------------------------------------------------------------------

/// Compute d1, d2 and discount factors.
///
/// Fails with `NumericalDegeneracy` when `sigma * sqrt(T)` underflows to zero.
pub fn compute_bs_params(input: &BlackScholesInput) -> AllocationResult<BsParams> {
    validate_input(input)?;
    let s = input.spot_price;
    let k = input.strike_price;
    let t = input.time_to_expiry;
    let r = input.risk_free_rate;
    let q = input.dividend_yield;
    let sigma = input.volatility;

    let sigma_sqrt_t = sigma * sqrt_decimal(t);
    if sigma_sqrt_t.is_zero() {
        return Err(AllocationError::degenerate(
            "black_scholes",
            "volatility * sqrt(T) underflows to zero",
        ));
    }
    let d1 = (ln_checked(s / k, "black_scholes")? + (r - q + sigma * sigma / dec!(2)) * t)
        / sigma_sqrt_t;
    let d2 = d1 - sigma_sqrt_t;

    Ok(BsParams {
        d1,
        d2,
        exp_neg_qt: exp_decimal(-q * t),
        exp_neg_rt: exp_decimal(-r * t),
    })
}

/// Price from precomputed parameters.
pub fn bs_price(s: Money, k: Money, params: &BsParams, kind: OptionKind) -> Money {
    let price = match kind {
        OptionKind::Call => {
            s * params.exp_neg_qt * norm_s_dist(params.d1)
                - k * params.exp_neg_rt * norm_s_dist(params.d2)
        }
        OptionKind::Put => {
            k * params.exp_neg_rt * norm_s_dist(-params.d2)
                - s * params.exp_neg_qt * norm_s_dist(-params.d1)
        }
    };
    // The A&S approximation can leave a sub-cent negative residue deep OTM.
    price.max(Decimal::ZERO)
}

/// European call value.
pub fn call_value(input: &BlackScholesInput) -> AllocationResult<Money> {
    let params = compute_bs_params(input)?;
    Ok(bs_price(
        input.spot_price,
        input.strike_price,
        &params,
        OptionKind::Call,
    ))
}

/// European put value.
pub fn put_value(input: &BlackScholesInput) -> AllocationResult<Money> {
    let params = compute_bs_params(input)?;
    Ok(bs_price(
        input.spot_price,
        input.strike_price,
        &params,
        OptionKind::Put,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: Decimal, b: Decimal, tol: Decimal) -> bool {
        (a - b).abs() < tol
    }

    fn atm() -> BlackScholesInput {
        BlackScholesInput {
            spot_price: dec!(100),
            strike_price: dec!(100),
            time_to_expiry: dec!(1),
            risk_free_rate: dec!(0.05),
            volatility: dec!(0.20),
            dividend_yield: dec!(0),
        }
    }

    #[test]
    fn test_atm_call_and_put() {
        let call = call_value(&atm()).unwrap();
        let put = put_value(&atm()).unwrap();
        assert!(approx_eq(call, dec!(10.4506), dec!(0.01)), "call {call}");
        assert!(approx_eq(put, dec!(5.5735), dec!(0.01)), "put {put}");
    }

    #[test]
    fn test_put_call_parity() {
        let input = BlackScholesInput {
            dividend_yield: dec!(0.02),
            ..atm()
        };
        let c = call_value(&input).unwrap();
        let p = put_value(&input).unwrap();
        let rhs = dec!(100) * exp_decimal(dec!(-0.02)) - dec!(100) * exp_decimal(dec!(-0.05));
        assert!(approx_eq(c - p, rhs, dec!(0.0001)));
    }

    #[test]
    fn test_deep_otm_call_non_negative() {
        let input = BlackScholesInput {
            spot_price: dec!(1),
            strike_price: dec!(1000000),
            ..atm()
        };
        let c = call_value(&input).unwrap();
        assert!(c >= Decimal::ZERO);
        assert!(c < dec!(0.000001));
    }

    #[test]
    fn test_zero_volatility_rejected() {
        let input = BlackScholesInput {
            volatility: dec!(0),
            ..atm()
        };
        match call_value(&input).unwrap_err() {
            AllocationError::InvalidInput { field, .. } => assert_eq!(field, "volatility"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_time_rejected() {
        let input = BlackScholesInput {
            time_to_expiry: dec!(0),
            ..atm()
        };
        match put_value(&input).unwrap_err() {
            AllocationError::InvalidInput { field, .. } => assert_eq!(field, "time_to_expiry"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }
}
