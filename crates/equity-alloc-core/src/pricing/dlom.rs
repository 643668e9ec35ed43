use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::black_scholes::{put_value, validate_vol_and_time, BlackScholesInput};
use super::math::{exp_checked, exp_decimal, ln_checked, norm_s_dist, sqrt_decimal};
use crate::error::AllocationError;
use crate::types::*;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Closed-form discount-for-lack-of-marketability models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlomModel {
    /// Chaffee (1993) European protective put.
    Chaffee,
    /// Finnerty (2012) average-strike put.
    Finnerty,
    /// Ghaidarov (2009) average-strike put.
    Ghaidarov,
    /// Longstaff (1995) lookback put.
    Longstaff,
}

impl DlomModel {
    pub const ALL: [DlomModel; 4] = [
        DlomModel::Chaffee,
        DlomModel::Finnerty,
        DlomModel::Ghaidarov,
        DlomModel::Longstaff,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DlomModel::Chaffee => "chaffee",
            DlomModel::Finnerty => "finnerty",
            DlomModel::Ghaidarov => "ghaidarov",
            DlomModel::Longstaff => "longstaff",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlomInput {
    pub stock_price: Money,
    pub strike_price: Money,
    /// Annualised volatility as a decimal (0.60 = 60%).
    pub volatility: Rate,
    pub risk_free_rate: Rate,
    /// Restriction period in years.
    pub time_to_expiration: Years,
    #[serde(default)]
    pub dividend_yield: Rate,
    /// Run a single model; all four when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<DlomModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlomModelResult {
    pub model: DlomModel,
    /// Discount as a percentage in [0, 100].
    pub discount_pct: Decimal,
    /// Discount as a decimal fraction.
    pub discount: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlomOutput {
    pub results: Vec<DlomModelResult>,
    /// Arithmetic mean of the reported percentages.
    pub average_discount_pct: Decimal,
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

fn validate_dlom(input: &DlomInput) -> AllocationResult<()> {
    validate_vol_and_time(input.volatility, input.time_to_expiration, "time_to_expiration")?;
    if input.stock_price <= Decimal::ZERO {
        return Err(AllocationError::invalid("stock_price", "must be positive"));
    }
    if input.strike_price <= Decimal::ZERO {
        return Err(AllocationError::invalid("strike_price", "must be positive"));
    }
    Ok(())
}

/// Chaffee protective put: DLOM = P(S, K) / S.
pub fn chaffee(input: &DlomInput) -> AllocationResult<Decimal> {
    validate_dlom(input)?;
    let put = put_value(&BlackScholesInput {
        spot_price: input.stock_price,
        strike_price: input.strike_price,
        time_to_expiry: input.time_to_expiration,
        risk_free_rate: input.risk_free_rate,
        volatility: input.volatility,
        dividend_yield: input.dividend_yield,
    })
    .map_err(|e| retag(e, DlomModel::Chaffee))?;
    Ok(put / input.stock_price * dec!(100))
}

/// Finnerty 2012 average-strike put.
///
/// v*sqrt(T) = sqrt(s2t + ln(2(e^s2t - s2t - 1)) - 2 ln(e^s2t - 1)),
/// DLOM = e^(-qT) * (N(v*sqrt(T)/2) - N(-v*sqrt(T)/2)).
pub fn finnerty(input: &DlomInput) -> AllocationResult<Decimal> {
    validate_dlom(input)?;
    let model = DlomModel::Finnerty.name();
    let s2t = variance_time(input, model)?;
    let e_s2t = exp_checked(s2t)
        .ok_or_else(|| AllocationError::degenerate(model, "e^(sigma^2 T) overflows"))?;

    let inner = s2t + ln_checked(dec!(2) * (e_s2t - s2t - Decimal::ONE), model)?
        - dec!(2) * ln_checked(e_s2t - Decimal::ONE, model)?;
    if inner <= Decimal::ZERO {
        return Err(AllocationError::degenerate(
            model,
            format!("average-strike variance {inner} is not positive"),
        ));
    }
    let v_sqrt_t = sqrt_decimal(inner);
    let half = v_sqrt_t / dec!(2);
    let discount = exp_decimal(-input.dividend_yield * input.time_to_expiration)
        * (norm_s_dist(half) - norm_s_dist(-half));
    Ok(discount * dec!(100))
}

/// Ghaidarov average-strike put.
///
/// nu_T^2 = ln(2(e^s2t - s2t - 1)) - 2 ln(s2t),
/// DLOM = e^(-qT) * (2 N(nu_T/2) - 1).
pub fn ghaidarov(input: &DlomInput) -> AllocationResult<Decimal> {
    validate_dlom(input)?;
    let model = DlomModel::Ghaidarov.name();
    let s2t = variance_time(input, model)?;
    let e_s2t = exp_checked(s2t)
        .ok_or_else(|| AllocationError::degenerate(model, "e^(sigma^2 T) overflows"))?;

    let nu_sq = ln_checked(dec!(2) * (e_s2t - s2t - Decimal::ONE), model)?
        - dec!(2) * ln_checked(s2t, model)?;
    if nu_sq <= Decimal::ZERO {
        return Err(AllocationError::degenerate(
            model,
            format!("average-strike variance {nu_sq} is not positive"),
        ));
    }
    let nu_t = sqrt_decimal(nu_sq);
    let discount = exp_decimal(-input.dividend_yield * input.time_to_expiration)
        * (dec!(2) * norm_s_dist(nu_t / dec!(2)) - Decimal::ONE);
    Ok(discount * dec!(100))
}

/// Longstaff lookback put:
/// DLOM = N(sqrt(s2t)/2) e^(-s2t/8) - sqrt(s2t/(2 pi)) (1 - e^(-s2t/8)).
///
/// The closed form turns negative once s2t passes roughly 5.34; that is
/// reported as a degeneracy rather than a discount.
pub fn longstaff(input: &DlomInput) -> AllocationResult<Decimal> {
    validate_dlom(input)?;
    let model = DlomModel::Longstaff.name();
    let s2t = variance_time(input, model)?;
    let two_pi = dec!(6.283185307179586476925286767);

    let decay = exp_decimal(-s2t / dec!(8));
    let discount = norm_s_dist(sqrt_decimal(s2t) / dec!(2)) * decay
        - sqrt_decimal(s2t / two_pi) * (Decimal::ONE - decay);
    if discount < Decimal::ZERO {
        return Err(AllocationError::degenerate(
            model,
            format!("closed form is negative ({}) at sigma^2 T = {s2t}", discount.round_dp(6)),
        ));
    }
    Ok(discount * dec!(100))
}

fn variance_time(input: &DlomInput, model: &str) -> AllocationResult<Decimal> {
    let s2t = input.volatility * input.volatility * input.time_to_expiration;
    if s2t.is_zero() {
        return Err(AllocationError::degenerate(
            model,
            "sigma^2 * T underflows to zero",
        ));
    }
    Ok(s2t)
}

fn retag(e: AllocationError, model: DlomModel) -> AllocationError {
    match e {
        AllocationError::NumericalDegeneracy { reason, .. } => AllocationError::NumericalDegeneracy {
            model: model.name().to_string(),
            reason,
        },
        other => other,
    }
}

/// Evaluate one model.
pub fn dlom_for(model: DlomModel, input: &DlomInput) -> AllocationResult<Decimal> {
    match model {
        DlomModel::Chaffee => chaffee(input),
        DlomModel::Finnerty => finnerty(input),
        DlomModel::Ghaidarov => ghaidarov(input),
        DlomModel::Longstaff => longstaff(input),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run the requested DLOM model, or all four.
pub fn calculate_dlom(input: &DlomInput) -> AllocationResult<ComputationOutput<DlomOutput>> {
    let start = Instant::now();
    validate_dlom(input)?;

    let mut warnings = Vec::new();
    let mut results = Vec::new();
    match input.model {
        Some(model) => results.push(model_result(model, dlom_for(model, input)?)),
        None => {
            // A model whose closed form breaks down is left out of the average.
            for model in DlomModel::ALL {
                match dlom_for(model, input) {
                    Ok(pct) => results.push(model_result(model, pct)),
                    Err(AllocationError::NumericalDegeneracy { reason, .. }) => {
                        log::warn!("{} DLOM skipped: {}", model.name(), reason);
                        warnings.push(format!("{} excluded: {}", model.name(), reason));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    if results.is_empty() {
        return Err(AllocationError::degenerate(
            "dlom",
            "no model produced a discount for these inputs",
        ));
    }

    let average_discount_pct =
        results.iter().map(|r| r.discount_pct).sum::<Decimal>() / Decimal::from(results.len());

    let assumptions = serde_json::json!({
        "stock_price": input.stock_price.to_string(),
        "strike_price": input.strike_price.to_string(),
        "volatility": input.volatility.to_string(),
        "risk_free_rate": input.risk_free_rate.to_string(),
        "time_to_expiration": input.time_to_expiration.to_string(),
        "dividend_yield": input.dividend_yield.to_string(),
    });

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Closed-form DLOM (Chaffee / Finnerty / Ghaidarov / Longstaff)",
        &assumptions,
        warnings,
        elapsed,
        DlomOutput {
            results,
            average_discount_pct,
        },
    ))
}

fn model_result(model: DlomModel, pct: Decimal) -> DlomModelResult {
    DlomModelResult {
        model,
        discount_pct: pct,
        discount: pct / dec!(100),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
