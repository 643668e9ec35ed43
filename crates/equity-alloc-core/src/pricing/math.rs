use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::AllocationError;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Decimal math helpers (no f64, no MathematicalOps exp/ln/sqrt)
// ---------------------------------------------------------------------------

/// Largest argument accepted by [`exp_checked`]. e^60 ~ 1.14e26 still fits a
/// 96-bit mantissa with room for the caller to multiply by a price.
const EXP_MAX_ARG: Decimal = dec!(60);

/// Below this argument e^x is indistinguishable from zero at 28 digits.
const EXP_MIN_ARG: Decimal = dec!(-66);

/// Taylor series exp(x) with range reduction for |x| > 2.
/// exp(x) = exp(x/2)^2 when |x| > 2, then Taylor with 25 terms.
///
/// Returns `None` when the result would overflow a Decimal.
pub fn exp_checked(x: Decimal) -> Option<Decimal> {
    if x > EXP_MAX_ARG {
        return None;
    }
    if x < EXP_MIN_ARG {
        return Some(Decimal::ZERO);
    }
    Some(exp_reduced(x))
}

fn exp_reduced(x: Decimal) -> Decimal {
    let two = dec!(2);

    if x > two || x < -two {
        let half = exp_reduced(x / two);
        return half * half;
    }

    let mut sum = Decimal::ONE;
    let mut term = Decimal::ONE;
    for n in 1u32..=25 {
        term = term * x / Decimal::from(n);
        sum += term;
    }
    sum
}

/// exp(x) for arguments known to be small (discount factors, pdf exponents).
/// Saturates at the overflow bound rather than panicking.
pub fn exp_decimal(x: Decimal) -> Decimal {
    exp_checked(x).unwrap_or(Decimal::MAX)
}

/// Newton's method sqrt: y_{n+1} = (y_n + x/y_n) / 2.
pub fn sqrt_decimal(x: Decimal) -> Decimal {
    if x <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if x == Decimal::ONE {
        return Decimal::ONE;
    }
    let two = dec!(2);
    let mut guess = if x > dec!(100) {
        // Seed near the root: halve the digit count.
        let digits = x.trunc().to_string().len() as u32;
        Decimal::from(10u64.pow((digits / 2).min(14)))
    } else if x < dec!(0.01) {
        dec!(0.1)
    } else {
        x / two
    };
    for _ in 0..40 {
        let next = (guess + x / guess) / two;
        if next == guess {
            break;
        }
        guess = next;
    }
    guess
}

/// Natural log via Newton's method: find y such that exp(y) = x.
///
/// `model` tags the error raised for a non-positive argument.
pub fn ln_checked(x: Decimal, model: &str) -> AllocationResult<Decimal> {
    if x <= Decimal::ZERO {
        return Err(AllocationError::degenerate(
            model,
            format!("logarithm of non-positive value {x}"),
        ));
    }
    if x == Decimal::ONE {
        return Ok(Decimal::ZERO);
    }

    // Reduce to x = v * e^n with v in (1/e, e], then Newton on ln(v).
    let e_approx = dec!(2.718281828459045235360287471);
    let mut n = Decimal::ZERO;
    let mut v = x;
    while v > e_approx {
        v /= e_approx;
        n += Decimal::ONE;
    }
    while v <= Decimal::ONE / e_approx {
        v *= e_approx;
        n -= Decimal::ONE;
    }

    // y_{k+1} = y_k - 1 + v / exp(y_k)
    let mut y = v - Decimal::ONE;
    for _ in 0..30 {
        let next = y - Decimal::ONE + v / exp_reduced(y);
        if next == y {
            break;
        }
        y = next;
    }
    y += n;
    Ok(y)
}

/// Standard normal PDF: phi(x) = exp(-x^2/2) / sqrt(2*pi)
pub fn norm_pdf(x: Decimal) -> Decimal {
    // Past |x| = 12 the density is below 1e-31.
    if x.abs() > dec!(12) {
        return Decimal::ZERO;
    }
    let sqrt_two_pi = dec!(2.506628274631000502415765285);
    exp_decimal(-(x * x) / dec!(2)) / sqrt_two_pi
}

/// Standard normal CDF using Abramowitz & Stegun 26.2.17.
/// Phi(z) = 1 - phi(z) * (a1*k + a2*k^2 + a3*k^3 + a4*k^4 + a5*k^5)
/// where k = 1 / (1 + 0.2316419 * |z|); Phi(z) = 1 - Phi(-z) for z < 0.
pub fn norm_s_dist(z: Decimal) -> Decimal {
    let a1 = dec!(0.319381530);
    let a2 = dec!(-0.356563782);
    let a3 = dec!(1.781477937);
    let a4 = dec!(-1.821255978);
    let a5 = dec!(1.330274429);
    let p = dec!(0.2316419);

    let abs_z = z.abs();
    let k = Decimal::ONE / (Decimal::ONE + p * abs_z);
    let poly = k * (a1 + k * (a2 + k * (a3 + k * (a4 + k * a5))));

    let upper = Decimal::ONE - norm_pdf(abs_z) * poly;
    let cdf = if z < Decimal::ZERO {
        Decimal::ONE - upper
    } else {
        upper
    };
    cdf.max(Decimal::ZERO).min(Decimal::ONE)
}

/// x^y for x > 0 via exp(y * ln x).
pub fn pow_decimal(base: Decimal, exponent: Decimal, model: &str) -> AllocationResult<Decimal> {
    if exponent.is_zero() {
        return Ok(Decimal::ONE);
    }
    let arg = exponent * ln_checked(base, model)?;
    exp_checked(arg).ok_or_else(|| {
        AllocationError::degenerate(model, format!("{base}^{exponent} overflows"))
    })
}
