use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::solver::{Breakpoint, BreakpointType};
use crate::allocation::rvps::{build_waterfall_ranges, total_distributed, WaterfallRange};
use crate::types::{abs_diff, Money};

const PERCENT_TOLERANCE: Decimal = dec!(0.000000001);
const CONSERVATION_TOLERANCE: Decimal = dec!(0.0001);

/// One self-check over a solved waterfall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl ValidationCheck {
    fn new(name: &str, failures: Vec<String>, ok: &str) -> Self {
        ValidationCheck {
            name: name.to_string(),
            passed: failures.is_empty(),
            detail: if failures.is_empty() {
                ok.to_string()
            } else {
                failures.join("; ")
            },
        }
    }
}

fn check_monotonic(breakpoints: &[Breakpoint]) -> ValidationCheck {
    let failures = breakpoints
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0].exit_value > w[1].exit_value)
        .map(|(i, w)| {
            format!(
                "breakpoint {i} ({}) exceeds breakpoint {} ({})",
                w[0].exit_value,
                i + 1,
                w[1].exit_value
            )
        })
        .collect();
    ValidationCheck::new(
        "monotonic_exit_values",
        failures,
        "exit values are non-decreasing",
    )
}

fn check_contiguous(ranges: &[WaterfallRange]) -> ValidationCheck {
    let mut failures = Vec::new();
    match ranges.first() {
        None => failures.push("no ranges".to_string()),
        Some(first) if !first.range_start.is_zero() => {
            failures.push(format!("first range starts at {}", first.range_start))
        }
        _ => {}
    }
    for w in ranges.windows(2) {
        match w[0].range_end {
            Some(end) if end == w[1].range_start => {}
            Some(end) => failures.push(format!(
                "range {} ends at {end} but range {} starts at {}",
                w[0].index, w[1].index, w[1].range_start
            )),
            None => failures.push(format!("range {} is open-ended but not last", w[0].index)),
        }
    }
    if let Some(last) = ranges.last() {
        if !last.is_last_range {
            failures.push(format!("last range {} is bounded", last.index));
        }
    }
    ValidationCheck::new(
        "contiguous_ranges",
        failures,
        "ranges tile [0, infinity) without gaps or overlaps",
    )
}

fn check_participation(ranges: &[WaterfallRange]) -> ValidationCheck {
    let mut failures = Vec::new();
    for r in ranges {
        if r.participating_shares.is_empty() {
            let zero_width = r.range_end == Some(r.range_start);
            if !(zero_width || r.is_last_range) {
                failures.push(format!("range {} has no participants", r.index));
            }
            continue;
        }
        let sum: Decimal = r.participating_shares.iter().map(|p| p.percentage).sum();
        if abs_diff(sum, Decimal::ONE) > PERCENT_TOLERANCE {
            failures.push(format!("range {} percentages sum to {sum}", r.index));
        }
        if let Some(p) = r.participating_shares.iter().find(|p| p.percentage < Decimal::ZERO) {
            failures.push(format!("range {}: {} has negative share", r.index, p.name));
        }
    }
    ValidationCheck::new(
        "participation_complete",
        failures,
        "every funded range splits 100% of its proceeds",
    )
}

fn check_preference_stack(breakpoints: &[Breakpoint], total_preference: Money) -> ValidationCheck {
    let top = breakpoints
        .iter()
        .filter(|b| b.breakpoint_type == BreakpointType::LiquidationPreference)
        .map(|b| b.exit_value)
        .max()
        .unwrap_or(Decimal::ZERO);
    let failures = if top == total_preference {
        Vec::new()
    } else {
        vec![format!(
            "top preference tier ends at {top}, preferences total {total_preference}"
        )]
    };
    ValidationCheck::new(
        "preference_stack_total",
        failures,
        "preference tiers sum to the total liquidation preference",
    )
}

/// Conservation at every breakpoint and once above the last one.
fn check_conservation(breakpoints: &[Breakpoint], ranges: &[WaterfallRange]) -> ValidationCheck {
    let ceiling = ranges
        .last()
        .filter(|r| r.participating_shares.is_empty())
        .map(|r| r.range_start);
    let top = breakpoints
        .iter()
        .map(|b| b.exit_value)
        .max()
        .unwrap_or(Decimal::ZERO);

    let mut sample_values: Vec<Money> = breakpoints.iter().map(|b| b.exit_value).collect();
    if let Some(above) = top.checked_mul(dec!(2)).and_then(|v| v.checked_add(Decimal::ONE)) {
        sample_values.push(above);
    }
    sample_values.dedup();

    let failures = sample_values
        .into_iter()
        .filter_map(|v| {
            let expected = match ceiling {
                Some(c) => v.min(c),
                None => v,
            };
            let got = total_distributed(ranges, v);
            let tol = CONSERVATION_TOLERANCE * (Decimal::ONE + v.abs() / dec!(1000000));
            (abs_diff(got, expected) > tol)
                .then(|| format!("at {v}: distributed {got}, expected {expected}"))
        })
        .collect();
    ValidationCheck::new(
        "conservation",
        failures,
        "distributed proceeds equal exit value at every breakpoint",
    )
}

/// Run every self-check over a sorted breakpoint sequence.
pub fn run_checks(breakpoints: &[Breakpoint], total_preference: Money) -> Vec<ValidationCheck> {
    let ranges = build_waterfall_ranges(breakpoints);
    vec![
        check_monotonic(breakpoints),
        check_contiguous(&ranges),
        check_participation(&ranges),
        check_preference_stack(breakpoints, total_preference),
        check_conservation(breakpoints, &ranges),
    ]
}
