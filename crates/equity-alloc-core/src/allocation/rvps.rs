use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::breakpoints::{Breakpoint, BreakpointType, ParticipatingShare};
use crate::error::AllocationError;
use crate::types::*;
use crate::AllocationResult;

/// Residue below this is rounding, not undistributed proceeds.
const UNDISTRIBUTED_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// `[range_start, range_end)` on the exit-value axis with a fixed split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallRange {
    pub index: usize,
    /// Breakpoint that owns this range.
    pub breakpoint_type: BreakpointType,
    pub range_start: Money,
    pub range_end: Option<Money>,
    pub is_last_range: bool,
    pub participating_shares: Vec<ParticipatingShare>,
}

impl WaterfallRange {
    /// Proceeds falling inside this range when the company exits at `exit_value`.
    pub fn proceeds_at(&self, exit_value: Money) -> Money {
        let top = match self.range_end {
            Some(end) => exit_value.min(end),
            None => exit_value,
        };
        (top - self.range_start).max(Decimal::ZERO)
    }

    pub fn total_shares(&self) -> Decimal {
        self.participating_shares.iter().map(|p| p.shares).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RvpsEntry {
    pub name: String,
    pub shares: Decimal,
    pub percentage: Rate,
    pub section_rvps: Money,
    pub section_value: Money,
    pub cumulative_value: Money,
    pub cumulative_rvps: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeAllocation {
    pub range_index: usize,
    pub range_start: Money,
    pub range_end: Option<Money>,
    pub range_proceeds: Money,
    pub entries: Vec<RvpsEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityTotal {
    pub name: String,
    pub shares: Decimal,
    pub total_value: Money,
    pub value_per_share: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RvpsAtValueResult {
    pub exit_value: Money,
    pub total_distributed: Money,
    /// Proceeds above the level any security can absorb.
    pub undistributed: Money,
    pub ranges: Vec<RangeAllocation>,
    pub security_totals: Vec<SecurityTotal>,
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Lay the sorted breakpoints out as consecutive waterfall ranges.
pub fn build_waterfall_ranges(breakpoints: &[Breakpoint]) -> Vec<WaterfallRange> {
    let mut ranges: Vec<WaterfallRange> = breakpoints
        .iter()
        .map(|bp| WaterfallRange {
            index: 0,
            breakpoint_type: bp.breakpoint_type,
            range_start: bp.range_start,
            range_end: bp.range_end,
            is_last_range: bp.range_end.is_none(),
            participating_shares: bp.participating_shares.clone(),
        })
        .collect();
    // Preference tiers end where the residual ranges begin, so a stable sort
    // on start keeps tiers ahead of a pro-rata range at the same value.
    ranges.sort_by(|a, b| a.range_start.cmp(&b.range_start));
    for (i, r) in ranges.iter_mut().enumerate() {
        r.index = i;
    }
    ranges
}

/// Value of each participant in `range` at `exit_value`.
fn section(range: &WaterfallRange, exit_value: Money) -> (Money, Vec<(ParticipatingShare, Money)>) {
    let proceeds = range.proceeds_at(exit_value);
    let parts = range
        .participating_shares
        .iter()
        .map(|p| {
            let value = if proceeds > Decimal::ZERO {
                proceeds * p.percentage
            } else {
                Decimal::ZERO
            };
            (p.clone(), value)
        })
        .collect();
    (proceeds, parts)
}

/// `total / shares`, zero for a security with no shares.
pub(crate) fn value_per_share(total: Money, shares: Decimal, model: &str) -> AllocationResult<Money> {
    if shares.is_zero() {
        return Ok(Decimal::ZERO);
    }
    total.checked_div(shares).ok_or_else(|| {
        AllocationError::degenerate(model, format!("per-share value of {total} over {shares} shares overflows"))
    })
}

fn validate_exit_value(exit_value: Money) -> AllocationResult<()> {
    if exit_value < Decimal::ZERO {
        return Err(AllocationError::invalid("exit_value", "must be non-negative"));
    }
    Ok(())
}

/// Walk every range once, carrying cumulative value per security.
fn allocate(ranges: &[WaterfallRange], exit_value: Money) -> Vec<RangeAllocation> {
    let mut cumulative: HashMap<String, Money> = HashMap::new();
    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        let (proceeds, parts) = section(range, exit_value);
        let entries = parts
            .into_iter()
            .map(|(p, value)| {
                let total = cumulative.entry(p.name.clone()).or_insert(Decimal::ZERO);
                *total += value;
                let (section_rvps, cumulative_rvps) = if p.shares.is_zero() {
                    (Decimal::ZERO, Decimal::ZERO)
                } else {
                    (value / p.shares, *total / p.shares)
                };
                RvpsEntry {
                    name: p.name,
                    shares: p.shares,
                    percentage: p.percentage,
                    section_rvps,
                    section_value: value,
                    cumulative_value: *total,
                    cumulative_rvps,
                }
            })
            .collect();
        out.push(RangeAllocation {
            range_index: range.index,
            range_start: range.range_start,
            range_end: range.range_end,
            range_proceeds: proceeds,
            entries,
        });
    }
    out
}

/// Total paid out across all ranges at `exit_value`.
pub(crate) fn total_distributed(ranges: &[WaterfallRange], exit_value: Money) -> Money {
    ranges
        .iter()
        .map(|r| {
            if r.participating_shares.is_empty() {
                Decimal::ZERO
            } else {
                r.proceeds_at(exit_value)
            }
        })
        .sum()
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// RVPS entries for the range at `range_index`.
///
/// Cumulative figures are re-derived from every earlier range against the
/// same `exit_value`.
pub fn compute_rvps(
    ranges: &[WaterfallRange],
    exit_value: Money,
    range_index: usize,
) -> AllocationResult<Vec<RvpsEntry>> {
    validate_exit_value(exit_value)?;
    if range_index >= ranges.len() {
        return Err(AllocationError::invalid(
            "range_index",
            format!("{range_index} out of bounds for {} ranges", ranges.len()),
        ));
    }
    let mut allocated = allocate(&ranges[..=range_index], exit_value);
    Ok(allocated
        .pop()
        .map(|r| r.entries)
        .unwrap_or_default())
}

/// Allocate `exit_value` across every range of a solved waterfall.
pub fn compute_rvps_at_value(
    breakpoints: &[Breakpoint],
    exit_value: Money,
) -> AllocationResult<ComputationOutput<RvpsAtValueResult>> {
    let start = Instant::now();
    validate_exit_value(exit_value)?;
    if breakpoints.is_empty() {
        return Err(AllocationError::invalid(
            "breakpoints",
            "at least one breakpoint is required",
        ));
    }
    let mut warnings = Vec::new();

    let ranges = build_waterfall_ranges(breakpoints);
    let allocated = allocate(&ranges, exit_value);

    // First-seen order keeps totals in cap-table order.
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, (Decimal, Money)> = HashMap::new();
    for range in &allocated {
        for e in &range.entries {
            let slot = totals.entry(e.name.clone()).or_insert_with(|| {
                order.push(e.name.clone());
                (e.shares, Decimal::ZERO)
            });
            slot.1 += e.section_value;
        }
    }
    let security_totals = order
        .into_iter()
        .filter_map(|name| totals.remove(&name).map(|t| (name, t)))
        .map(|(name, (shares, total_value))| {
            Ok(SecurityTotal {
                value_per_share: value_per_share(total_value, shares, "rvps")?,
                name,
                shares,
                total_value,
            })
        })
        .collect::<AllocationResult<Vec<_>>>()?;

    let total: Money = security_totals.iter().map(|s| s.total_value).sum();
    let undistributed = (exit_value - total).max(Decimal::ZERO);
    if undistributed > UNDISTRIBUTED_TOLERANCE {
        warnings.push(format!(
            "{} of proceeds exceeds what the cap table can absorb",
            undistributed.round_dp(2)
        ));
    }
    log::debug!(
        "allocated {exit_value} across {} ranges, {} securities",
        ranges.len(),
        security_totals.len()
    );

    let assumptions = serde_json::json!({
        "exit_value": exit_value.to_string(),
        "ranges": ranges.len(),
        "share_basis": "as-converted",
    });
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Residual value per share (section and cumulative)",
        &assumptions,
        warnings,
        elapsed,
        RvpsAtValueResult {
            exit_value,
            total_distributed: total,
            undistributed,
            ranges: allocated,
            security_totals,
        },
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
