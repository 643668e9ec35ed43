use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use super::validation::{run_checks, ValidationCheck};
use crate::cap_table::{CapTable, PreferenceType, ShareType};
use crate::error::AllocationError;
use crate::types::*;
use crate::AllocationResult;

/// Model tag for numerical errors raised while solving.
const SOLVER: &str = "breakpoint_solver";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Kind of threshold. Declaration order is the tie-break order for equal
/// exit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    LiquidationPreference,
    ProRataDistribution,
    OptionExercise,
    ParticipationCap,
    VoluntaryConversion,
}

impl BreakpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakpointType::LiquidationPreference => "liquidation_preference",
            BreakpointType::ProRataDistribution => "pro_rata_distribution",
            BreakpointType::OptionExercise => "option_exercise",
            BreakpointType::ParticipationCap => "participation_cap",
            BreakpointType::VoluntaryConversion => "voluntary_conversion",
        }
    }
}

impl fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security's share of one waterfall range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipatingShare {
    pub name: String,
    /// As-converted (common-equivalent) shares.
    pub shares: Decimal,
    /// Fraction of the range's proceeds, summing to 1 across the range.
    pub percentage: Rate,
}

/// An exit-value threshold at which the marginal split of proceeds changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub breakpoint_type: BreakpointType,
    /// For liquidation preferences: the value at which the tier is fully
    /// paid. For every other type: the value at which the new split begins.
    pub exit_value: Money,
    /// The range of exit values this breakpoint's participants share.
    pub range_start: Money,
    /// `None` for the open-ended last range.
    pub range_end: Option<Money>,
    /// Cumulative value per common share at the trigger point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_share_threshold: Option<Money>,
    pub affected_securities: Vec<String>,
    pub participating_shares: Vec<ParticipatingShare>,
    pub priority_order: u32,
    pub explanation: String,
    pub mathematical_derivation: String,
    pub dependencies: Vec<String>,
}

impl Breakpoint {
    /// Stable reference used in `dependencies`.
    pub fn label(&self) -> String {
        format!("{}#{}", self.breakpoint_type, self.priority_order)
    }

    pub fn is_last_range(&self) -> bool {
        self.range_end.is_none()
    }
}

/// A deduplicated exit-value threshold with the reasons it matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalValue {
    pub exit_value: Money,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub computation_time_us: u64,
    /// Threshold events processed by the solver.
    pub iterations: u32,
    pub cache_hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointAnalysisResult {
    pub total_breakpoints: usize,
    pub breakpoints_by_type: BTreeMap<BreakpointType, usize>,
    pub sorted_breakpoints: Vec<Breakpoint>,
    pub critical_values: Vec<CriticalValue>,
    /// Sum of all liquidation preferences (including accrued dividends).
    pub total_liquidation_preference: Money,
    /// Proceeds the cap table can absorb; `None` when unbounded.
    pub total_distributable: Option<Money>,
    pub audit_summary: String,
    pub validation_results: Vec<ValidationCheck>,
    pub performance_metrics: PerformanceMetrics,
}

impl BreakpointAnalysisResult {
    pub fn all_checks_passed(&self) -> bool {
        self.validation_results.iter().all(|c| c.passed)
    }

    /// Turn failed self-checks into an error.
    pub fn ensure_valid(&self) -> AllocationResult<()> {
        let failed: Vec<String> = self
            .validation_results
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(AllocationError::Inconsistency(failed.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Solver internals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolChange {
    Join,
    Leave,
}

/// A security entering or leaving the residual pool once the cumulative
/// value per common share reaches `threshold`.
#[derive(Debug, Clone)]
struct PoolEvent {
    threshold: Decimal,
    kind: BreakpointType,
    change: PoolChange,
    /// Position in cap-table order; keeps pool listings deterministic.
    security: usize,
    name: String,
    shares: Decimal,
    detail: String,
}

#[derive(Debug, Clone)]
struct PoolMember {
    security: usize,
    name: String,
    shares: Decimal,
}

fn pro_rata_split(members: &[PoolMember]) -> Vec<ParticipatingShare> {
    let total: Decimal = members.iter().map(|m| m.shares).sum();
    members
        .iter()
        .map(|m| ParticipatingShare {
            name: m.name.clone(),
            shares: m.shares,
            percentage: if total.is_zero() {
                Decimal::ZERO
            } else {
                m.shares / total
            },
        })
        .collect()
}

fn money(v: Decimal) -> String {
    format!("${}", v.round_dp(2))
}

/// Output of the raw solve before it is wrapped in an analysis result.
#[derive(Debug, Clone)]
pub(crate) struct Solved {
    pub breakpoints: Vec<Breakpoint>,
    pub total_preference: Money,
    pub iterations: u32,
}

/// Liquidation-preference tiers, most senior first.
fn preference_breakpoints(
    cap_table: &CapTable,
    iterations: &mut u32,
) -> AllocationResult<(Vec<Breakpoint>, Money)> {
    let mut tiers: BTreeMap<u32, Vec<(String, Decimal, Money)>> = BTreeMap::new();
    for class in cap_table.preferred() {
        let pref = class.liquidation_preference()?;
        if pref > Decimal::ZERO {
            tiers.entry(class.seniority).or_default().push((
                class.name.clone(),
                class.as_converted_shares()?,
                pref,
            ));
        }
    }

    let mut out = Vec::with_capacity(tiers.len());
    let mut cumulative = Decimal::ZERO;
    for (seniority, classes) in tiers {
        *iterations += 1;
        let tier_total: Money = classes.iter().map(|(_, _, p)| *p).sum();
        let start = cumulative;
        cumulative += tier_total;

        let participating_shares = classes
            .iter()
            .map(|(name, shares, pref)| ParticipatingShare {
                name: name.clone(),
                shares: *shares,
                percentage: *pref / tier_total,
            })
            .collect();
        let names: Vec<String> = classes.iter().map(|(n, _, _)| n.clone()).collect();
        let terms: Vec<String> = classes
            .iter()
            .map(|(n, _, p)| format!("{n} {}", money(*p)))
            .collect();

        let explanation = if names.len() > 1 {
            format!(
                "Seniority {seniority} preferences of {} (pari passu) fully paid at {}",
                names.join(", "),
                money(cumulative)
            )
        } else {
            format!(
                "{} liquidation preference (seniority {seniority}) fully paid at {}",
                names[0],
                money(cumulative)
            )
        };

        out.push(Breakpoint {
            breakpoint_type: BreakpointType::LiquidationPreference,
            exit_value: cumulative,
            range_start: start,
            range_end: Some(cumulative),
            per_share_threshold: None,
            affected_securities: names,
            participating_shares,
            priority_order: 0,
            explanation,
            mathematical_derivation: format!(
                "tier = {} = {}; exit value = {} + {} = {}",
                terms.join(" + "),
                money(tier_total),
                money(start),
                money(tier_total),
                money(cumulative)
            ),
            dependencies: Vec::new(),
        });
    }
    Ok((out, cumulative))
}

/// Initial residual pool and the join/leave events above it.
fn pool_events(cap_table: &CapTable) -> AllocationResult<(Vec<PoolMember>, Vec<PoolEvent>)> {
    let mut initial = Vec::new();
    let mut events = Vec::new();

    for (idx, class) in cap_table.share_classes.iter().enumerate() {
        let shares = class.as_converted_shares()?;
        if shares.is_zero() {
            continue;
        }
        let member = PoolMember {
            security: idx,
            name: class.name.clone(),
            shares,
        };
        if class.share_type == ShareType::Common {
            initial.push(member);
            continue;
        }

        let pref = class.liquidation_preference()?;
        match class.preference_type {
            PreferenceType::Participating => initial.push(member),
            PreferenceType::NonParticipating => {
                // Converting pays shares * x, keeping the preference pays pref.
                let x_conv = per_share(pref, shares, &class.name)?;
                if x_conv.is_zero() {
                    initial.push(member);
                } else {
                    events.push(PoolEvent {
                        threshold: x_conv,
                        kind: BreakpointType::VoluntaryConversion,
                        change: PoolChange::Join,
                        security: idx,
                        name: class.name.clone(),
                        shares,
                        detail: format!(
                            "{} converts: {} as-converted shares x {} per share = preference {}",
                            class.name,
                            shares,
                            money(x_conv),
                            money(pref)
                        ),
                    });
                }
            }
            PreferenceType::ParticipatingWithCap => {
                let cap_total = class
                    .participation_cap_amount()?
                    .unwrap_or(Decimal::ZERO)
                    .max(pref);
                let x_cap = per_share(cap_total - pref, shares, &class.name)?;
                let x_conv = per_share(cap_total, shares, &class.name)?;
                if x_cap > Decimal::ZERO {
                    initial.push(member);
                    events.push(PoolEvent {
                        threshold: x_cap,
                        kind: BreakpointType::ParticipationCap,
                        change: PoolChange::Leave,
                        security: idx,
                        name: class.name.clone(),
                        shares,
                        detail: format!(
                            "{} reaches its cap: preference {} + {} shares x {} = {}",
                            class.name,
                            money(pref),
                            shares,
                            money(x_cap),
                            money(cap_total)
                        ),
                    });
                }
                if x_conv.is_zero() {
                    initial.push(PoolMember {
                        security: idx,
                        name: class.name.clone(),
                        shares,
                    });
                } else {
                    events.push(PoolEvent {
                        threshold: x_conv,
                        kind: BreakpointType::VoluntaryConversion,
                        change: PoolChange::Join,
                        security: idx,
                        name: class.name.clone(),
                        shares,
                        detail: format!(
                            "{} converts above its cap: {} shares x {} = capped payout {}",
                            class.name,
                            shares,
                            money(x_conv),
                            money(cap_total)
                        ),
                    });
                }
            }
        }
    }

    let offset = cap_table.share_classes.len();
    for (i, tranche) in cap_table.options.iter().enumerate() {
        if tranche.num_options == 0 {
            continue;
        }
        let shares = Decimal::from(tranche.num_options);
        let member = PoolMember {
            security: offset + i,
            name: tranche.label(),
            shares,
        };
        if tranche.exercise_price.is_zero() {
            initial.push(member);
        } else {
            events.push(PoolEvent {
                threshold: tranche.exercise_price,
                kind: BreakpointType::OptionExercise,
                change: PoolChange::Join,
                security: offset + i,
                name: member.name,
                shares,
                detail: format!(
                    "{} ({} @ {}) in the money once value per common share exceeds strike",
                    tranche.label(),
                    tranche.num_options,
                    money(tranche.exercise_price)
                ),
            });
        }
    }

    initial.sort_by_key(|m| m.security);
    events.sort_by(|a, b| {
        a.threshold
            .cmp(&b.threshold)
            .then(a.kind.cmp(&b.kind))
            .then(a.security.cmp(&b.security))
    });
    Ok((initial, events))
}

/// Per-share threshold at which `amount` is reached by `shares`.
fn per_share(amount: Money, shares: Decimal, security: &str) -> AllocationResult<Decimal> {
    amount.checked_div(shares).ok_or_else(|| {
        AllocationError::degenerate(
            SOLVER,
            format!("per-share threshold for {security} overflows ({amount} over {shares} shares)"),
        )
    })
}

/// Walk the residual pool from the end of the preference stack upward.
fn residual_breakpoints(
    cap_table: &CapTable,
    total_preference: Money,
    iterations: &mut u32,
) -> AllocationResult<Vec<Breakpoint>> {
    let (mut pool, events) = pool_events(cap_table)?;
    let mut out = Vec::new();

    let pool_names: Vec<String> = pool.iter().map(|m| m.name.clone()).collect();
    out.push(Breakpoint {
        breakpoint_type: BreakpointType::ProRataDistribution,
        exit_value: total_preference,
        range_start: total_preference,
        range_end: None,
        per_share_threshold: Some(Decimal::ZERO),
        affected_securities: pool_names.clone(),
        participating_shares: pro_rata_split(&pool),
        priority_order: 0,
        explanation: if pool_names.is_empty() {
            format!(
                "Preferences cleared at {}; no security shares residual proceeds yet",
                money(total_preference)
            )
        } else {
            format!(
                "Preferences cleared at {}; {} share residual proceeds pro rata",
                money(total_preference),
                pool_names.join(", ")
            )
        },
        mathematical_derivation: format!(
            "exit value = sum of liquidation preferences = {}; pool = {} as-converted shares",
            money(total_preference),
            pool.iter().map(|m| m.shares).sum::<Decimal>()
        ),
        dependencies: Vec::new(),
    });

    let mut x = Decimal::ZERO;
    let mut value = total_preference;
    let mut i = 0;
    while i < events.len() {
        // Merge events of one kind at one threshold into a single breakpoint.
        let head = &events[i];
        let mut j = i + 1;
        while j < events.len()
            && events[j].threshold == head.threshold
            && events[j].kind == head.kind
        {
            j += 1;
        }
        let group = &events[i..j];
        *iterations += group.len() as u32;

        let pool_shares: Decimal = pool.iter().map(|m| m.shares).sum();
        let dx = head.threshold - x;
        let prev_value = value;
        value = pool_shares
            .checked_mul(dx)
            .and_then(|v| value.checked_add(v))
            .ok_or_else(|| {
                AllocationError::degenerate(
                    SOLVER,
                    format!("exit value overflows at per-share threshold {}", head.threshold),
                )
            })?;
        x = head.threshold;

        for ev in group {
            match ev.change {
                PoolChange::Join => pool.push(PoolMember {
                    security: ev.security,
                    name: ev.name.clone(),
                    shares: ev.shares,
                }),
                PoolChange::Leave => pool.retain(|m| m.security != ev.security),
            }
        }
        pool.sort_by_key(|m| m.security);

        out.push(Breakpoint {
            breakpoint_type: head.kind,
            exit_value: value,
            range_start: value,
            range_end: None,
            per_share_threshold: Some(x),
            affected_securities: pool.iter().map(|m| m.name.clone()).collect(),
            participating_shares: pro_rata_split(&pool),
            priority_order: 0,
            explanation: group
                .iter()
                .map(|e| e.detail.clone())
                .collect::<Vec<_>>()
                .join("; "),
            mathematical_derivation: format!(
                "exit value = {} + {} shares x ({} - {}) = {}",
                money(prev_value),
                pool_shares,
                money(x),
                money(x - dx),
                money(value)
            ),
            dependencies: Vec::new(),
        });
        log::debug!(
            "{} at per-share {} -> exit value {} ({} pool members)",
            head.kind,
            x,
            value,
            pool.len()
        );
        i = j;
    }
    Ok(out)
}

/// Compute and order every breakpoint for a validated cap table.
pub(crate) fn solve(cap_table: &CapTable) -> AllocationResult<Solved> {
    cap_table.validate()?;
    let mut iterations = 0u32;

    let (mut breakpoints, total_preference) = preference_breakpoints(cap_table, &mut iterations)?;
    let residual = residual_breakpoints(cap_table, total_preference, &mut iterations)?;
    breakpoints.extend(residual);

    // Solve order is the secondary key after exit value and type.
    for (i, bp) in breakpoints.iter_mut().enumerate() {
        bp.priority_order = i as u32;
    }
    link_dependencies(&mut breakpoints);
    breakpoints.sort_by(|a, b| {
        a.exit_value
            .cmp(&b.exit_value)
            .then(a.breakpoint_type.cmp(&b.breakpoint_type))
            .then(a.priority_order.cmp(&b.priority_order))
    });
    assign_residual_ranges(&mut breakpoints);

    Ok(Solved {
        breakpoints,
        total_preference,
        iterations,
    })
}

/// Each preference tier depends on the tiers senior to it, the pro-rata
/// breakpoint on every tier, and each later event on the one before it.
fn link_dependencies(breakpoints: &mut [Breakpoint]) {
    let lp_count = breakpoints
        .iter()
        .filter(|b| b.breakpoint_type == BreakpointType::LiquidationPreference)
        .count();
    let labels: Vec<String> = breakpoints.iter().map(Breakpoint::label).collect();
    for (i, bp) in breakpoints.iter_mut().enumerate() {
        bp.dependencies = if i < lp_count {
            labels[..i].to_vec()
        } else if i == lp_count {
            labels[..lp_count].to_vec()
        } else {
            vec![labels[i - 1].clone()]
        };
    }
}

/// Residual breakpoints own `[exit_value, next residual exit_value)`. Breakpoints
/// sharing an exit value all carry the pool that holds above that value.
fn assign_residual_ranges(breakpoints: &mut [Breakpoint]) {
    let residual: Vec<usize> = breakpoints
        .iter()
        .enumerate()
        .filter(|(_, b)| b.breakpoint_type != BreakpointType::LiquidationPreference)
        .map(|(i, _)| i)
        .collect();

    let mut k = 0;
    while k < residual.len() {
        let value = breakpoints[residual[k]].exit_value;
        let mut last = k;
        while last + 1 < residual.len() && breakpoints[residual[last + 1]].exit_value == value {
            last += 1;
        }
        // The highest solve order at this value reflects the final pool.
        let winner = residual[k..=last]
            .iter()
            .copied()
            .max_by_key(|&i| breakpoints[i].priority_order)
            .unwrap_or(residual[last]);
        let pool = breakpoints[winner].participating_shares.clone();
        let names = breakpoints[winner].affected_securities.clone();
        let next = residual.get(last + 1).map(|&n| breakpoints[n].exit_value);
        for (offset, &idx) in residual[k..=last].iter().enumerate() {
            let bp = &mut breakpoints[idx];
            bp.participating_shares = pool.clone();
            bp.affected_securities = names.clone();
            bp.range_start = value;
            bp.range_end = if k + offset < last { Some(value) } else { next };
        }
        k = last + 1;
    }
}

fn critical_values(breakpoints: &[Breakpoint]) -> Vec<CriticalValue> {
    let mut out: Vec<CriticalValue> = Vec::new();
    for bp in breakpoints {
        let line = format!("{}: {}", bp.breakpoint_type, bp.explanation);
        match out.last_mut() {
            Some(cv) if cv.exit_value == bp.exit_value => {
                cv.description.push_str("; ");
                cv.description.push_str(&line);
            }
            _ => out.push(CriticalValue {
                exit_value: bp.exit_value,
                description: line,
            }),
        }
    }
    out
}

fn audit_summary(
    by_type: &BTreeMap<BreakpointType, usize>,
    total: usize,
    total_preference: Money,
    checks: &[ValidationCheck],
) -> String {
    let counts: Vec<String> = by_type.iter().map(|(k, v)| format!("{v} {k}")).collect();
    let failed = checks.iter().filter(|c| !c.passed).count();
    format!(
        "{total} breakpoints ({}); total liquidation preference {}; {}/{} validation checks passed",
        counts.join(", "),
        money(total_preference),
        checks.len() - failed,
        checks.len()
    )
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Solve the waterfall breakpoints for a cap-table snapshot.
///
/// Pure and deterministic: the same snapshot always yields identical
/// `sorted_breakpoints`.
pub fn solve_breakpoints(
    cap_table: &CapTable,
) -> AllocationResult<ComputationOutput<BreakpointAnalysisResult>> {
    let start = Instant::now();
    let solved = solve(cap_table)?;
    let mut warnings = Vec::new();

    let checks = run_checks(&solved.breakpoints, solved.total_preference);
    for check in checks.iter().filter(|c| !c.passed) {
        log::warn!("breakpoint validation failed: {} ({})", check.name, check.detail);
        warnings.push(format!("Validation failed: {}: {}", check.name, check.detail));
    }

    let total_distributable = solved
        .breakpoints
        .iter()
        .rev()
        .find(|b| b.breakpoint_type != BreakpointType::LiquidationPreference)
        .filter(|b| b.participating_shares.is_empty())
        .map(|b| b.range_start);
    if let Some(limit) = total_distributable {
        warnings.push(format!(
            "No security participates above {}; excess proceeds are undistributed",
            money(limit)
        ));
    }

    let mut by_type = BTreeMap::new();
    for bp in &solved.breakpoints {
        *by_type.entry(bp.breakpoint_type).or_insert(0usize) += 1;
    }
    let total = solved.breakpoints.len();
    let summary = audit_summary(&by_type, total, solved.total_preference, &checks);
    log::debug!("{summary}");

    let assumptions = serde_json::json!({
        "share_classes": cap_table.share_classes.len(),
        "option_tranches": cap_table.options.len(),
        "fully_diluted_shares": cap_table.fully_diluted_shares()?.to_string(),
        "option_exercise_convention": "intrinsic value (no exercise cash added to proceeds)",
        "share_basis": "as-converted",
    });

    let elapsed = start.elapsed().as_micros() as u64;
    let result = BreakpointAnalysisResult {
        total_breakpoints: total,
        breakpoints_by_type: by_type,
        critical_values: critical_values(&solved.breakpoints),
        sorted_breakpoints: solved.breakpoints,
        total_liquidation_preference: solved.total_preference,
        total_distributable,
        audit_summary: summary,
        validation_results: checks,
        performance_metrics: PerformanceMetrics {
            computation_time_us: elapsed,
            iterations: solved.iterations,
            cache_hits: 0,
        },
    };

    Ok(with_metadata(
        "Waterfall breakpoint analysis (per-share threshold sweep)",
        &assumptions,
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
