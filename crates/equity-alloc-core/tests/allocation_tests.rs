use equity_alloc_core::allocation::{build_waterfall_ranges, compute_rvps, compute_rvps_at_value};
use equity_alloc_core::breakpoints::{solve_breakpoints, Breakpoint, BreakpointType};
use equity_alloc_core::cap_table::CapTable;
use equity_alloc_core::AllocationError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

fn approx_eq(a: Decimal, b: Decimal, tol: Decimal) -> bool {
    (a - b).abs() < tol
}

fn table(value: serde_json::Value) -> CapTable {
    serde_json::from_value(value).unwrap()
}

fn single_preferred() -> CapTable {
    table(json!({
        "share_classes": [
            { "id": "cs", "name": "Common", "share_type": "common",
              "shares_outstanding": 1000000, "price_per_share": "0" },
            { "id": "a", "name": "Series A", "share_type": "preferred",
              "shares_outstanding": 500000, "price_per_share": "1.00",
              "preference_type": "non-participating", "seniority": 0 }
        ]
    }))
}

fn growth_stage() -> CapTable {
    table(json!({
        "share_classes": [
            { "id": "cs", "name": "Common", "share_type": "common",
              "shares_outstanding": 8000000, "price_per_share": "0" },
            { "id": "seed", "name": "Seed", "share_type": "preferred",
              "shares_outstanding": 2000000, "price_per_share": "0.50",
              "preference_type": "non-participating", "seniority": 2 },
            { "id": "a", "name": "Series A", "share_type": "preferred",
              "shares_outstanding": 3000000, "price_per_share": "2.00",
              "preference_type": "participating-with-cap", "participation_cap": "3",
              "seniority": 1 },
            { "id": "b", "name": "Series B", "share_type": "preferred",
              "shares_outstanding": 2500000, "price_per_share": "4.00",
              "preference_type": "non-participating", "conversion_ratio": "1.2",
              "seniority": 0 }
        ],
        "options": [
            { "id": "2019", "type": "Options", "num_options": 1000000, "exercise_price": "0.25" },
            { "id": "2022", "type": "Options", "num_options": 500000, "exercise_price": "1.10" },
            { "id": "bank", "type": "Warrants", "num_options": 100000, "exercise_price": "4.00",
              "name": "Bank warrants" },
            { "id": "rsu", "type": "RSUs", "num_options": 50000, "exercise_price": "0" }
        ]
    }))
}

fn breakpoints(cap_table: &CapTable) -> Vec<Breakpoint> {
    solve_breakpoints(cap_table).unwrap().result.sorted_breakpoints
}

fn total_for(out: &equity_alloc_core::allocation::RvpsAtValueResult, name: &str) -> Decimal {
    out.security_totals
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.total_value)
        .unwrap_or(Decimal::ZERO)
}

// ===========================================================================
// Conservation
// ===========================================================================

#[test]
fn test_reference_scenario_conserves_two_million() {
    let bps = breakpoints(&single_preferred());
    let out = compute_rvps_at_value(&bps, dec!(2000000)).unwrap().result;
    assert!(approx_eq(out.total_distributed, dec!(2000000), dec!(0.0001)));
    assert!(approx_eq(total_for(&out, "Series A"), dec!(666666.6667), dec!(0.001)));
    assert!(approx_eq(total_for(&out, "Common"), dec!(1333333.3333), dec!(0.001)));
    assert_eq!(out.undistributed, Decimal::ZERO);
}

#[test]
fn test_conservation_across_exit_values() {
    for cap_table in [single_preferred(), growth_stage()] {
        let bps = breakpoints(&cap_table);
        for v in [
            dec!(0),
            dec!(1),
            dec!(250000),
            dec!(999999.99),
            dec!(10000000),
            dec!(17000000),
            dec!(23456789.01),
            dec!(60000000),
            dec!(250000000),
        ] {
            let out = compute_rvps_at_value(&bps, v).unwrap().result;
            let tol = dec!(0.0001) * (Decimal::ONE + v / dec!(1000000));
            assert!(
                approx_eq(out.total_distributed, v, tol),
                "at {v}: distributed {}",
                out.total_distributed
            );
        }
    }
}

#[test]
fn test_conservation_at_every_breakpoint() {
    let bps = breakpoints(&growth_stage());
    for bp in &bps {
        let out = compute_rvps_at_value(&bps, bp.exit_value).unwrap().result;
        assert!(
            approx_eq(out.total_distributed, bp.exit_value, dec!(0.01)),
            "{} at {}",
            bp.breakpoint_type,
            bp.exit_value
        );
    }
}

// ===========================================================================
// Economics
// ===========================================================================

#[test]
fn test_senior_preference_paid_first() {
    let bps = breakpoints(&growth_stage());
    let out = compute_rvps_at_value(&bps, dec!(8000000)).unwrap().result;
    assert_eq!(total_for(&out, "Series B"), dec!(8000000));
    assert_eq!(total_for(&out, "Series A"), Decimal::ZERO);
    assert_eq!(total_for(&out, "Common"), Decimal::ZERO);
}

#[test]
fn test_option_receives_intrinsic_value() {
    let mut cap_table = single_preferred();
    cap_table.options = serde_json::from_value(json!([
        { "id": "2021", "type": "Options", "num_options": 200000, "exercise_price": "0.25" }
    ]))
    .unwrap();
    let bps = breakpoints(&cap_table);
    // Value per common share 0.75: 500k + 1M x 0.25 + 1.2M x 0.5
    let out = compute_rvps_at_value(&bps, dec!(1350000)).unwrap().result;
    assert!(approx_eq(total_for(&out, "Options 2021"), dec!(100000), dec!(0.001)));
    assert!(approx_eq(total_for(&out, "Common"), dec!(750000), dec!(0.001)));
    assert!(approx_eq(total_for(&out, "Series A"), dec!(500000), dec!(0.001)));
}

#[test]
fn test_capped_class_held_at_cap_until_conversion() {
    let bps = breakpoints(&growth_stage());
    let cap = bps
        .iter()
        .find(|b| b.breakpoint_type == BreakpointType::ParticipationCap)
        .unwrap();
    let conv = bps
        .iter()
        .find(|b| {
            b.breakpoint_type == BreakpointType::VoluntaryConversion
                && b.explanation.starts_with("Series A")
        })
        .unwrap();
    let mid = (cap.exit_value + conv.exit_value) / dec!(2);
    let out = compute_rvps_at_value(&bps, mid).unwrap().result;
    // 3x cap on $6M invested
    assert!(approx_eq(total_for(&out, "Series A"), dec!(18000000), dec!(0.01)));
}

#[test]
fn test_converted_classes_match_common_per_share() {
    let bps = breakpoints(&growth_stage());
    let out = compute_rvps_at_value(&bps, dec!(500000000)).unwrap().result;
    let common = out
        .security_totals
        .iter()
        .find(|s| s.name == "Common")
        .unwrap()
        .value_per_share;
    for name in ["Seed", "Series A", "Series B", "RSUs rsu"] {
        let pps = out
            .security_totals
            .iter()
            .find(|s| s.name == name)
            .unwrap()
            .value_per_share;
        assert!(approx_eq(pps, common, dec!(0.000001)), "{name}: {pps} vs {common}");
    }
    let warrants = out
        .security_totals
        .iter()
        .find(|s| s.name == "Bank warrants")
        .unwrap();
    assert!(approx_eq(warrants.value_per_share, common - dec!(4), dec!(0.000001)));
}

#[test]
fn test_non_participating_indifferent_at_conversion() {
    let bps = breakpoints(&single_preferred());
    let out = compute_rvps_at_value(&bps, dec!(1500000)).unwrap().result;
    let a = out.security_totals.iter().find(|s| s.name == "Series A").unwrap();
    let c = out.security_totals.iter().find(|s| s.name == "Common").unwrap();
    assert_eq!(a.total_value, dec!(500000));
    assert_eq!(a.value_per_share, c.value_per_share);
}

// ===========================================================================
// Ranges and per-range RVPS
// ===========================================================================

#[test]
fn test_ranges_tile_the_axis() {
    let ranges = build_waterfall_ranges(&breakpoints(&growth_stage()));
    assert_eq!(ranges[0].range_start, Decimal::ZERO);
    for w in ranges.windows(2) {
        assert_eq!(w[0].range_end, Some(w[1].range_start));
    }
    assert!(ranges.last().unwrap().is_last_range);
    assert_eq!(ranges.iter().filter(|r| r.is_last_range).count(), 1);
}

#[test]
fn test_compute_rvps_matches_at_value_result() {
    let bps = breakpoints(&growth_stage());
    let ranges = build_waterfall_ranges(&bps);
    let v = dec!(42000000);
    let at_value = compute_rvps_at_value(&bps, v).unwrap().result;
    for (i, range) in at_value.ranges.iter().enumerate() {
        let entries = compute_rvps(&ranges, v, i).unwrap();
        assert_eq!(entries, range.entries);
    }
}

#[test]
fn test_section_rvps_is_proceeds_over_shares_in_pro_rata_range() {
    let bps = breakpoints(&single_preferred());
    let ranges = build_waterfall_ranges(&bps);
    // Pro-rata range [500k, 1.5M): 1M common shares
    let entries = compute_rvps(&ranges, dec!(900000), 1).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].section_rvps, dec!(0.4));
    assert_eq!(entries[0].cumulative_rvps, dec!(0.4));
}

#[test]
fn test_cumulative_value_includes_earlier_ranges() {
    let bps = breakpoints(&single_preferred());
    let ranges = build_waterfall_ranges(&bps);
    let last = ranges.len() - 1;
    let entries = compute_rvps(&ranges, dec!(3000000), last).unwrap();
    let a = entries.iter().find(|e| e.name == "Series A").unwrap();
    // 500k preference + 1.5M / 3
    assert!(approx_eq(a.cumulative_value, dec!(1000000), dec!(0.0001)));
    assert!(approx_eq(a.cumulative_rvps, dec!(2), dec!(0.000001)));
}

#[test]
fn test_negative_exit_value_rejected() {
    let bps = breakpoints(&single_preferred());
    match compute_rvps_at_value(&bps, dec!(-5)).unwrap_err() {
        AllocationError::InvalidInput { field, .. } => assert_eq!(field, "exit_value"),
        other => panic!("Expected InvalidInput, got {other:?}"),
    }
}
