use serde_json::Value;

use super::{cell, payload};

/// Print only the headline answer of each command:
///
/// - breakpoints: one exit value per line
/// - rvps: `name: total` per security
/// - opm: `name: value per share` per security
/// - backsolve: the implied company value
/// - dlom: the average discount percentage
pub fn print_minimal(value: &Value) {
    let result = payload(value);

    if let Some(v) = result.get("implied_company_value") {
        println!("{}", cell(v));
    } else if let Some(Value::Array(bps)) = result.get("sorted_breakpoints") {
        for bp in bps {
            println!("{}", bp.get("exit_value").map(cell).unwrap_or_default());
        }
    } else if let Some(Value::Array(totals)) = result.get("security_totals") {
        print_pairs(totals, "total_value");
    } else if let Some(Value::Array(summary)) = result.get("security_summary") {
        print_pairs(summary, "average_per_share_value");
    } else if let Some(v) = result.get("average_discount_pct") {
        println!("{}", cell(v));
    } else {
        println!("{}", serde_json::to_string(result).unwrap_or_default());
    }
}

fn print_pairs(rows: &[Value], field: &str) {
    for row in rows {
        let name = row.get("name").map(cell).unwrap_or_default();
        let value = row.get(field).map(cell).unwrap_or_default();
        println!("{}: {}", name, value);
    }
}
