pub mod csv_out;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

/// Row sets inside a result, in display order. Breakpoint listings flatten
/// their participant lists; the rest are printed as-is.
const ROW_SETS: [&str; 6] = [
    "sorted_breakpoints",
    "security_totals",
    "security_summary",
    "breakpoint_results",
    "results",
    "validation_results",
];

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("JSON serialization error: {}", e),
        },
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// The `result` of a computation envelope, or the value itself.
pub(crate) fn payload(value: &Value) -> &Value {
    value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value)
}

/// Named row sets present in a result object.
pub(crate) fn row_sets(result: &Map<String, Value>) -> Vec<(&'static str, &[Value])> {
    ROW_SETS
        .iter()
        .filter_map(|key| match result.get(*key) {
            Some(Value::Array(rows)) if !rows.is_empty() => Some((*key, rows.as_slice())),
            _ => None,
        })
        .collect()
}

/// Scalar fields of a result object, skipping row sets and nested objects.
pub(crate) fn scalar_fields(result: &Map<String, Value>) -> Vec<(&str, String)> {
    result
        .iter()
        .filter(|(_, v)| !v.is_array() && !v.is_object())
        .map(|(k, v)| (k.as_str(), cell(v)))
        .collect()
}

/// Column headers and cells for a homogeneous array of objects.
///
/// Participant lists (`participating_shares`, `security_allocations`) are
/// collapsed to `name (pct%)` so a breakpoint stays on one row.
pub(crate) fn grid(rows: &[Value]) -> (Vec<String>, Vec<Vec<String>>) {
    let headers: Vec<String> = match rows.first() {
        Some(Value::Object(first)) => first
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "mathematical_derivation" | "dependencies"))
            .map(|(k, _)| k.clone())
            .collect(),
        _ => return (vec!["value".to_string()], rows.iter().map(|v| vec![cell(v)]).collect()),
    };
    let body = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| row.get(h.as_str()).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();
    (headers, body)
}

pub(crate) fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(participant).collect::<Vec<_>>().join(", "),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn participant(value: &Value) -> String {
    let name = value.get("name").and_then(Value::as_str);
    let pct = value
        .get("percentage")
        .and_then(|p| p.as_str().map(str::to_string).or_else(|| p.as_f64().map(|f| f.to_string())))
        .and_then(|p| p.parse::<f64>().ok());
    match (name, pct) {
        (Some(name), Some(pct)) => format!("{} ({:.2}%)", name, pct * 100.0),
        (Some(name), None) => name.to_string(),
        _ => cell(value),
    }
}
