use serde_json::Value;
use tabled::{builder::Builder, Table};

use super::{grid, payload, row_sets, scalar_fields};

/// Summary fields first, then one table per row set, then warnings.
pub fn print_table(value: &Value) {
    match payload(value) {
        Value::Object(result) => {
            let fields = scalar_fields(result);
            if !fields.is_empty() {
                let mut builder = Builder::default();
                builder.push_record(["Field", "Value"]);
                for (key, val) in fields {
                    builder.push_record([key.to_string(), val]);
                }
                println!("{}", Table::from(builder));
            }
            for (name, rows) in row_sets(result) {
                println!("\n{}:", title(name));
                print_rows(rows);
            }
        }
        Value::Array(rows) => print_rows(rows),
        other => println!("{}", other),
    }

    if let Some(Value::Array(warnings)) = value.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }
    if let Some(Value::String(meth)) = value.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_rows(rows: &[Value]) {
    if rows.is_empty() {
        println!("(empty)");
        return;
    }
    let (headers, body) = grid(rows);
    let mut builder = Builder::default();
    builder.push_record(headers);
    for row in body {
        builder.push_record(row);
    }
    println!("{}", Table::from(builder));
}

fn title(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, word) in key.split('_').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(c) = chars.next() {
            out.extend(c.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}
