use serde_json::Value;
use std::io;

use super::{grid, payload, row_sets, scalar_fields};

/// Write the primary row set of a result as CSV, or `field,value` pairs when
/// the result has none.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    let written = match payload(value) {
        Value::Object(result) => match row_sets(result).first() {
            Some((_, rows)) => write_rows(&mut wtr, rows),
            None => {
                let mut res = wtr.write_record(["field", "value"]);
                for (key, val) in scalar_fields(result) {
                    res = res.and_then(|_| wtr.write_record([key, val.as_str()]));
                }
                res
            }
        },
        Value::Array(rows) => write_rows(&mut wtr, rows),
        other => wtr.write_record([super::cell(other)]),
    };

    if let Err(e) = written.and_then(|_| wtr.flush().map_err(csv::Error::from)) {
        eprintln!("CSV write error: {}", e);
    }
}

fn write_rows<W: io::Write>(wtr: &mut csv::Writer<W>, rows: &[Value]) -> csv::Result<()> {
    let (headers, body) = grid(rows);
    wtr.write_record(&headers)?;
    for row in body {
        wtr.write_record(&row)?;
    }
    Ok(())
}
