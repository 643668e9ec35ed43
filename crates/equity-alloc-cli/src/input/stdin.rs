use serde_json::Value;
use std::io::{self, Read};

use equity_alloc_core::cap_table::CapTable;

use super::file;

/// Attempt to read JSON from stdin if data is being piped.
/// Returns None if stdin is a TTY (interactive).
pub fn read_stdin() -> Result<Option<Value>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;

    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    Ok(Some(value))
}

/// Cap table from `--input`, else from piped stdin.
pub fn read_cap_table(path: Option<&str>) -> Result<CapTable, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return file::read_json(path);
    }
    match read_stdin()? {
        Some(data) => Ok(serde_json::from_value(data)?),
        None => Err("--input <cap_table.json> or stdin required".into()),
    }
}
