use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use equity_alloc_core::allocation::{build_waterfall_ranges, compute_rvps, compute_rvps_at_value};
use equity_alloc_core::breakpoints::solve_breakpoints;

use crate::input;

/// Arguments for RVPS allocation at an exit value
#[derive(Args)]
pub struct RvpsArgs {
    /// Path to cap table JSON (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Total exit proceeds to distribute
    #[arg(long)]
    pub exit_value: Decimal,

    /// Only report this range (0-based)
    #[arg(long)]
    pub range: Option<usize>,
}

pub fn run_rvps(args: RvpsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let cap_table = input::stdin::read_cap_table(args.input.as_deref())?;
    let breakpoints = solve_breakpoints(&cap_table)?.result.sorted_breakpoints;

    match args.range {
        Some(index) => {
            let ranges = build_waterfall_ranges(&breakpoints);
            let entries = compute_rvps(&ranges, args.exit_value, index)?;
            Ok(serde_json::to_value(entries)?)
        }
        None => {
            let output = compute_rvps_at_value(&breakpoints, args.exit_value)?;
            Ok(serde_json::to_value(output)?)
        }
    }
}
