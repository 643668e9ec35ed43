use clap::Args;
use serde_json::Value;

use equity_alloc_core::allocation::build_waterfall_ranges;
use equity_alloc_core::breakpoints::solve_breakpoints;

use crate::input;

/// Arguments for breakpoint analysis
#[derive(Args)]
pub struct BreakpointsArgs {
    /// Path to cap table JSON (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Fail when any waterfall consistency check fails
    #[arg(long)]
    pub strict: bool,
}

pub fn run_breakpoints(args: BreakpointsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let cap_table = input::stdin::read_cap_table(args.input.as_deref())?;
    let output = solve_breakpoints(&cap_table)?;
    if args.strict {
        output.result.ensure_valid()?;
    }
    Ok(serde_json::to_value(output)?)
}

/// Arguments for listing waterfall ranges
#[derive(Args)]
pub struct RangesArgs {
    /// Path to cap table JSON (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_ranges(args: RangesArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let cap_table = input::stdin::read_cap_table(args.input.as_deref())?;
    let output = solve_breakpoints(&cap_table)?;
    let ranges = build_waterfall_ranges(&output.result.sorted_breakpoints);
    Ok(serde_json::to_value(ranges)?)
}
