mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use env_logger::Env;
use std::process;

use commands::allocation::RvpsArgs;
use commands::breakpoints::{BreakpointsArgs, RangesArgs};
use commands::dlom::DlomArgs;
use commands::opm::{BacksolveArgs, OpmArgs};

/// Equity waterfall and 409A allocation calculations
#[derive(Parser)]
#[command(
    name = "eqa",
    version,
    about = "Equity waterfall and 409A allocation calculations",
    long_about = "A CLI for allocating equity value across a capitalization table \
                  with decimal precision. Supports waterfall breakpoints, per-range \
                  RVPS, option pricing method allocation, price backsolves and DLOM."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log solver progress to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve the waterfall breakpoints of a cap table
    Breakpoints(BreakpointsArgs),
    /// List the exit-value ranges and who participates in each
    Ranges(RangesArgs),
    /// Allocate a given exit value (RVPS by range and security)
    Rvps(RvpsArgs),
    /// Allocate company value with the option pricing method
    Opm(OpmArgs),
    /// Solve the company value implied by a security's price
    Backsolve(BacksolveArgs),
    /// Discount for lack of marketability
    Dlom(DlomArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Breakpoints(args) => commands::breakpoints::run_breakpoints(args),
        Commands::Ranges(args) => commands::breakpoints::run_ranges(args),
        Commands::Rvps(args) => commands::allocation::run_rvps(args),
        Commands::Opm(args) => commands::opm::run_opm(args),
        Commands::Backsolve(args) => commands::opm::run_backsolve(args),
        Commands::Dlom(args) => commands::dlom::run_dlom(args),
        Commands::Version => {
            println!("eqa {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            log::debug!("command failed: {e:?}");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
