use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use equity_alloc_core::config::ValuationAssumptions;
use equity_alloc_core::opm::{BacksolveInput, OpmParams};
use equity_alloc_core::ValuationEngine;

use crate::input;

/// Market inputs shared by the OPM and backsolve commands.
#[derive(Args)]
pub struct MarketArgs {
    /// Annualised equity volatility (e.g. 0.55)
    #[arg(long)]
    pub volatility: Option<Decimal>,

    /// Continuously compounded risk-free rate
    #[arg(long)]
    pub risk_free_rate: Option<Decimal>,

    /// Years to the expected liquidity event
    #[arg(long)]
    pub time_to_liquidity: Option<Decimal>,

    /// Continuous dividend yield
    #[arg(long, default_value = "0")]
    pub dividend_yield: Decimal,
}

/// Arguments for the OPM allocation
#[derive(Args)]
pub struct OpmArgs {
    /// Path to cap table JSON (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Valuation assumptions file (YAML or JSON); overrides the flags below
    #[arg(long)]
    pub assumptions: Option<String>,

    /// Total equity value to allocate
    #[arg(long)]
    pub company_value: Option<Decimal>,

    #[command(flatten)]
    pub market: MarketArgs,
}

pub fn run_opm(args: OpmArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let cap_table = input::stdin::read_cap_table(args.input.as_deref())?;

    if let Some(ref path) = args.assumptions {
        let engine = load_engine(path)?;
        return Ok(serde_json::to_value(engine.opm(&cap_table)?)?);
    }

    let params = OpmParams {
        company_value: args
            .company_value
            .ok_or("--company-value is required (or provide --assumptions)")?,
        volatility: required(args.market.volatility, "--volatility")?,
        risk_free_rate: required(args.market.risk_free_rate, "--risk-free-rate")?,
        time_to_liquidity: required(args.market.time_to_liquidity, "--time-to-liquidity")?,
        dividend_yield: args.market.dividend_yield,
    };
    let breakpoints = equity_alloc_core::breakpoints::solve_breakpoints(&cap_table)?
        .result
        .sorted_breakpoints;
    let output = equity_alloc_core::opm::run_opm_backsolve(&params, &breakpoints)?;
    Ok(serde_json::to_value(output)?)
}

/// Arguments for backsolving the company value from a known price
#[derive(Args)]
pub struct BacksolveArgs {
    /// Path to cap table JSON (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,

    /// Valuation assumptions file with a `backsolve` section
    #[arg(long)]
    pub assumptions: Option<String>,

    /// Security whose price is observed (e.g. "Series B")
    #[arg(long)]
    pub target_security: Option<String>,

    /// Observed price per share of the target security
    #[arg(long)]
    pub target_price: Option<Decimal>,

    /// Convergence tolerance on the price per share
    #[arg(long)]
    pub tolerance: Option<Decimal>,

    #[command(flatten)]
    pub market: MarketArgs,
}

pub fn run_backsolve(args: BacksolveArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let cap_table = input::stdin::read_cap_table(args.input.as_deref())?;

    if let Some(ref path) = args.assumptions {
        let engine = load_engine(path)?;
        return Ok(serde_json::to_value(engine.backsolve(&cap_table)?)?);
    }

    let backsolve_input = BacksolveInput {
        target_security: args
            .target_security
            .ok_or("--target-security is required (or provide --assumptions)")?,
        target_price_per_share: required(args.target_price, "--target-price")?,
        volatility: required(args.market.volatility, "--volatility")?,
        risk_free_rate: required(args.market.risk_free_rate, "--risk-free-rate")?,
        time_to_liquidity: required(args.market.time_to_liquidity, "--time-to-liquidity")?,
        dividend_yield: args.market.dividend_yield,
        tolerance: args.tolerance,
    };
    let breakpoints = equity_alloc_core::breakpoints::solve_breakpoints(&cap_table)?
        .result
        .sorted_breakpoints;
    let output =
        equity_alloc_core::opm::backsolve_company_value(&backsolve_input, &breakpoints)?;
    Ok(serde_json::to_value(output)?)
}

pub(crate) fn load_engine(path: &str) -> Result<ValuationEngine, Box<dyn std::error::Error>> {
    let assumptions: ValuationAssumptions = input::file::read_structured(path)?;
    Ok(ValuationEngine::new(assumptions)?)
}

fn required(value: Option<Decimal>, flag: &str) -> Result<Decimal, Box<dyn std::error::Error>> {
    value.ok_or_else(|| format!("{flag} is required (or provide --assumptions)").into())
}
