use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use equity_alloc_core::pricing::dlom::{calculate_dlom, DlomInput, DlomModel};

use crate::commands::opm::load_engine;
use crate::input;

/// Arguments for the discount for lack of marketability
#[derive(Args)]
pub struct DlomArgs {
    /// Path to a DLOM input JSON file
    #[arg(long)]
    pub input: Option<String>,

    /// Valuation assumptions file (YAML or JSON); uses the OPM horizon
    #[arg(long)]
    pub assumptions: Option<String>,

    /// Annualised volatility
    #[arg(long)]
    pub volatility: Option<Decimal>,

    /// Restriction period in years
    #[arg(long)]
    pub time: Option<Decimal>,

    /// Risk-free rate
    #[arg(long, default_value = "0")]
    pub risk_free_rate: Decimal,

    /// Continuous dividend yield
    #[arg(long, default_value = "0")]
    pub dividend_yield: Decimal,

    /// Run one model only
    #[arg(long, value_enum)]
    pub model: Option<ModelArg>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ModelArg {
    Chaffee,
    Finnerty,
    Ghaidarov,
    Longstaff,
}

impl From<ModelArg> for DlomModel {
    fn from(m: ModelArg) -> Self {
        match m {
            ModelArg::Chaffee => DlomModel::Chaffee,
            ModelArg::Finnerty => DlomModel::Finnerty,
            ModelArg::Ghaidarov => DlomModel::Ghaidarov,
            ModelArg::Longstaff => DlomModel::Longstaff,
        }
    }
}

pub fn run_dlom(args: DlomArgs) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(ref path) = args.assumptions {
        let engine = load_engine(path)?;
        return Ok(serde_json::to_value(engine.dlom()?)?);
    }

    let dlom_input: DlomInput = if let Some(ref path) = args.input {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        DlomInput {
            stock_price: Decimal::ONE,
            strike_price: Decimal::ONE,
            volatility: args
                .volatility
                .ok_or("--volatility is required (or provide --input)")?,
            risk_free_rate: args.risk_free_rate,
            time_to_expiration: args.time.ok_or("--time is required (or provide --input)")?,
            dividend_yield: args.dividend_yield,
            model: args.model.map(DlomModel::from),
        }
    };

    let result = calculate_dlom(&dlom_input)?;
    Ok(serde_json::to_value(result)?)
}
