use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::types::*;
use crate::AllocationResult;

#[cfg(feature = "opm")]
use crate::opm::{BacksolveInput, OpmParams};
#[cfg(feature = "dlom")]
use crate::pricing::dlom::{DlomInput, DlomModel};

/// Valuation assumptions grouped by section, validated at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValuationAssumptions {
    pub company: CompanyAssumptions,
    pub opm: OpmAssumptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlom: Option<DlomAssumptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backsolve: Option<BacksolveAssumptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyAssumptions {
    pub name: String,
    pub valuation_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpmAssumptions {
    pub company_value: Money,
    pub volatility: Rate,
    pub risk_free_rate: Rate,
    /// Years to the expected liquidity event.
    pub time_to_liquidity: Years,
    #[serde(default)]
    pub dividend_yield: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DlomAssumptions {
    /// One of chaffee, finnerty, ghaidarov, longstaff. All four when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "unit_price")]
    pub stock_price: Money,
    /// Defaults to the stock price (at the money).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike_price: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacksolveAssumptions {
    pub target_security: String,
    pub target_price_per_share: Money,
}

fn unit_price() -> Money {
    Decimal::ONE
}

impl ValuationAssumptions {
    /// Parse and validate JSON assumptions.
    pub fn from_json_str(json: &str) -> AllocationResult<Self> {
        let assumptions: ValuationAssumptions = serde_json::from_str(json)?;
        assumptions.validate()?;
        Ok(assumptions)
    }

    pub fn validate(&self) -> AllocationResult<()> {
        if self.company.name.trim().is_empty() {
            return Err(AllocationError::invalid("company.name", "must not be empty"));
        }
        self.opm.validate()?;
        if let Some(dlom) = &self.dlom {
            dlom.validate()?;
        }
        if let Some(b) = &self.backsolve {
            if b.target_security.trim().is_empty() {
                return Err(AllocationError::invalid(
                    "backsolve.target_security",
                    "must not be empty",
                ));
            }
            if b.target_price_per_share <= Decimal::ZERO {
                return Err(AllocationError::invalid(
                    "backsolve.target_price_per_share",
                    "must be positive",
                ));
            }
        }
        Ok(())
    }

    #[cfg(feature = "opm")]
    pub fn opm_params(&self) -> OpmParams {
        OpmParams {
            company_value: self.opm.company_value,
            volatility: self.opm.volatility,
            risk_free_rate: self.opm.risk_free_rate,
            time_to_liquidity: self.opm.time_to_liquidity,
            dividend_yield: self.opm.dividend_yield,
        }
    }

    /// Backsolve request built from the `backsolve` and `opm` sections.
    #[cfg(feature = "opm")]
    pub fn backsolve_input(&self) -> AllocationResult<BacksolveInput> {
        let b = self
            .backsolve
            .as_ref()
            .ok_or_else(|| AllocationError::invalid("backsolve", "section is missing"))?;
        Ok(BacksolveInput {
            target_security: b.target_security.clone(),
            target_price_per_share: b.target_price_per_share,
            volatility: self.opm.volatility,
            risk_free_rate: self.opm.risk_free_rate,
            time_to_liquidity: self.opm.time_to_liquidity,
            dividend_yield: self.opm.dividend_yield,
            tolerance: None,
        })
    }

    /// DLOM request over the OPM horizon. Uses at-the-money defaults when
    /// the `dlom` section is absent.
    #[cfg(feature = "dlom")]
    pub fn dlom_input(&self) -> AllocationResult<DlomInput> {
        let section = self.dlom.clone().unwrap_or(DlomAssumptions {
            model: None,
            stock_price: Decimal::ONE,
            strike_price: None,
        });
        let model = section.model.as_deref().map(parse_model).transpose()?;
        Ok(DlomInput {
            stock_price: section.stock_price,
            strike_price: section.strike_price.unwrap_or(section.stock_price),
            volatility: self.opm.volatility,
            risk_free_rate: self.opm.risk_free_rate,
            time_to_expiration: self.opm.time_to_liquidity,
            dividend_yield: self.opm.dividend_yield,
            model,
        })
    }
}

#[cfg(feature = "dlom")]
fn parse_model(name: &str) -> AllocationResult<DlomModel> {
    DlomModel::ALL
        .iter()
        .copied()
        .find(|m| m.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            AllocationError::invalid("dlom.model", format!("unknown DLOM model '{name}'"))
        })
}

impl OpmAssumptions {
    fn validate(&self) -> AllocationResult<()> {
        if self.company_value <= Decimal::ZERO {
            return Err(AllocationError::invalid(
                "opm.company_value",
                "must be positive",
            ));
        }
        if self.volatility <= Decimal::ZERO {
            return Err(AllocationError::invalid("opm.volatility", "must be positive"));
        }
        if self.time_to_liquidity <= Decimal::ZERO {
            return Err(AllocationError::invalid(
                "opm.time_to_liquidity",
                "must be positive",
            ));
        }
        if self.dividend_yield < Decimal::ZERO {
            return Err(AllocationError::invalid(
                "opm.dividend_yield",
                "must be non-negative",
            ));
        }
        Ok(())
    }
}

impl DlomAssumptions {
    fn validate(&self) -> AllocationResult<()> {
        if self.stock_price <= Decimal::ZERO {
            return Err(AllocationError::invalid("dlom.stock_price", "must be positive"));
        }
        if matches!(self.strike_price, Some(k) if k <= Decimal::ZERO) {
            return Err(AllocationError::invalid(
                "dlom.strike_price",
                "must be positive",
            ));
        }
        #[cfg(feature = "dlom")]
        {
            if let Some(name) = &self.model {
                parse_model(name)?;
            }
        }
        Ok(())
    }
}
