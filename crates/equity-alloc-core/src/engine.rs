use crate::allocation::rvps::{compute_rvps_at_value, RvpsAtValueResult};
use crate::breakpoints::{BreakpointAnalysisResult, BreakpointCache};
use crate::cap_table::CapTable;
use crate::config::ValuationAssumptions;
use crate::types::*;
use crate::AllocationResult;

#[cfg(feature = "opm")]
use crate::opm::{
    backsolve_company_value, run_opm_backsolve, BacksolveResult, OpmAnalysisResult,
};
#[cfg(feature = "dlom")]
use crate::pricing::dlom::{calculate_dlom, DlomOutput};

/// Session-scoped valuation service.
///
/// Holds one validated set of assumptions and a breakpoint cache; build one
/// per valuation and pass it by reference. The free functions it wraps stay
/// usable without it.
#[derive(Debug)]
pub struct ValuationEngine {
    assumptions: ValuationAssumptions,
    cache: BreakpointCache,
}

impl ValuationEngine {
    pub fn new(assumptions: ValuationAssumptions) -> AllocationResult<Self> {
        assumptions.validate()?;
        log::info!(
            "valuation engine for {} as of {}",
            assumptions.company.name,
            assumptions.company.valuation_date
        );
        Ok(Self {
            assumptions,
            cache: BreakpointCache::default(),
        })
    }

    pub fn assumptions(&self) -> &ValuationAssumptions {
        &self.assumptions
    }

    pub fn cache(&self) -> &BreakpointCache {
        &self.cache
    }

    /// Drop memoized waterfalls, e.g. after the cap table was edited.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn breakpoints(
        &self,
        cap_table: &CapTable,
    ) -> AllocationResult<ComputationOutput<BreakpointAnalysisResult>> {
        self.cache.get_or_solve(cap_table)
    }

    pub fn rvps_at(
        &self,
        cap_table: &CapTable,
        exit_value: Money,
    ) -> AllocationResult<ComputationOutput<RvpsAtValueResult>> {
        let solved = self.breakpoints(cap_table)?;
        compute_rvps_at_value(&solved.result.sorted_breakpoints, exit_value)
    }

    /// OPM allocation at the configured company value.
    #[cfg(feature = "opm")]
    pub fn opm(
        &self,
        cap_table: &CapTable,
    ) -> AllocationResult<ComputationOutput<OpmAnalysisResult>> {
        let solved = self.breakpoints(cap_table)?;
        run_opm_backsolve(
            &self.assumptions.opm_params(),
            &solved.result.sorted_breakpoints,
        )
    }

    /// Company value implied by the configured `backsolve` section.
    #[cfg(feature = "opm")]
    pub fn backsolve(
        &self,
        cap_table: &CapTable,
    ) -> AllocationResult<ComputationOutput<BacksolveResult>> {
        let input = self.assumptions.backsolve_input()?;
        let solved = self.breakpoints(cap_table)?;
        backsolve_company_value(&input, &solved.result.sorted_breakpoints)
    }

    #[cfg(feature = "dlom")]
    pub fn dlom(&self) -> AllocationResult<ComputationOutput<DlomOutput>> {
        calculate_dlom(&self.assumptions.dlom_input()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap_table::{PreferenceType, ShareClass, ShareType};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn assumptions() -> ValuationAssumptions {
        use crate::config::*;
        ValuationAssumptions {
            company: CompanyAssumptions {
                name: "Acme".into(),
                valuation_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            },
            opm: OpmAssumptions {
                company_value: dec!(3000000),
                volatility: dec!(0.5),
                risk_free_rate: dec!(0.04),
                time_to_liquidity: dec!(2),
                dividend_yield: dec!(0),
            },
            dlom: None,
            backsolve: Some(BacksolveAssumptions {
                target_security: "Series A".into(),
                target_price_per_share: dec!(1.5),
            }),
        }
    }

    fn class(name: &str, share_type: ShareType, shares: u64, price: Decimal) -> ShareClass {
        ShareClass {
            id: name.to_lowercase(),
            name: name.into(),
            share_type,
            shares_outstanding: shares,
            price_per_share: price,
            preference_type: PreferenceType::NonParticipating,
            lp_multiple: dec!(1),
            participation_cap: None,
            seniority: 0,
            conversion_ratio: dec!(1),
            dividends_declared: false,
            dividends_rate: None,
            dividends_type: None,
            pik: false,
            dividend_accrual_years: None,
        }
    }

    fn table() -> CapTable {
        CapTable {
            share_classes: vec![
                class("Common", ShareType::Common, 1_000_000, dec!(0)),
                class("Series A", ShareType::Preferred, 500_000, dec!(1)),
            ],
            options: vec![],
        }
    }

    #[test]
    fn test_engine_reuses_solved_waterfall() {
        let engine = ValuationEngine::new(assumptions()).unwrap();
        engine.breakpoints(&table()).unwrap();
        let rvps = engine.rvps_at(&table(), dec!(2000000)).unwrap();
        assert_eq!(rvps.result.total_distributed, dec!(2000000));
        assert_eq!(engine.cache().hits(), 1);
        engine.invalidate();
        assert!(engine.cache().is_empty());
    }

    #[cfg(feature = "opm")]
    #[test]
    fn test_engine_opm_reconciles() {
        let engine = ValuationEngine::new(assumptions()).unwrap();
        let out = engine.opm(&table()).unwrap();
        let total: Decimal = out
            .result
            .security_summary
            .iter()
            .map(|s| s.total_value)
            .sum();
        assert!((total - dec!(3000000)).abs() < dec!(0.001));
    }

    #[cfg(feature = "dlom")]
    #[test]
    fn test_engine_dlom_defaults_to_all_models() {
        let engine = ValuationEngine::new(assumptions()).unwrap();
        let out = engine.dlom().unwrap();
        assert_eq!(out.result.results.len(), 4);
    }

    #[test]
    fn test_invalid_assumptions_rejected() {
        let mut a = assumptions();
        a.opm.time_to_liquidity = dec!(0);
        assert!(ValuationEngine::new(a).is_err());
    }
}
