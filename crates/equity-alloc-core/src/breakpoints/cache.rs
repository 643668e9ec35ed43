use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use super::solver::{solve_breakpoints, BreakpointAnalysisResult};
use crate::cap_table::CapTable;
use crate::types::ComputationOutput;
use crate::AllocationResult;

/// Memoizes solved waterfalls keyed on the canonical JSON of the cap table.
///
/// Safe to share between threads. A solve is deterministic, so a hit returns
/// exactly what a fresh solve would, apart from timing and `cache_hits`.
#[derive(Debug)]
pub struct BreakpointCache {
    entries: RwLock<HashMap<String, ComputationOutput<BreakpointAnalysisResult>>>,
    hits: AtomicU64,
    capacity: usize,
}

impl Default for BreakpointCache {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BreakpointCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    fn key(cap_table: &CapTable) -> AllocationResult<String> {
        Ok(serde_json::to_string(cap_table)?)
    }

    /// Solve through the cache.
    pub fn get_or_solve(
        &self,
        cap_table: &CapTable,
    ) -> AllocationResult<ComputationOutput<BreakpointAnalysisResult>> {
        let key = Self::key(cap_table)?;

        let cached = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned();
        if let Some(mut output) = cached {
            let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
            output.result.performance_metrics.cache_hits = hits;
            log::debug!("breakpoint cache hit ({hits} total)");
            return Ok(output);
        }

        let mut output = solve_breakpoints(cap_table)?;
        output.result.performance_metrics.cache_hits = self.hits();
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() >= self.capacity {
            entries.clear();
        }
        entries.insert(key, output.clone());
        Ok(output)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap_table::{PreferenceType, ShareClass, ShareType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn table(shares: u64) -> CapTable {
        CapTable {
            share_classes: vec![ShareClass {
                id: "c".into(),
                name: "Common".into(),
                share_type: ShareType::Common,
                shares_outstanding: shares,
                price_per_share: Decimal::ZERO,
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
            }],
            options: vec![],
        }
    }

    #[test]
    fn test_hit_on_identical_snapshot() {
        let cache = BreakpointCache::default();
        let first = cache.get_or_solve(&table(100)).unwrap();
        assert_eq!(first.result.performance_metrics.cache_hits, 0);
        let second = cache.get_or_solve(&table(100)).unwrap();
        assert_eq!(second.result.performance_metrics.cache_hits, 1);
        assert_eq!(
            first.result.sorted_breakpoints,
            second.result.sorted_breakpoints
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss_on_changed_snapshot() {
        let cache = BreakpointCache::default();
        cache.get_or_solve(&table(100)).unwrap();
        cache.get_or_solve(&table(200)).unwrap();
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache = BreakpointCache::new(2);
        for n in 1..=5 {
            cache.get_or_solve(&table(n)).unwrap();
        }
        assert!(cache.len() <= 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_errors_not_cached() {
        let cache = BreakpointCache::default();
        assert!(cache.get_or_solve(&CapTable::default()).is_err());
        assert!(cache.is_empty());
    }
}
