use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::AllocationError;
use crate::pricing::math::pow_decimal;
use crate::types::*;
use crate::AllocationResult;

// ─── Limits ──────────────────────────────────────────────────────────────────

/// Largest share or option count accepted for one class or tranche.
pub const MAX_SHARES: u64 = 1_000_000_000_000_000;
/// Largest issue price or strike accepted.
pub const MAX_PRICE_PER_SHARE: Money = dec!(1_000_000_000);
/// Bound on LP multiples, participation caps and conversion ratios.
pub const MAX_MULTIPLE: Decimal = dec!(1000);
pub const MIN_CONVERSION_RATIO: Decimal = dec!(0.000001);
pub const MAX_ACCRUAL_YEARS: Years = dec!(100);

// ─── Enums ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    Common,
    Preferred,
}

/// Liquidation preference terms for a preferred class.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PreferenceType {
    /// Preference OR as-converted common, whichever is higher.
    #[default]
    NonParticipating,
    /// Preference AND pro-rata participation alongside common.
    Participating,
    /// Like Participating, but total proceeds capped at a multiple of investment.
    ParticipatingWithCap,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DividendsType {
    Cumulative,
    NonCumulative,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrancheType {
    Options,
    Warrants,
    #[serde(rename = "RSUs")]
    Rsus,
}

impl TrancheType {
    pub fn label(&self) -> &'static str {
        match self {
            TrancheType::Options => "Options",
            TrancheType::Warrants => "Warrants",
            TrancheType::Rsus => "RSUs",
        }
    }
}

// ─── Structs ─────────────────────────────────────────────────────────────────

fn one() -> Decimal {
    Decimal::ONE
}

/// One financing round / share class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareClass {
    pub id: String,
    pub name: String,
    pub share_type: ShareType,
    pub shares_outstanding: u64,
    #[serde(default)]
    pub price_per_share: Money,
    /// Ignored for common.
    #[serde(default)]
    pub preference_type: PreferenceType,
    /// Liquidation preference = lp_multiple x amount invested.
    #[serde(default = "one")]
    pub lp_multiple: Decimal,
    /// Total-proceeds cap as a multiple of amount invested
    /// (`participating-with-cap` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participation_cap: Option<Decimal>,
    /// Lower is more senior; equal values rank pari passu.
    #[serde(default)]
    pub seniority: u32,
    #[serde(default = "one")]
    pub conversion_ratio: Decimal,
    #[serde(default)]
    pub dividends_declared: bool,
    /// Annual dividend rate in percent, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividends_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividends_type: Option<DividendsType>,
    #[serde(default)]
    pub pik: bool,
    /// Years of cumulative dividend accrual to add to the preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividend_accrual_years: Option<Years>,
}

/// One option / warrant / RSU grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionTranche {
    pub id: String,
    #[serde(rename = "type")]
    pub tranche_type: TrancheType,
    pub num_options: u64,
    #[serde(default)]
    pub exercise_price: Money,
    /// Display name; defaults to "<type> <id>".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Immutable snapshot consumed by the solver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapTable {
    pub share_classes: Vec<ShareClass>,
    #[serde(default)]
    pub options: Vec<OptionTranche>,
}

// ─── Derived amounts ─────────────────────────────────────────────────────────

impl ShareClass {
    pub fn is_preferred(&self) -> bool {
        self.share_type == ShareType::Preferred
    }

    /// shares x price; `None` for common.
    pub fn amount_invested(&self) -> AllocationResult<Option<Money>> {
        if !self.is_preferred() {
            return Ok(None);
        }
        Decimal::from(self.shares_outstanding)
            .checked_mul(self.price_per_share)
            .map(Some)
            .ok_or_else(|| self.too_large("amount_invested"))
    }

    pub fn as_converted_shares(&self) -> AllocationResult<Decimal> {
        Decimal::from(self.shares_outstanding)
            .checked_mul(self.conversion_ratio)
            .ok_or_else(|| self.too_large("conversion_ratio"))
    }

    /// Accrued cumulative dividends. Zero unless declared, cumulative, with a
    /// positive rate and accrual period. PIK compounds annually.
    pub fn accrued_dividends(&self) -> AllocationResult<Money> {
        let invested = match self.amount_invested()? {
            Some(v) => v,
            None => return Ok(Decimal::ZERO),
        };
        if !self.dividends_declared || self.dividends_type != Some(DividendsType::Cumulative) {
            return Ok(Decimal::ZERO);
        }
        let rate = self.dividends_rate.unwrap_or_default() / dec!(100);
        let years = self.dividend_accrual_years.unwrap_or_default();
        if rate <= Decimal::ZERO || years <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let factor = if self.pik {
            pow_decimal(Decimal::ONE + rate, years, "dividend_accrual")? - Decimal::ONE
        } else {
            rate * years
        };
        invested
            .checked_mul(factor)
            .ok_or_else(|| self.too_large("dividend_accrual_years"))
    }

    /// lp_multiple x invested + accrued dividends; zero for common.
    pub fn liquidation_preference(&self) -> AllocationResult<Money> {
        let invested = match self.amount_invested()? {
            Some(v) => v,
            None => return Ok(Decimal::ZERO),
        };
        let accrued = self.accrued_dividends()?;
        self.lp_multiple
            .checked_mul(invested)
            .and_then(|base| base.checked_add(accrued))
            .ok_or_else(|| self.too_large("lp_multiple"))
    }

    /// Total-proceeds cap in currency, if the class is capped.
    pub fn participation_cap_amount(&self) -> AllocationResult<Option<Money>> {
        match (self.preference_type, self.participation_cap, self.amount_invested()?) {
            (PreferenceType::ParticipatingWithCap, Some(cap), Some(invested)) => cap
                .checked_mul(invested)
                .map(Some)
                .ok_or_else(|| self.too_large("participation_cap")),
            _ => Ok(None),
        }
    }

    fn too_large(&self, field: &str) -> AllocationError {
        AllocationError::invalid(
            format!("share_classes[{}].{field}", self.name),
            "derived amount exceeds the representable range",
        )
    }
}

impl OptionTranche {
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) if !n.trim().is_empty() => n.clone(),
            _ => format!("{} {}", self.tranche_type.label(), self.id),
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

impl CapTable {
    pub fn common(&self) -> Option<&ShareClass> {
        self.share_classes
            .iter()
            .find(|c| c.share_type == ShareType::Common)
    }

    pub fn preferred(&self) -> impl Iterator<Item = &ShareClass> {
        self.share_classes.iter().filter(|c| c.is_preferred())
    }

    /// Reject malformed snapshots before any computation.
    pub fn validate(&self) -> AllocationResult<()> {
        if self.share_classes.is_empty() {
            return Err(AllocationError::invalid(
                "share_classes",
                "cap table must contain at least one share class",
            ));
        }

        let commons = self
            .share_classes
            .iter()
            .filter(|c| c.share_type == ShareType::Common)
            .count();
        if commons > 1 {
            return Err(AllocationError::invalid(
                "share_classes",
                format!("at most one common class is allowed, found {commons}"),
            ));
        }

        let mut names = HashSet::new();
        for class in &self.share_classes {
            let field = |f: &str| format!("share_classes[{}].{f}", class.name);
            if class.name.trim().is_empty() {
                return Err(AllocationError::invalid(
                    "share_classes.name",
                    format!("class '{}' has an empty name", class.id),
                ));
            }
            if !names.insert(class.name.clone()) {
                return Err(AllocationError::invalid(
                    field("name"),
                    "security names must be unique",
                ));
            }
            if class.price_per_share < Decimal::ZERO {
                return Err(AllocationError::invalid(
                    field("price_per_share"),
                    "cannot be negative",
                ));
            }
            if class.shares_outstanding > MAX_SHARES {
                return Err(AllocationError::invalid(
                    field("shares_outstanding"),
                    format!("cannot exceed {MAX_SHARES}"),
                ));
            }
            if class.price_per_share > MAX_PRICE_PER_SHARE {
                return Err(AllocationError::invalid(
                    field("price_per_share"),
                    format!("cannot exceed {MAX_PRICE_PER_SHARE}"),
                ));
            }
            if class.conversion_ratio <= Decimal::ZERO {
                return Err(AllocationError::invalid(
                    field("conversion_ratio"),
                    "must be positive",
                ));
            }
            if class.conversion_ratio < MIN_CONVERSION_RATIO
                || class.conversion_ratio > MAX_MULTIPLE
            {
                return Err(AllocationError::invalid(
                    field("conversion_ratio"),
                    format!("must be between {MIN_CONVERSION_RATIO} and {MAX_MULTIPLE}"),
                ));
            }
            if !class.is_preferred() {
                continue;
            }
            if class.lp_multiple <= Decimal::ZERO || class.lp_multiple > MAX_MULTIPLE {
                return Err(AllocationError::invalid(
                    field("lp_multiple"),
                    format!("must be positive and at most {MAX_MULTIPLE}"),
                ));
            }
            if let Some(cap) = class.participation_cap {
                if cap < Decimal::ZERO || cap > MAX_MULTIPLE {
                    return Err(AllocationError::invalid(
                        field("participation_cap"),
                        format!("must be between 0 and {MAX_MULTIPLE}"),
                    ));
                }
            }
            if class.preference_type == PreferenceType::ParticipatingWithCap
                && class.participation_cap.is_none()
            {
                return Err(AllocationError::invalid(
                    field("participation_cap"),
                    "required for participating-with-cap classes",
                ));
            }
            if let Some(rate) = class.dividends_rate {
                if rate < Decimal::ZERO || rate > dec!(100) {
                    return Err(AllocationError::invalid(
                        field("dividends_rate"),
                        "must be between 0 and 100",
                    ));
                }
            }
            if let Some(years) = class.dividend_accrual_years {
                if years < Decimal::ZERO || years > MAX_ACCRUAL_YEARS {
                    return Err(AllocationError::invalid(
                        field("dividend_accrual_years"),
                        format!("must be between 0 and {MAX_ACCRUAL_YEARS}"),
                    ));
                }
            }
        }

        for tranche in &self.options {
            let label = tranche.label();
            if tranche.exercise_price < Decimal::ZERO {
                return Err(AllocationError::invalid(
                    format!("options[{label}].exercise_price"),
                    "cannot be negative",
                ));
            }
            if tranche.exercise_price > MAX_PRICE_PER_SHARE {
                return Err(AllocationError::invalid(
                    format!("options[{label}].exercise_price"),
                    format!("cannot exceed {MAX_PRICE_PER_SHARE}"),
                ));
            }
            if tranche.num_options > MAX_SHARES {
                return Err(AllocationError::invalid(
                    format!("options[{label}].num_options"),
                    format!("cannot exceed {MAX_SHARES}"),
                ));
            }
            if !names.insert(label.clone()) {
                return Err(AllocationError::invalid(
                    format!("options[{label}]"),
                    "security names must be unique",
                ));
            }
        }

        self.fully_diluted_shares()?;
        let class_shares = self.share_classes.iter().try_fold(Decimal::ZERO, |acc, c| {
            c.as_converted_shares().map(|shares| acc + shares)
        })?;
        if class_shares.is_zero() {
            return Err(AllocationError::invalid(
                "share_classes",
                "cap table has no shares outstanding",
            ));
        }
        self.total_liquidation_preference()?;
        Ok(())
    }

    /// Fully diluted as-converted share count (classes plus all tranches).
    pub fn fully_diluted_shares(&self) -> AllocationResult<Decimal> {
        let mut total = Decimal::ZERO;
        for class in &self.share_classes {
            total = total
                .checked_add(class.as_converted_shares()?)
                .ok_or_else(aggregate_overflow)?;
        }
        for tranche in &self.options {
            total = total
                .checked_add(Decimal::from(tranche.num_options))
                .ok_or_else(aggregate_overflow)?;
        }
        Ok(total)
    }

    /// Sum of every class's liquidation preference.
    pub fn total_liquidation_preference(&self) -> AllocationResult<Money> {
        let mut total = Decimal::ZERO;
        for class in self.preferred() {
            total = total
                .checked_add(class.liquidation_preference()?)
                .ok_or_else(aggregate_overflow)?;
        }
        Ok(total)
    }
}

fn aggregate_overflow() -> AllocationError {
    AllocationError::invalid(
        "share_classes",
        "cap table totals exceed the representable range",
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn common(shares: u64) -> ShareClass {
        ShareClass {
            id: "c".into(),
            name: "Common".into(),
            share_type: ShareType::Common,
            shares_outstanding: shares,
            price_per_share: Decimal::ZERO,
            preference_type: PreferenceType::NonParticipating,
            lp_multiple: Decimal::ONE,
            participation_cap: None,
            seniority: 0,
            conversion_ratio: Decimal::ONE,
            dividends_declared: false,
            dividends_rate: None,
            dividends_type: None,
            pik: false,
            dividend_accrual_years: None,
        }
    }

    fn series_a() -> ShareClass {
        ShareClass {
            id: "a".into(),
            name: "Series A".into(),
            share_type: ShareType::Preferred,
            shares_outstanding: 500_000,
            price_per_share: dec!(2),
            ..common(0)
        }
    }

    #[test]
    fn test_amount_invested_and_preference() {
        let a = ShareClass {
            lp_multiple: dec!(1.5),
            ..series_a()
        };
        assert_eq!(a.amount_invested().unwrap(), Some(dec!(1000000)));
        assert_eq!(a.liquidation_preference().unwrap(), dec!(1500000));
        assert_eq!(common(10).amount_invested().unwrap(), None);
        assert_eq!(common(10).liquidation_preference().unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_simple_cumulative_dividends() {
        let a = ShareClass {
            dividends_declared: true,
            dividends_rate: Some(dec!(8)),
            dividends_type: Some(DividendsType::Cumulative),
            dividend_accrual_years: Some(dec!(2.5)),
            ..series_a()
        };
        // 1,000,000 x 8% x 2.5
        assert_eq!(a.accrued_dividends().unwrap(), dec!(200000));
        assert_eq!(a.liquidation_preference().unwrap(), dec!(1200000));
    }

    #[test]
    fn test_pik_dividends_compound() {
        let a = ShareClass {
            dividends_declared: true,
            dividends_rate: Some(dec!(8)),
            dividends_type: Some(DividendsType::Cumulative),
            dividend_accrual_years: Some(dec!(2)),
            pik: true,
            ..series_a()
        };
        // 1,000,000 x (1.08^2 - 1) = 166,400
        let accrued = a.accrued_dividends().unwrap();
        assert!((accrued - dec!(166400)).abs() < dec!(0.01), "accrued {accrued}");
    }

    #[test]
    fn test_non_cumulative_dividends_do_not_accrue() {
        let a = ShareClass {
            dividends_declared: true,
            dividends_rate: Some(dec!(8)),
            dividends_type: Some(DividendsType::NonCumulative),
            dividend_accrual_years: Some(dec!(3)),
            ..series_a()
        };
        assert_eq!(a.accrued_dividends().unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_validate_rejects_two_commons() {
        let table = CapTable {
            share_classes: vec![
                common(100),
                ShareClass {
                    name: "Common B".into(),
                    ..common(100)
                },
            ],
            options: vec![],
        };
        assert!(matches!(
            table.validate(),
            Err(AllocationError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_table() {
        match CapTable::default().validate().unwrap_err() {
            AllocationError::InvalidInput { field, .. } => assert_eq!(field, "share_classes"),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_negative_price() {
        let table = CapTable {
            share_classes: vec![
                common(100),
                ShareClass {
                    price_per_share: dec!(-1),
                    ..series_a()
                },
            ],
            options: vec![],
        };
        match table.validate().unwrap_err() {
            AllocationError::InvalidInput { field, .. } => {
                assert_eq!(field, "share_classes[Series A].price_per_share")
            }
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    fn invalid_field(table: &CapTable) -> String {
        match table.validate() {
            Err(AllocationError::InvalidInput { field, .. }) => field,
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_oversized_magnitudes() {
        // 10^19 shares at 1e11 would overflow amount_invested.
        let huge = CapTable {
            share_classes: vec![
                common(100),
                ShareClass {
                    shares_outstanding: 10_000_000_000_000_000_000,
                    price_per_share: dec!(100_000_000_000),
                    ..series_a()
                },
            ],
            options: vec![],
        };
        assert_eq!(invalid_field(&huge), "share_classes[Series A].shares_outstanding");

        let pricey = CapTable {
            share_classes: vec![
                common(100),
                ShareClass {
                    price_per_share: dec!(100_000_000_000),
                    ..series_a()
                },
            ],
            options: vec![],
        };
        assert_eq!(invalid_field(&pricey), "share_classes[Series A].price_per_share");

        let multiple = CapTable {
            share_classes: vec![
                common(100),
                ShareClass {
                    lp_multiple: dec!(1000000),
                    ..series_a()
                },
            ],
            options: vec![],
        };
        assert_eq!(invalid_field(&multiple), "share_classes[Series A].lp_multiple");
    }

    #[test]
    fn test_validate_rejects_preference_total_overflow() {
        // Each class sits at every per-field limit: 1e15 x 1e9 x 1000 = 1e27.
        let mut share_classes = vec![common(100)];
        share_classes.extend((0..100).map(|i| ShareClass {
            id: format!("p{i}"),
            name: format!("Series {i}"),
            shares_outstanding: MAX_SHARES,
            price_per_share: MAX_PRICE_PER_SHARE,
            lp_multiple: MAX_MULTIPLE,
            ..series_a()
        }));
        let table = CapTable {
            share_classes,
            options: vec![],
        };
        assert_eq!(
            table.share_classes[1].liquidation_preference().unwrap(),
            dec!(1_000_000_000_000_000_000_000_000_000)
        );
        assert_eq!(invalid_field(&table), "share_classes");
        assert!(table.total_liquidation_preference().is_err());
    }

    #[test]
    fn test_validate_requires_cap_for_capped_class() {
        let table = CapTable {
            share_classes: vec![
                common(100),
                ShareClass {
                    preference_type: PreferenceType::ParticipatingWithCap,
                    ..series_a()
                },
            ],
            options: vec![],
        };
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_tranche_label_and_duplicate_names() {
        let tranche = OptionTranche {
            id: "2019".into(),
            tranche_type: TrancheType::Warrants,
            num_options: 10,
            exercise_price: dec!(1),
            name: None,
        };
        assert_eq!(tranche.label(), "Warrants 2019");

        let table = CapTable {
            share_classes: vec![common(100)],
            options: vec![
                OptionTranche {
                    name: Some("Common".into()),
                    ..tranche
                },
            ],
        };
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_serde_field_names() {
        let json = r#"{
            "share_classes": [
                {"id": "1", "name": "Common", "share_type": "common", "shares_outstanding": 1000},
                {"id": "2", "name": "Seed", "share_type": "preferred", "shares_outstanding": 10,
                 "price_per_share": "1.25", "preference_type": "participating-with-cap",
                 "participation_cap": "3", "dividends_type": "non-cumulative"}
            ],
            "options": [{"id": "p1", "type": "RSUs", "num_options": 5}]
        }"#;
        let table: CapTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.share_classes[1].preference_type, PreferenceType::ParticipatingWithCap);
        assert_eq!(table.share_classes[1].lp_multiple, Decimal::ONE);
        assert_eq!(table.options[0].tranche_type, TrancheType::Rsus);
        assert_eq!(table.fully_diluted_shares().unwrap(), dec!(1015));
        table.validate().unwrap();
    }
}
