use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Rating constants for the premium calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Annual premium as a fraction of the sum assured.
    pub base_rate: Decimal,
    /// Ages strictly below this attract the young loading.
    pub young_age_threshold: u32,
    pub young_load_pct: Decimal,
    /// Ages strictly above this attract the senior loading.
    pub old_age_threshold: u32,
    pub old_load_pct: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_rate: dec!(0.0015),
            young_age_threshold: 25,
            young_load_pct: dec!(0.25),
            old_age_threshold: 60,
            old_load_pct: dec!(0.20),
        }
    }
}

/// How an annual premium was arrived at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumBreakdown {
    pub base_annual: Decimal,
    pub age: u32,
    pub loading_pct: Decimal,
    pub loading_amount: Decimal,
}

/// Priced premium for one coverage amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Premium {
    pub monthly: Decimal,
    pub annual: Decimal,
    pub breakdown: PremiumBreakdown,
}

impl Premium {
    pub fn age_loading_applied(&self) -> bool {
        !self.breakdown.loading_pct.is_zero()
    }
}

/// Whole years between `dob` and `as_of` (birthday not yet reached this year
/// counts the previous age).
pub fn age_years(dob: NaiveDate, as_of: NaiveDate) -> i32 {
    let mut age = as_of.year() - dob.year();
    if (as_of.month(), as_of.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Pure premium calculation. Deterministic, no I/O.
///
/// `base_annual = coverage * base_rate`, loaded by age band, monthly is the
/// annual divided by twelve; both quantized to two decimal places with
/// round-half-up.
pub fn price(config: &PricingConfig, coverage: Decimal, dob: NaiveDate, as_of: NaiveDate) -> Premium {
    let age = age_years(dob, as_of).max(0) as u32;
    let base_annual = quantize(coverage * config.base_rate);

    let loading_pct = if age < config.young_age_threshold {
        config.young_load_pct
    } else if age > config.old_age_threshold {
        config.old_load_pct
    } else {
        Decimal::ZERO
    };

    let annual = quantize(base_annual * (Decimal::ONE + loading_pct));
    let loading_amount = annual - base_annual;
    let monthly = quantize(annual / dec!(12));

    Premium {
        monthly,
        annual,
        breakdown: PremiumBreakdown {
            base_annual,
            age,
            loading_pct,
            loading_amount,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dob_for_age(age: i32, as_of: NaiveDate) -> NaiveDate {
        // Birthday exactly six months before as_of, so the age is unambiguous.
        let anchor = as_of - chrono::Days::new(182);
        NaiveDate::from_ymd_opt(anchor.year() - age, anchor.month(), 1).unwrap()
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    #[test]
    fn mid_band_age_has_no_loading() {
        let premium = price(
            &PricingConfig::default(),
            dec!(10_000_000),
            dob_for_age(35, as_of()),
            as_of(),
        );
        assert_eq!(premium.annual, dec!(15000.00));
        assert_eq!(premium.monthly, dec!(1250.00));
        assert!(!premium.age_loading_applied());
        assert_eq!(premium.breakdown.age, 35);
    }

    #[test]
    fn under_25_gets_25_pct_loading() {
        let premium = price(
            &PricingConfig::default(),
            dec!(10_000_000),
            dob_for_age(22, as_of()),
            as_of(),
        );
        assert_eq!(premium.annual, dec!(18750.00));
        assert_eq!(premium.monthly, dec!(1562.50));
        assert_eq!(premium.breakdown.loading_pct, dec!(0.25));
        assert_eq!(premium.breakdown.loading_amount, dec!(3750.00));
    }

    #[test]
    fn over_60_gets_20_pct_loading() {
        let premium = price(
            &PricingConfig::default(),
            dec!(10_000_000),
            dob_for_age(65, as_of()),
            as_of(),
        );
        assert_eq!(premium.annual, dec!(18000.00));
        assert_eq!(premium.monthly, dec!(1500.00));
        assert_eq!(premium.breakdown.loading_pct, dec!(0.20));
    }

    #[test]
    fn boundary_ages_are_unloaded() {
        let cfg = PricingConfig::default();
        for age in [25, 60] {
            let premium = price(&cfg, dec!(10_000_000), dob_for_age(age, as_of()), as_of());
            assert!(!premium.age_loading_applied(), "age {age} must not load");
        }
    }

    #[test]
    fn monthly_rounds_half_up() {
        // 1,234,567 * 0.0015 = 1851.85 annual; / 12 = 154.320833... -> 154.32
        let premium = price(
            &PricingConfig::default(),
            dec!(1_234_567),
            dob_for_age(40, as_of()),
            as_of(),
        );
        assert_eq!(premium.annual, dec!(1851.85));
        assert_eq!(premium.monthly, dec!(154.32));
    }

    #[test]
    fn age_counts_whole_years_only() {
        let dob = NaiveDate::from_ymd_opt(2000, 9, 15).unwrap();
        let day_before = NaiveDate::from_ymd_opt(2026, 9, 14).unwrap();
        let birthday = NaiveDate::from_ymd_opt(2026, 9, 15).unwrap();
        assert_eq!(age_years(dob, day_before), 25);
        assert_eq!(age_years(dob, birthday), 26);
    }
}
