use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::{round_money, LineItem, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Percentage => "percentage",
            DiscountKind::Fixed => "fixed",
        }
    }
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "percentage" => Ok(DiscountKind::Percentage),
            "fixed" => Ok(DiscountKind::Fixed),
            _ => Err(ParseEnumError::new("discount type", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiscountError {
    #[error("discount value must be greater than zero")]
    NonPositiveValue,
    #[error("a percentage discount cannot exceed 100")]
    PercentageTooLarge,
    #[error("discount must end after it starts")]
    InvalidWindow,
    #[error("minimum order amount cannot be negative")]
    NegativeMinimum,
    #[error("max uses must be greater than zero")]
    InvalidMaxUses,
    #[error("discount code cannot be empty")]
    EmptyCode,
    #[error("discount is not active")]
    Inactive,
    #[error("discount is not valid yet")]
    NotStarted,
    #[error("discount has expired")]
    Expired,
    #[error("discount usage limit reached")]
    UsageExhausted,
    #[error("order must be at least {minimum} to use this discount")]
    BelowMinimum { minimum: BigDecimal },
}

/// Trims and upper-cases a customer-entered promotional code.
pub fn normalize_code(code: &str) -> Result<String, DiscountError> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(DiscountError::EmptyCode);
    }
    Ok(code)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscountRule {
    pub kind: DiscountKind,
    pub value: BigDecimal,
    pub min_order_amount: Option<BigDecimal>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl DiscountRule {
    pub fn validate_definition(&self) -> Result<(), DiscountError> {
        if self.value <= BigDecimal::zero() {
            return Err(DiscountError::NonPositiveValue);
        }
        if self.kind == DiscountKind::Percentage && self.value > BigDecimal::from(100) {
            return Err(DiscountError::PercentageTooLarge);
        }
        if matches!(self.ends_at, Some(ends_at) if ends_at <= self.starts_at) {
            return Err(DiscountError::InvalidWindow);
        }
        if matches!(&self.min_order_amount, Some(min) if *min < BigDecimal::zero()) {
            return Err(DiscountError::NegativeMinimum);
        }
        if matches!(self.max_uses, Some(max) if max <= 0) {
            return Err(DiscountError::InvalidMaxUses);
        }
        Ok(())
    }

    pub fn check_redeemable(&self, now: DateTime<Utc>, subtotal: &BigDecimal) -> Result<(), DiscountError> {
        if !self.is_active {
            return Err(DiscountError::Inactive);
        }
        if now < self.starts_at {
            return Err(DiscountError::NotStarted);
        }
        if matches!(self.ends_at, Some(ends_at) if now >= ends_at) {
            return Err(DiscountError::Expired);
        }
        if matches!(self.max_uses, Some(max) if self.used_count >= max) {
            return Err(DiscountError::UsageExhausted);
        }
        if let Some(minimum) = &self.min_order_amount {
            if subtotal < minimum {
                return Err(DiscountError::BelowMinimum {
                    minimum: minimum.clone(),
                });
            }
        }
        Ok(())
    }

    /// Amount taken off `eligible`, the subtotal of the items the scope covers.
    pub fn amount_for(&self, eligible: &BigDecimal) -> BigDecimal {
        if *eligible <= BigDecimal::zero() {
            return BigDecimal::zero();
        }
        let amount = match self.kind {
            DiscountKind::Percentage => eligible * &self.value / BigDecimal::from(100),
            DiscountKind::Fixed if self.value > *eligible => eligible.clone(),
            DiscountKind::Fixed => self.value.clone(),
        };
        round_money(&amount)
    }
}

/// What a discount applies to, loaded from its join tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscountScope {
    pub applies_to_all: bool,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub brand_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

impl DiscountScope {
    pub fn covers(&self, item: &LineItem) -> bool {
        self.applies_to_all
            || self.product_ids.contains(&item.product_id)
            || item.brand_id.is_some_and(|id| self.brand_ids.contains(&id))
            || item.category_id.is_some_and(|id| self.category_ids.contains(&id))
    }

    pub fn dedup(&mut self) {
        for ids in [&mut self.product_ids, &mut self.brand_ids, &mut self.category_ids] {
            ids.sort();
            ids.dedup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn rule(kind: DiscountKind, value: &str) -> DiscountRule {
        DiscountRule {
            kind,
            value: dec(value),
            min_order_amount: None,
            max_uses: None,
            used_count: 0,
            starts_at: Utc::now() - Duration::hours(1),
            ends_at: None,
            is_active: true,
        }
    }

    #[test]
    fn rejects_invalid_definitions() {
        assert_eq!(
            rule(DiscountKind::Fixed, "0").validate_definition(),
            Err(DiscountError::NonPositiveValue)
        );
        assert_eq!(
            rule(DiscountKind::Percentage, "120").validate_definition(),
            Err(DiscountError::PercentageTooLarge)
        );
        assert!(rule(DiscountKind::Fixed, "120").validate_definition().is_ok());

        let mut bad_window = rule(DiscountKind::Fixed, "5");
        bad_window.ends_at = Some(bad_window.starts_at);
        assert_eq!(bad_window.validate_definition(), Err(DiscountError::InvalidWindow));

        let mut bad_uses = rule(DiscountKind::Fixed, "5");
        bad_uses.max_uses = Some(0);
        assert_eq!(bad_uses.validate_definition(), Err(DiscountError::InvalidMaxUses));
    }

    #[test]
    fn redeemability_checks_each_condition() {
        let now = Utc::now();
        let subtotal = dec("80.00");

        let mut inactive = rule(DiscountKind::Fixed, "5");
        inactive.is_active = false;
        assert_eq!(inactive.check_redeemable(now, &subtotal), Err(DiscountError::Inactive));

        let mut future = rule(DiscountKind::Fixed, "5");
        future.starts_at = now + Duration::days(2);
        assert_eq!(future.check_redeemable(now, &subtotal), Err(DiscountError::NotStarted));

        let mut expired = rule(DiscountKind::Fixed, "5");
        expired.ends_at = Some(now - Duration::minutes(1));
        assert_eq!(expired.check_redeemable(now, &subtotal), Err(DiscountError::Expired));

        let mut used_up = rule(DiscountKind::Fixed, "5");
        used_up.max_uses = Some(3);
        used_up.used_count = 3;
        assert_eq!(used_up.check_redeemable(now, &subtotal), Err(DiscountError::UsageExhausted));

        let mut minimum = rule(DiscountKind::Fixed, "5");
        minimum.min_order_amount = Some(dec("100.00"));
        assert!(matches!(
            minimum.check_redeemable(now, &subtotal),
            Err(DiscountError::BelowMinimum { .. })
        ));

        assert!(rule(DiscountKind::Fixed, "5").check_redeemable(now, &subtotal).is_ok());
    }

    #[test]
    fn percentage_amount_is_rounded_to_cents() {
        let rule = rule(DiscountKind::Percentage, "15");
        assert_eq!(rule.amount_for(&dec("33.30")), dec("5.00"));
        assert_eq!(rule.amount_for(&dec("0")), dec("0"));
    }

    #[test]
    fn scope_matches_product_brand_or_category() {
        let product_id = Uuid::new_v4();
        let brand_id = Uuid::new_v4();
        let category_id = Uuid::new_v4();
        let item = LineItem {
            product_id,
            brand_id: Some(brand_id),
            category_id: Some(category_id),
            quantity: 1,
            unit_price: dec("10.00"),
        };

        assert!(!DiscountScope::default().covers(&item));
        assert!(DiscountScope { applies_to_all: true, ..Default::default() }.covers(&item));
        assert!(DiscountScope { product_ids: vec![product_id], ..Default::default() }.covers(&item));
        assert!(DiscountScope { brand_ids: vec![brand_id], ..Default::default() }.covers(&item));
        assert!(DiscountScope { category_ids: vec![category_id], ..Default::default() }.covers(&item));
        assert!(!DiscountScope { brand_ids: vec![Uuid::new_v4()], ..Default::default() }.covers(&item));
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(normalize_code("  summer10 ").unwrap(), "SUMMER10");
        assert_eq!(normalize_code("   "), Err(DiscountError::EmptyCode));
        assert_eq!("FIXED".parse::<DiscountKind>().unwrap(), DiscountKind::Fixed);
    }
}
