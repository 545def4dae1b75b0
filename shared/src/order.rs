use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::{round_money, DiscountRule, DiscountScope, ParseEnumError};

/// Lifecycle of an order. A cart is an order that has not been placed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    InCart,
    Placed,
    Confirmed,
    Processed,
    Pickup,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::InCart,
        OrderStatus::Placed,
        OrderStatus::Confirmed,
        OrderStatus::Processed,
        OrderStatus::Pickup,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::InCart => "in_cart",
            OrderStatus::Placed => "placed",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processed => "processed",
            OrderStatus::Pickup => "pickup",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
        }
    }

    /// Statuses reachable in one step along the documented flow.
    pub fn successors(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::InCart => &[OrderStatus::Placed],
            OrderStatus::Placed => &[OrderStatus::Confirmed],
            OrderStatus::Confirmed => &[OrderStatus::Processed],
            OrderStatus::Processed => &[OrderStatus::Pickup, OrderStatus::Shipped],
            OrderStatus::Pickup | OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered => &[],
        }
    }

    pub fn follows_flow(&self, next: OrderStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_cart(&self) -> bool {
        matches!(self, OrderStatus::InCart)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("order status", s))
    }
}

/// A non-deleted order item joined with the catalog attributes a discount
/// scope can match on.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub product_id: Uuid,
    pub brand_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl LineItem {
    pub fn line_total(&self) -> BigDecimal {
        &self.unit_price * BigDecimal::from(self.quantity)
    }
}

/// Item quantities must fit the INTEGER `quantity` and `total_items` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("too many items in one order")]
pub struct ItemCountOverflow;

/// Quantity of a line after adding `added` more units to it.
pub fn add_quantity(current: i32, added: i32) -> Result<i32, ItemCountOverflow> {
    current.checked_add(added).ok_or(ItemCountOverflow)
}

#[derive(Debug, Clone, Copy)]
pub struct AppliedDiscount<'a> {
    pub rule: &'a DiscountRule,
    pub scope: &'a DiscountScope,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTotals {
    /// Persisted as the order's `total_amount`.
    pub subtotal: BigDecimal,
    pub discount_amount: BigDecimal,
    pub total_items: i32,
}

impl OrderTotals {
    pub fn compute(items: &[LineItem], discount: Option<AppliedDiscount<'_>>) -> Result<Self, ItemCountOverflow> {
        let total_items = items
            .iter()
            .try_fold(0i32, |acc, item| add_quantity(acc, item.quantity))?;
        let subtotal = round_money(
            &items
                .iter()
                .fold(BigDecimal::zero(), |acc, item| acc + item.line_total()),
        );

        let discount_amount = match discount {
            Some(applied) => {
                let eligible = items
                    .iter()
                    .filter(|item| applied.scope.covers(item))
                    .fold(BigDecimal::zero(), |acc, item| acc + item.line_total());
                let amount = applied.rule.amount_for(&eligible);
                if amount > subtotal {
                    subtotal.clone()
                } else {
                    amount
                }
            }
            None => BigDecimal::zero(),
        };

        Ok(Self {
            subtotal,
            discount_amount,
            total_items,
        })
    }

    pub fn amount_due(&self) -> BigDecimal {
        &self.subtotal - &self.discount_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiscountKind;
    use chrono::{Duration, Utc};

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn item(price: &str, quantity: i32, brand_id: Option<Uuid>) -> LineItem {
        LineItem {
            product_id: Uuid::new_v4(),
            brand_id,
            category_id: None,
            quantity,
            unit_price: dec(price),
        }
    }

    fn rule(kind: DiscountKind, value: &str) -> DiscountRule {
        DiscountRule {
            kind,
            value: dec(value),
            min_order_amount: None,
            max_uses: None,
            used_count: 0,
            starts_at: Utc::now() - Duration::days(1),
            ends_at: None,
            is_active: true,
        }
    }

    #[test]
    fn documented_flow_is_linear_with_fulfilment_fork() {
        assert!(OrderStatus::InCart.follows_flow(OrderStatus::Placed));
        assert!(OrderStatus::Processed.follows_flow(OrderStatus::Pickup));
        assert!(OrderStatus::Processed.follows_flow(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.follows_flow(OrderStatus::Delivered));
        assert!(!OrderStatus::Placed.follows_flow(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.follows_flow(OrderStatus::InCart));
        assert!(OrderStatus::Delivered.successors().is_empty());
    }

    #[test]
    fn status_strings_round_trip_through_from_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<OrderStatus>().is_err());
        assert_eq!(serde_json::to_string(&OrderStatus::InCart).unwrap(), "\"in_cart\"");
    }

    #[test]
    fn totals_sum_quantity_times_price() {
        let items = vec![item("45.50", 2, None), item("12.00", 3, None)];
        let totals = OrderTotals::compute(&items, None).unwrap();
        assert_eq!(totals.subtotal, dec("127.00"));
        assert_eq!(totals.total_items, 5);
        assert_eq!(totals.discount_amount, dec("0"));
        assert_eq!(totals.amount_due(), dec("127.00"));
    }

    #[test]
    fn empty_order_has_zero_totals() {
        let totals = OrderTotals::compute(&[], None).unwrap();
        assert_eq!(totals.subtotal, dec("0"));
        assert_eq!(totals.total_items, 0);
    }

    #[test]
    fn scoped_percentage_discount_only_counts_covered_items() {
        let brand = Uuid::new_v4();
        let items = vec![item("100.00", 1, Some(brand)), item("50.00", 2, None)];
        let rule = rule(DiscountKind::Percentage, "10");
        let scope = DiscountScope {
            brand_ids: vec![brand],
            ..DiscountScope::default()
        };

        let totals = OrderTotals::compute(&items, Some(AppliedDiscount { rule: &rule, scope: &scope })).unwrap();
        assert_eq!(totals.subtotal, dec("200.00"));
        assert_eq!(totals.discount_amount, dec("10.00"));
        assert_eq!(totals.amount_due(), dec("190.00"));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let items = vec![item("8.00", 1, None)];
        let rule = rule(DiscountKind::Fixed, "25");
        let scope = DiscountScope {
            applies_to_all: true,
            ..DiscountScope::default()
        };

        let totals = OrderTotals::compute(&items, Some(AppliedDiscount { rule: &rule, scope: &scope })).unwrap();
        assert_eq!(totals.discount_amount, dec("8.00"));
        assert_eq!(totals.amount_due(), dec("0"));
    }

    #[test]
    fn item_count_beyond_integer_range_is_rejected() {
        let items = vec![item("1.00", i32::MAX, None), item("1.00", i32::MAX, None)];
        assert_eq!(OrderTotals::compute(&items, None), Err(ItemCountOverflow));

        assert_eq!(add_quantity(i32::MAX - 1, 1), Ok(i32::MAX));
        assert_eq!(add_quantity(i32::MAX, 1), Err(ItemCountOverflow));
    }
}
