use bigdecimal::BigDecimal;

pub const MONEY_SCALE: i64 = 2;

pub fn round_money(amount: &BigDecimal) -> BigDecimal {
    amount.round(MONEY_SCALE)
}

/// Products assigned to a live price group sell at the group's price.
pub fn effective_price(product_price: &BigDecimal, price_group_price: Option<&BigDecimal>) -> BigDecimal {
    round_money(price_group_price.unwrap_or(product_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn price_group_overrides_product_price() {
        assert_eq!(effective_price(&dec("89.90"), Some(&dec("79.90"))), dec("79.90"));
        assert_eq!(effective_price(&dec("89.90"), None), dec("89.90"));
    }

    #[test]
    fn rounds_to_cents() {
        assert_eq!(round_money(&dec("12.344")), dec("12.34"));
        assert_eq!(round_money(&dec("12.346")), dec("12.35"));
    }
}
