use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::*;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscountInput {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountKind,
    pub value: BigDecimal,
    pub min_order_amount: Option<BigDecimal>,
    pub max_uses: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub applies_to_all: bool,
    #[serde(default)]
    pub brand_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
}

fn default_active() -> bool {
    true
}

impl DiscountInput {
    /// Checks the definition and splits it into the discount row and its scope.
    pub fn into_parts(self, used_count: i32) -> ApiResult<(DiscountRow, DiscountScope)> {
        let code = normalize_code(&self.code)?;
        let starts_at = self.starts_at.unwrap_or_else(Utc::now);

        let rule = DiscountRule {
            kind: self.discount_type,
            value: self.value.clone(),
            min_order_amount: self.min_order_amount.clone(),
            max_uses: self.max_uses,
            used_count,
            starts_at,
            ends_at: self.ends_at,
            is_active: self.is_active,
        };
        rule.validate_definition()?;

        let mut scope = DiscountScope {
            applies_to_all: self.applies_to_all,
            product_ids: self.product_ids,
            brand_ids: self.brand_ids,
            category_ids: self.category_ids,
        };
        scope.dedup();

        let row = DiscountRow {
            code,
            description: self.description,
            discount_type: self.discount_type.as_str().to_string(),
            value: rule.value,
            min_order_amount: rule.min_order_amount,
            max_uses: rule.max_uses,
            starts_at,
            ends_at: rule.ends_at,
            is_active: rule.is_active,
            applies_to_all: scope.applies_to_all,
        };
        Ok((row, scope))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscountDetail {
    #[serde(flatten)]
    pub discount: Discount,
    pub brand_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
    pub product_ids: Vec<Uuid>,
}

impl DiscountDetail {
    fn new(discount: Discount, scope: DiscountScope) -> Self {
        Self {
            discount,
            brand_ids: scope.brand_ids,
            category_ids: scope.category_ids,
            product_ids: scope.product_ids,
        }
    }
}

pub async fn load_scope(conn: &mut AsyncPgConnection, discount: &Discount) -> ApiResult<DiscountScope> {
    let brand_ids = discount_brands::table
        .filter(discount_brands::discount_id.eq(discount.id))
        .select(discount_brands::brand_id)
        .load::<Uuid>(conn)
        .await?;
    let category_ids = discount_categories::table
        .filter(discount_categories::discount_id.eq(discount.id))
        .select(discount_categories::category_id)
        .load::<Uuid>(conn)
        .await?;
    let product_ids = discount_products::table
        .filter(discount_products::discount_id.eq(discount.id))
        .select(discount_products::product_id)
        .load::<Uuid>(conn)
        .await?;

    Ok(DiscountScope {
        applies_to_all: discount.applies_to_all,
        product_ids,
        brand_ids,
        category_ids,
    })
}

/// Swaps the discount's join-table rows for the ids in `scope`.
async fn replace_relations(conn: &mut AsyncPgConnection, discount_id: Uuid, scope: &DiscountScope) -> ApiResult<()> {
    diesel::delete(discount_brands::table.filter(discount_brands::discount_id.eq(discount_id)))
        .execute(conn)
        .await?;
    diesel::delete(discount_categories::table.filter(discount_categories::discount_id.eq(discount_id)))
        .execute(conn)
        .await?;
    diesel::delete(discount_products::table.filter(discount_products::discount_id.eq(discount_id)))
        .execute(conn)
        .await?;

    if !scope.brand_ids.is_empty() {
        let rows: Vec<DiscountBrand> = scope
            .brand_ids
            .iter()
            .map(|&brand_id| DiscountBrand { discount_id, brand_id })
            .collect();
        diesel::insert_into(discount_brands::table)
            .values(&rows)
            .execute(conn)
            .await?;
    }
    if !scope.category_ids.is_empty() {
        let rows: Vec<DiscountCategory> = scope
            .category_ids
            .iter()
            .map(|&category_id| DiscountCategory { discount_id, category_id })
            .collect();
        diesel::insert_into(discount_categories::table)
            .values(&rows)
            .execute(conn)
            .await?;
    }
    if !scope.product_ids.is_empty() {
        let rows: Vec<DiscountProduct> = scope
            .product_ids
            .iter()
            .map(|&product_id| DiscountProduct { discount_id, product_id })
            .collect();
        diesel::insert_into(discount_products::table)
            .values(&rows)
            .execute(conn)
            .await?;
    }

    Ok(())
}

pub async fn create_discount(conn: &mut AsyncPgConnection, input: DiscountInput) -> ApiResult<DiscountDetail> {
    let (row, scope) = input.into_parts(0)?;

    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let discount = diesel::insert_into(discounts::table)
                .values(&row)
                .returning(Discount::as_returning())
                .get_result(conn)
                .await?;
            replace_relations(conn, discount.id, &scope).await?;

            info!("Created discount {} ({})", discount.code, discount.id);
            Ok(DiscountDetail::new(discount, scope))
        })
    })
    .await
}

pub async fn update_discount(
    conn: &mut AsyncPgConnection,
    discount_id: Uuid,
    input: DiscountInput,
) -> ApiResult<DiscountDetail> {
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let current = get_discount(conn, discount_id).await?;
            let (row, scope) = input.into_parts(current.used_count)?;

            let discount = diesel::update(discounts::table.find(discount_id))
                .set(&row)
                .returning(Discount::as_returning())
                .get_result(conn)
                .await?;
            replace_relations(conn, discount_id, &scope).await?;

            info!("Updated discount {} ({})", discount.code, discount.id);
            Ok(DiscountDetail::new(discount, scope))
        })
    })
    .await
}

pub async fn get_discount(conn: &mut AsyncPgConnection, discount_id: Uuid) -> ApiResult<Discount> {
    discounts::table
        .find(discount_id)
        .filter(discounts::deleted_at.is_null())
        .select(Discount::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("discount"))
}

pub async fn get_discount_detail(conn: &mut AsyncPgConnection, discount_id: Uuid) -> ApiResult<DiscountDetail> {
    let discount = get_discount(conn, discount_id).await?;
    let scope = load_scope(conn, &discount).await?;
    Ok(DiscountDetail::new(discount, scope))
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscountPreview {
    pub code: String,
    pub discount_type: String,
    pub value: BigDecimal,
    pub applies_to_all: bool,
    /// Exact for store-wide codes; an upper bound for scoped ones, which only
    /// count matching cart items at checkout.
    pub discount_amount: BigDecimal,
}

pub async fn preview_discount(
    conn: &mut AsyncPgConnection,
    code: &str,
    subtotal: &BigDecimal,
) -> ApiResult<DiscountPreview> {
    let code = normalize_code(code)?;
    let discount = discounts::table
        .filter(discounts::code.eq(&code))
        .filter(discounts::deleted_at.is_null())
        .select(Discount::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("discount"))?;

    let rule = DiscountRule::try_from(&discount)?;
    rule.check_redeemable(Utc::now(), subtotal)?;

    Ok(DiscountPreview {
        discount_amount: rule.amount_for(subtotal),
        code: discount.code,
        discount_type: discount.discount_type,
        value: discount.value,
        applies_to_all: discount.applies_to_all,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(json: &str) -> DiscountInput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn input_is_normalized_into_row_and_scope() {
        let brand = Uuid::new_v4();
        let (row, scope) = input(&format!(
            r#"{{"code": " ramadan15 ", "discount_type": "percentage", "value": "15",
                "brand_ids": ["{brand}", "{brand}"]}}"#
        ))
        .into_parts(0)
        .unwrap();

        assert_eq!(row.code, "RAMADAN15");
        assert_eq!(row.discount_type, "percentage");
        assert!(row.is_active);
        assert!(!row.applies_to_all);
        assert_eq!(scope.brand_ids, vec![brand]);
        assert!(scope.product_ids.is_empty());
    }

    #[test]
    fn invalid_definitions_are_bad_requests() {
        let err = input(r#"{"code": "BIG", "discount_type": "percentage", "value": "150"}"#)
            .into_parts(0)
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = input(
            r#"{"code": "WINDOW", "discount_type": "fixed", "value": "10",
                "starts_at": "2025-02-01T00:00:00Z", "ends_at": "2025-01-01T00:00:00Z"}"#,
        )
        .into_parts(0)
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = input(r#"{"code": "  ", "discount_type": "fixed", "value": "10"}"#)
            .into_parts(0)
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
