use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use crate::schema::*;

// ---- accounts ----

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Result<Role, ParseEnumError> {
        self.role.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct ProfileChanges {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = addresses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: Option<String>,
    pub recipient: String,
    pub street: String,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = addresses)]
pub struct NewAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: Option<String>,
    pub recipient: String,
    pub street: String,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub is_default: bool,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = addresses)]
pub struct AddressChanges {
    pub label: Option<String>,
    pub recipient: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub is_default: Option<bool>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

// ---- catalog ----

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Category {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = categories)]
pub struct NewCategory {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = categories)]
pub struct CategoryChanges {
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub is_active: Option<bool>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = brands)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Brand {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = brands)]
pub struct NewBrand {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = brands)]
pub struct BrandChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub is_active: Option<bool>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = price_groups)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PriceGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = price_groups)]
pub struct NewPriceGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: BigDecimal,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = price_groups)]
pub struct PriceGroupChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<BigDecimal>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price_group_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub stock: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = products)]
pub struct NewProduct {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price_group_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub stock: i32,
    pub is_active: bool,
    pub is_featured: bool,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = products)]
pub struct ProductChanges {
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price_group_id: Option<Uuid>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: Option<BigDecimal>,
    pub stock: Option<i32>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = reviews)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = reviews)]
pub struct NewReview {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = favorites)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Favorite {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// ---- media ----

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = media_folders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MediaFolder {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Insertable)]
#[diesel(table_name = media_folders)]
pub struct NewMediaFolder {
    #[serde(skip_deserializing, default = "Uuid::new_v4")]
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = media_folders)]
pub struct MediaFolderChanges {
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = media_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MediaItem {
    pub id: Uuid,
    pub folder_id: Option<Uuid>,
    pub file_name: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub alt_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Insertable)]
#[diesel(table_name = media_items)]
pub struct NewMediaItem {
    #[serde(skip_deserializing, default = "Uuid::new_v4")]
    pub id: Uuid,
    pub folder_id: Option<Uuid>,
    pub file_name: String,
    pub url: String,
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: i64,
    pub alt_text: Option<String>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = media_items)]
pub struct MediaItemChanges {
    pub folder_id: Option<Uuid>,
    pub file_name: Option<String>,
    pub alt_text: Option<String>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = product_media)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductMedia {
    pub product_id: Uuid,
    pub media_id: Uuid,
    pub position: i32,
}

// ---- discounts ----

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = discounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Discount {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: String,
    pub value: BigDecimal,
    pub min_order_amount: Option<BigDecimal>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub applies_to_all: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<&Discount> for DiscountRule {
    type Error = ParseEnumError;

    fn try_from(discount: &Discount) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: discount.discount_type.parse()?,
            value: discount.value.clone(),
            min_order_amount: discount.min_order_amount.clone(),
            max_uses: discount.max_uses,
            used_count: discount.used_count,
            starts_at: discount.starts_at,
            ends_at: discount.ends_at,
            is_active: discount.is_active,
        })
    }
}

/// Full replacement of a discount's editable columns. A `None` clears the column.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = discounts)]
#[diesel(treat_none_as_null = true)]
pub struct DiscountRow {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: String,
    pub value: BigDecimal,
    pub min_order_amount: Option<BigDecimal>,
    pub max_uses: Option<i32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub applies_to_all: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = discount_brands)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DiscountBrand {
    pub discount_id: Uuid,
    pub brand_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = discount_categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DiscountCategory {
    pub discount_id: Uuid,
    pub category_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = discount_products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DiscountProduct {
    pub discount_id: Uuid,
    pub product_id: Uuid,
}

// ---- orders ----

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address_id: Option<Uuid>,
    pub discount_id: Option<Uuid>,
    pub status: String,
    pub total_amount: BigDecimal,
    pub discount_amount: BigDecimal,
    pub total_items: i32,
    pub notes: Option<String>,
    pub placed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn status(&self) -> Result<OrderStatus, ParseEnumError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_items)]
pub struct NewOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub amount_due: BigDecimal,
    pub items: Vec<OrderItem>,
}

// ---- outbox ----

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl TryFrom<&OrderEvent> for NewOutboxEvent {
    type Error = serde_json::Error;

    fn try_from(event: &OrderEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
        })
    }
}

// ---- reporting ----

#[derive(Debug, Clone, QueryableByName, Serialize)]
pub struct OrderStats {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub total_orders: i64,
    #[diesel(sql_type = diesel::sql_types::Numeric)]
    pub total_revenue: BigDecimal,
    #[diesel(sql_type = diesel::sql_types::Numeric)]
    pub average_order_value: BigDecimal,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub total_items_sold: i64,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub pending_orders: i64,
}

#[derive(Debug, Clone, QueryableByName, Serialize)]
pub struct DailyOrderStats {
    #[diesel(sql_type = diesel::sql_types::Date)]
    pub day: chrono::NaiveDate,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub order_count: i64,
    #[diesel(sql_type = diesel::sql_types::Numeric)]
    pub revenue: BigDecimal,
}

#[derive(Debug, Clone, QueryableByName, Serialize)]
pub struct StatusCount {
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub order_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn changesets_stamp_updated_at() {
        let before = Utc::now();
        let changes: ProductChanges = serde_json::from_str(r#"{"stock": 12}"#).unwrap();
        assert_eq!(changes.stock, Some(12));
        assert!(changes.name.is_none());
        assert!(changes.updated_at >= before);
    }

    #[test]
    fn discount_row_converts_to_rule() {
        let now = Utc::now();
        let discount = Discount {
            id: Uuid::new_v4(),
            code: "HOOKAH10".to_string(),
            description: None,
            discount_type: "percentage".to_string(),
            value: BigDecimal::from(10),
            min_order_amount: Some(BigDecimal::from_str("50.00").unwrap()),
            max_uses: Some(100),
            used_count: 4,
            starts_at: now,
            ends_at: None,
            is_active: true,
            applies_to_all: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let rule = DiscountRule::try_from(&discount).unwrap();
        assert_eq!(rule.kind, DiscountKind::Percentage);
        assert_eq!(rule.used_count, 4);

        let broken = Discount {
            discount_type: "bogo".to_string(),
            ..discount
        };
        assert!(DiscountRule::try_from(&broken).is_err());
    }

    #[test]
    fn outbox_row_carries_event_metadata() {
        let event = OrderEvent::OrderItemsChanged {
            order_id: Uuid::new_v4(),
            total_amount: BigDecimal::from(42),
            total_items: 2,
        };
        let row = NewOutboxEvent::try_from(&event).unwrap();
        assert_eq!(row.aggregate_id, event.aggregate_id());
        assert_eq!(row.event_type, "OrderItemsChanged");
        assert_eq!(row.event_data["data"]["total_items"], 2);
    }
}
