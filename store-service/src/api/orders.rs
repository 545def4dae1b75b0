use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::*;
use uuid::Uuid;

use super::AppState;
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::orders::{self as workflow, Checkout};
use crate::schema::*;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart))
        .route("/cart/items", post(add_cart_item))
        .route("/cart/items/:item_id", patch(update_cart_item).delete(remove_cart_item))
        .route("/cart/checkout", post(checkout))
        .route("/orders", get(list_my_orders))
        .route("/orders/:id", get(get_order))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(admin_list_orders))
        .route("/orders/:id", get(admin_get_order))
        .route("/orders/:id/status", patch(update_order_status))
        .route(
            "/orders/:id/items/:item_id",
            patch(admin_update_item).delete(admin_remove_item),
        )
        .route("/orders/:id/recalculate", post(recalculate_order))
}

// ============ Cart ============

pub async fn get_cart(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<OrderWithItems>> {
    let mut conn = state.pool.get().await?;
    let cart = workflow::get_or_create_cart(&mut conn, caller.user_id).await?;
    Ok(Json(workflow::order_with_items(&mut conn, cart).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddCartItem {
    pub product_id: Uuid,
    #[serde(default = "one")]
    pub quantity: i32,
}

fn one() -> i32 {
    1
}

pub async fn add_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<AddCartItem>,
) -> ApiResult<Json<OrderWithItems>> {
    let mut conn = state.pool.get().await?;
    let cart = workflow::add_cart_item(&mut conn, caller.user_id, input.product_id, input.quantity).await?;
    Ok(Json(workflow::order_with_items(&mut conn, cart).await?))
}

#[derive(Debug, Deserialize)]
pub struct QuantityChange {
    pub quantity: i32,
}

pub async fn update_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(item_id): Path<Uuid>,
    Json(input): Json<QuantityChange>,
) -> ApiResult<Json<OrderWithItems>> {
    let mut conn = state.pool.get().await?;
    let cart = workflow::find_cart(&mut conn, caller.user_id)
        .await?
        .ok_or(ApiError::NotFound("cart"))?;
    let cart = workflow::update_order_item_quantity(&mut conn, cart.id, item_id, input.quantity).await?;
    Ok(Json(workflow::order_with_items(&mut conn, cart).await?))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<OrderWithItems>> {
    let mut conn = state.pool.get().await?;
    let cart = workflow::find_cart(&mut conn, caller.user_id)
        .await?
        .ok_or(ApiError::NotFound("cart"))?;
    let cart = workflow::remove_order_item(&mut conn, cart.id, item_id).await?;
    Ok(Json(workflow::order_with_items(&mut conn, cart).await?))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub address_id: Uuid,
    pub discount_code: Option<String>,
    pub notes: Option<String>,
}

pub async fn checkout(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<CheckoutRequest>,
) -> ApiResult<(StatusCode, Json<OrderWithItems>)> {
    let request = Checkout {
        address_id: input.address_id,
        discount_code: input.discount_code.filter(|code| !code.trim().is_empty()),
        notes: input.notes,
    };

    let mut conn = state.pool.get().await?;
    let order = workflow::checkout(&mut conn, caller.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(workflow::order_with_items(&mut conn, order).await?)))
}

// ============ Placed orders ============

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub user_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl OrderQuery {
    fn page_request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            per_page: self.per_page,
        }
    }

    /// Non-cart orders unless a status is asked for explicitly.
    fn filtered(&self) -> orders::BoxedQuery<'static, Pg> {
        let mut query = orders::table.filter(orders::deleted_at.is_null()).into_boxed();
        query = match self.status {
            Some(status) => query.filter(orders::status.eq(status.as_str())),
            None => query.filter(orders::status.ne(OrderStatus::InCart.as_str())),
        };
        if let Some(user_id) = self.user_id {
            query = query.filter(orders::user_id.eq(user_id));
        }
        query
    }
}

async fn search_orders(conn: &mut AsyncPgConnection, query: &OrderQuery) -> ApiResult<Page<Order>> {
    let page = query.page_request();
    let total = query.filtered().count().get_result::<i64>(conn).await?;
    let rows = query
        .filtered()
        .order(orders::created_at.desc())
        .limit(page.limit())
        .offset(page.offset())
        .select(Order::as_select())
        .load(conn)
        .await?;
    Ok(Page::new(rows, page, total))
}

pub async fn list_my_orders(
    State(state): State<AppState>,
    caller: Caller,
    Query(mut query): Query<OrderQuery>,
) -> ApiResult<Json<Page<Order>>> {
    query.user_id = Some(caller.user_id);
    if query.status == Some(OrderStatus::InCart) {
        query.status = None;
    }
    let mut conn = state.pool.get().await?;
    Ok(Json(search_orders(&mut conn, &query).await?))
}

async fn fetch_order(conn: &mut AsyncPgConnection, id: Uuid) -> ApiResult<Order> {
    orders::table
        .find(id)
        .filter(orders::deleted_at.is_null())
        .select(Order::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("order"))
}

/// Customers see their own orders; order managers see any.
pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OrderWithItems>> {
    let mut conn = state.pool.get().await?;
    let order = fetch_order(&mut conn, id).await?;
    if order.user_id != caller.user_id && !caller.can(Permission::ManageOrders) {
        return Err(ApiError::NotFound("order"));
    }
    Ok(Json(workflow::order_with_items(&mut conn, order).await?))
}

// ============ Back office ============

pub async fn admin_list_orders(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Page<Order>>> {
    caller.require(Permission::ManageOrders)?;
    let mut conn = state.pool.get().await?;
    Ok(Json(search_orders(&mut conn, &query).await?))
}

pub async fn admin_get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OrderWithItems>> {
    caller.require(Permission::ManageOrders)?;
    let mut conn = state.pool.get().await?;
    let order = fetch_order(&mut conn, id).await?;
    Ok(Json(workflow::order_with_items(&mut conn, order).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

pub async fn update_order_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<StatusChange>,
) -> ApiResult<Json<Order>> {
    caller.require(Permission::ManageOrders)?;
    let mut conn = state.pool.get().await?;
    let order = workflow::update_order_status(&mut conn, id, input.status, caller.user_id).await?;
    Ok(Json(order))
}

pub async fn admin_update_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<QuantityChange>,
) -> ApiResult<Json<OrderWithItems>> {
    caller.require(Permission::ManageOrders)?;
    let mut conn = state.pool.get().await?;
    let order = workflow::update_order_item_quantity(&mut conn, id, item_id, input.quantity).await?;
    Ok(Json(workflow::order_with_items(&mut conn, order).await?))
}

pub async fn admin_remove_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<OrderWithItems>> {
    caller.require(Permission::ManageOrders)?;
    let mut conn = state.pool.get().await?;
    let order = workflow::remove_order_item(&mut conn, id, item_id).await?;
    Ok(Json(workflow::order_with_items(&mut conn, order).await?))
}

pub async fn recalculate_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Order>> {
    caller.require(Permission::ManageOrders)?;
    let mut conn = state.pool.get().await?;
    let order = conn
        .transaction::<_, ApiError, _>(|conn| Box::pin(async move { workflow::recalculate_order_totals(conn, id).await }))
        .await?;
    Ok(Json(order))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_listing_hides_carts_by_default() {
        let sql = diesel::debug_query::<Pg, _>(&OrderQuery::default().filtered()).to_string();
        assert!(sql.contains("\"orders\".\"status\" !="));
        assert!(sql.contains("in_cart"));
    }

    #[test]
    fn order_listing_filters_by_status_and_user() {
        let query: OrderQuery = serde_json::from_str(r#"{"status": "shipped", "per_page": 5}"#).unwrap();
        assert_eq!(query.status, Some(OrderStatus::Shipped));
        assert_eq!(query.page_request().limit(), 5);

        let query = OrderQuery {
            user_id: Some(Uuid::nil()),
            ..query
        };
        let sql = diesel::debug_query::<Pg, _>(&query.filtered()).to_string();
        assert!(sql.contains("\"orders\".\"status\" ="));
        assert!(sql.contains("\"orders\".\"user_id\" ="));
    }

    #[test]
    fn cart_items_default_to_a_single_unit() {
        let input: AddCartItem = serde_json::from_str(&format!(r#"{{"product_id": "{}"}}"#, Uuid::nil())).unwrap();
        assert_eq!(input.quantity, 1);
    }
}
