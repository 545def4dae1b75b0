use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::Permission;
use uuid::Uuid;

use super::AppState;
use crate::auth::Caller;
use crate::discounts::{self as promotions, DiscountDetail, DiscountInput, DiscountPreview};
use crate::error::{ApiError, ApiResult};
use crate::models::Discount;
use crate::schema::discounts;

pub fn routes() -> Router<AppState> {
    Router::new().route("/discounts/validate", post(validate_discount))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/discounts", get(list_discounts).post(create_discount))
        .route(
            "/discounts/:id",
            get(get_discount).put(update_discount).delete(delete_discount),
        )
}

#[derive(Debug, Deserialize)]
pub struct ValidateDiscount {
    pub code: String,
    pub subtotal: BigDecimal,
}

pub async fn validate_discount(
    State(state): State<AppState>,
    Json(input): Json<ValidateDiscount>,
) -> ApiResult<Json<DiscountPreview>> {
    let mut conn = state.pool.get().await?;
    let preview = promotions::preview_discount(&mut conn, &input.code, &input.subtotal).await?;
    Ok(Json(preview))
}

pub async fn list_discounts(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<Discount>>> {
    caller.require(Permission::ManageDiscounts)?;
    let mut conn = state.pool.get().await?;
    let rows = discounts::table
        .filter(discounts::deleted_at.is_null())
        .order(discounts::created_at.desc())
        .select(Discount::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

pub async fn get_discount(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DiscountDetail>> {
    caller.require(Permission::ManageDiscounts)?;
    let mut conn = state.pool.get().await?;
    Ok(Json(promotions::get_discount_detail(&mut conn, id).await?))
}

pub async fn create_discount(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<DiscountInput>,
) -> ApiResult<(StatusCode, Json<DiscountDetail>)> {
    caller.require(Permission::ManageDiscounts)?;
    let mut conn = state.pool.get().await?;
    let detail = promotions::create_discount(&mut conn, input).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn update_discount(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<DiscountInput>,
) -> ApiResult<Json<DiscountDetail>> {
    caller.require(Permission::ManageDiscounts)?;
    let mut conn = state.pool.get().await?;
    Ok(Json(promotions::update_discount(&mut conn, id, input).await?))
}

/// Soft delete; the code stops validating immediately.
pub async fn delete_discount(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageDiscounts)?;
    let mut conn = state.pool.get().await?;
    let deleted = diesel::update(discounts::table.find(id).filter(discounts::deleted_at.is_null()))
        .set((
            discounts::deleted_at.eq(Some(Utc::now())),
            discounts::is_active.eq(false),
        ))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("discount"));
    }
    Ok(StatusCode::NO_CONTENT)
}
