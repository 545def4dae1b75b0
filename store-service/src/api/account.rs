use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, patch, put},
    Router,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use uuid::Uuid;

use super::{required, AppState};
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_profile).patch(update_profile))
        .route("/me/addresses", get(list_addresses).post(create_address))
        .route("/me/addresses/:id", patch(update_address).delete(delete_address))
        .route("/me/favorites", get(list_favorites))
        .route("/me/favorites/:product_id", put(add_favorite).delete(remove_favorite))
        .route("/me/reviews/:id", delete(delete_own_review))
}

pub async fn get_profile(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<User>> {
    let mut conn = state.pool.get().await?;
    let user = users::table
        .find(caller.user_id)
        .select(User::as_select())
        .first(&mut conn)
        .await?;
    Ok(Json(user))
}

pub async fn update_profile(
    State(state): State<AppState>,
    caller: Caller,
    Json(changes): Json<ProfileChanges>,
) -> ApiResult<Json<User>> {
    let mut conn = state.pool.get().await?;
    let user = diesel::update(users::table.find(caller.user_id))
        .set(&changes)
        .returning(User::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok(Json(user))
}

// ============ Addresses ============

pub async fn list_addresses(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<Address>>> {
    let mut conn = state.pool.get().await?;
    let addresses = addresses::table
        .filter(addresses::user_id.eq(caller.user_id))
        .filter(addresses::deleted_at.is_null())
        .order((addresses::is_default.desc(), addresses::created_at.asc()))
        .select(Address::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(addresses))
}

#[derive(Debug, Deserialize)]
pub struct AddressInput {
    pub label: Option<String>,
    pub recipient: String,
    pub street: String,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

/// A user keeps at most one default address.
async fn clear_default_address(conn: &mut AsyncPgConnection, user_id: Uuid) -> ApiResult<()> {
    diesel::update(
        addresses::table
            .filter(addresses::user_id.eq(user_id))
            .filter(addresses::is_default.eq(true)),
    )
    .set(addresses::is_default.eq(false))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn create_address(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<AddressInput>,
) -> ApiResult<(StatusCode, Json<Address>)> {
    let new_address = NewAddress {
        id: Uuid::new_v4(),
        user_id: caller.user_id,
        label: input.label,
        recipient: required("recipient", &input.recipient)?,
        street: required("street", &input.street)?,
        city: required("city", &input.city)?,
        state: input.state,
        postal_code: required("postal_code", &input.postal_code)?,
        country: required("country", &input.country)?,
        is_default: input.is_default,
    };

    let mut conn = state.pool.get().await?;
    let address = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                if new_address.is_default {
                    clear_default_address(conn, new_address.user_id).await?;
                }
                let address = diesel::insert_into(addresses::table)
                    .values(&new_address)
                    .returning(Address::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(address)
            })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(address)))
}

pub async fn update_address(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(changes): Json<AddressChanges>,
) -> ApiResult<Json<Address>> {
    let user_id = caller.user_id;
    let mut conn = state.pool.get().await?;
    let address = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                if changes.is_default == Some(true) {
                    clear_default_address(conn, user_id).await?;
                }
                diesel::update(
                    addresses::table
                        .find(id)
                        .filter(addresses::user_id.eq(user_id))
                        .filter(addresses::deleted_at.is_null()),
                )
                .set(&changes)
                .returning(Address::as_returning())
                .get_result(conn)
                .await
                .optional()?
                .ok_or(ApiError::NotFound("address"))
            })
        })
        .await?;
    Ok(Json(address))
}

pub async fn delete_address(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;
    let deleted = diesel::update(
        addresses::table
            .find(id)
            .filter(addresses::user_id.eq(caller.user_id))
            .filter(addresses::deleted_at.is_null()),
    )
    .set((
        addresses::deleted_at.eq(Some(Utc::now())),
        addresses::is_default.eq(false),
    ))
    .execute(&mut conn)
    .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("address"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Favorites ============

pub async fn list_favorites(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<Product>>> {
    let mut conn = state.pool.get().await?;
    let products = favorites::table
        .inner_join(products::table)
        .filter(favorites::user_id.eq(caller.user_id))
        .filter(products::deleted_at.is_null())
        .order(favorites::created_at.desc())
        .select(Product::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(products))
}

/// Idempotent: favoriting a product twice keeps the first timestamp.
pub async fn add_favorite(
    State(state): State<AppState>,
    caller: Caller,
    Path(product_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;
    let exists = products::table
        .find(product_id)
        .filter(products::deleted_at.is_null())
        .select(products::id)
        .first::<Uuid>(&mut conn)
        .await
        .optional()?;
    if exists.is_none() {
        return Err(ApiError::NotFound("product"));
    }

    diesel::insert_into(favorites::table)
        .values(&Favorite {
            user_id: caller.user_id,
            product_id,
            created_at: Utc::now(),
        })
        .on_conflict((favorites::user_id, favorites::product_id))
        .do_nothing()
        .execute(&mut conn)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    caller: Caller,
    Path(product_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;
    diesel::delete(
        favorites::table
            .filter(favorites::user_id.eq(caller.user_id))
            .filter(favorites::product_id.eq(product_id)),
    )
    .execute(&mut conn)
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_own_review(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;
    let deleted = diesel::update(
        reviews::table
            .find(id)
            .filter(reviews::user_id.eq(caller.user_id))
            .filter(reviews::deleted_at.is_null()),
    )
    .set(reviews::deleted_at.eq(Some(Utc::now())))
    .execute(&mut conn)
    .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("review"));
    }
    Ok(StatusCode::NO_CONTENT)
}
