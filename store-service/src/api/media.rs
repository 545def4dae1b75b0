use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch},
    Router,
};
use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use shared::Permission;
use std::collections::HashMap;
use uuid::Uuid;

use super::{required, would_create_cycle, AppState};
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/media/folders", get(list_folders).post(create_folder))
        .route("/media/folders/:id", patch(update_folder).delete(delete_folder))
        .route("/media/items", get(list_items).post(create_item))
        .route("/media/items/:id", patch(update_item).delete(delete_item))
}

#[derive(Debug, Default, Deserialize)]
pub struct FolderQuery {
    /// Lists the children of this folder; top-level folders when absent.
    pub parent_id: Option<Uuid>,
}

pub async fn list_folders(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<FolderQuery>,
) -> ApiResult<Json<Vec<MediaFolder>>> {
    caller.require(Permission::ManageMedia)?;
    let mut conn = state.pool.get().await?;

    let mut folders = media_folders::table
        .filter(media_folders::deleted_at.is_null())
        .into_boxed::<Pg>();
    folders = match query.parent_id {
        Some(parent_id) => folders.filter(media_folders::parent_id.eq(parent_id)),
        None => folders.filter(media_folders::parent_id.is_null()),
    };

    let folders = folders
        .order(media_folders::name.asc())
        .select(MediaFolder::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(folders))
}

pub async fn create_folder(
    State(state): State<AppState>,
    caller: Caller,
    Json(mut folder): Json<NewMediaFolder>,
) -> ApiResult<(StatusCode, Json<MediaFolder>)> {
    caller.require(Permission::ManageMedia)?;
    folder.name = required("name", &folder.name)?;

    let mut conn = state.pool.get().await?;
    let folder = diesel::insert_into(media_folders::table)
        .values(&folder)
        .returning(MediaFolder::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

pub async fn update_folder(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(changes): Json<MediaFolderChanges>,
) -> ApiResult<Json<MediaFolder>> {
    caller.require(Permission::ManageMedia)?;
    let mut conn = state.pool.get().await?;
    if let Some(parent_id) = changes.parent_id {
        let parents: HashMap<Uuid, Option<Uuid>> = media_folders::table
            .filter(media_folders::deleted_at.is_null())
            .select((media_folders::id, media_folders::parent_id))
            .load::<(Uuid, Option<Uuid>)>(&mut conn)
            .await?
            .into_iter()
            .collect();
        if would_create_cycle(&parents, id, parent_id) {
            return Err(ApiError::BadRequest(
                "a folder cannot be moved into itself or its sub-folders".to_string(),
            ));
        }
    }
    let folder = diesel::update(media_folders::table.find(id).filter(media_folders::deleted_at.is_null()))
        .set(&changes)
        .returning(MediaFolder::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("media folder"))?;
    Ok(Json(folder))
}

pub async fn delete_folder(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageMedia)?;
    let mut conn = state.pool.get().await?;

    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let items = media_items::table
                .filter(media_items::folder_id.eq(id))
                .filter(media_items::deleted_at.is_null())
                .count()
                .get_result::<i64>(conn)
                .await?;
            let children = media_folders::table
                .filter(media_folders::parent_id.eq(id))
                .filter(media_folders::deleted_at.is_null())
                .count()
                .get_result::<i64>(conn)
                .await?;
            if items > 0 || children > 0 {
                return Err(ApiError::Conflict("media folder is not empty".to_string()));
            }

            let deleted = diesel::update(media_folders::table.find(id).filter(media_folders::deleted_at.is_null()))
                .set(media_folders::deleted_at.eq(Some(Utc::now())))
                .execute(conn)
                .await?;
            if deleted == 0 {
                return Err(ApiError::NotFound("media folder"));
            }
            Ok(())
        })
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemQuery {
    pub folder_id: Option<Uuid>,
}

pub async fn list_items(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ItemQuery>,
) -> ApiResult<Json<Vec<MediaItem>>> {
    caller.require(Permission::ManageMedia)?;
    let mut conn = state.pool.get().await?;

    let mut items = media_items::table
        .filter(media_items::deleted_at.is_null())
        .into_boxed::<Pg>();
    if let Some(folder_id) = query.folder_id {
        items = items.filter(media_items::folder_id.eq(folder_id));
    }

    let items = items
        .order(media_items::created_at.desc())
        .select(MediaItem::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(items))
}

pub async fn create_item(
    State(state): State<AppState>,
    caller: Caller,
    Json(mut item): Json<NewMediaItem>,
) -> ApiResult<(StatusCode, Json<MediaItem>)> {
    caller.require(Permission::ManageMedia)?;
    item.file_name = required("file_name", &item.file_name)?;
    item.url = required("url", &item.url)?;
    if item.size_bytes < 0 {
        return Err(ApiError::BadRequest("size_bytes cannot be negative".to_string()));
    }

    let mut conn = state.pool.get().await?;
    let item = diesel::insert_into(media_items::table)
        .values(&item)
        .returning(MediaItem::as_returning())
        .get_result(&mut conn)
        .await?;
    tracing::info!("Media item {} registered by {}", item.id, caller.user_id);
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(changes): Json<MediaItemChanges>,
) -> ApiResult<Json<MediaItem>> {
    caller.require(Permission::ManageMedia)?;
    let mut conn = state.pool.get().await?;
    let item = diesel::update(media_items::table.find(id).filter(media_items::deleted_at.is_null()))
        .set(&changes)
        .returning(MediaItem::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("media item"))?;
    Ok(Json(item))
}

/// Soft-deletes the item and unlinks it from every product.
pub async fn delete_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageMedia)?;
    let mut conn = state.pool.get().await?;

    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let deleted = diesel::update(media_items::table.find(id).filter(media_items::deleted_at.is_null()))
                .set(media_items::deleted_at.eq(Some(Utc::now())))
                .execute(conn)
                .await?;
            if deleted == 0 {
                return Err(ApiError::NotFound("media item"));
            }
            diesel::delete(product_media::table.filter(product_media::media_id.eq(id)))
                .execute(conn)
                .await?;
            Ok(())
        })
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
