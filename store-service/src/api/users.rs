use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, patch},
    Router,
};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::models::User;
use crate::schema::users;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/role", patch(change_role))
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl UserQuery {
    fn filtered(&self) -> users::BoxedQuery<'static, Pg> {
        let mut query = users::table.filter(users::deleted_at.is_null()).into_boxed();
        if let Some(role) = self.role {
            query = query.filter(users::role.eq(role.as_str()));
        }
        query
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<Page<User>>> {
    caller.require(Permission::ManageUsers)?;
    let page = PageRequest {
        page: query.page,
        per_page: query.per_page,
    };

    let mut conn = state.pool.get().await?;
    let total = query.filtered().count().get_result::<i64>(&mut conn).await?;
    let rows = query
        .filtered()
        .order(users::created_at.desc())
        .limit(page.limit())
        .offset(page.offset())
        .select(User::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(Page::new(rows, page, total)))
}

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: Role,
}

pub async fn change_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<RoleChange>,
) -> ApiResult<Json<User>> {
    caller.require(Permission::ManageRoles)?;
    if id == caller.user_id {
        return Err(ApiError::Forbidden("you cannot change your own role".to_string()));
    }

    let mut conn = state.pool.get().await?;
    let user = diesel::update(users::table.find(id).filter(users::deleted_at.is_null()))
        .set(users::role.eq(input.role.as_str()))
        .returning(User::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("user"))?;

    info!("User {} is now {} (changed by {})", user.id, input.role, caller.user_id);
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_filter_only_accepts_known_roles() {
        let query: UserQuery = serde_json::from_str(r#"{"role": "marketing"}"#).unwrap();
        assert_eq!(query.role, Some(Role::Marketing));
        assert!(serde_json::from_str::<UserQuery>(r#"{"role": "owner"}"#).is_err());
    }

    #[test]
    fn updated_at_is_stamped_by_the_database() {
        let migration = include_str!("../../migrations/2024-06-01-000001_create_users/up.sql");
        assert!(migration.contains("CREATE TRIGGER users_updated_at BEFORE UPDATE ON users"));
    }
}
