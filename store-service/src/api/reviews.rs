use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch},
    Router,
};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::*;
use uuid::Uuid;

use super::AppState;
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

pub fn routes() -> Router<AppState> {
    Router::new().route("/products/:id/reviews", get(list_product_reviews).post(create_review))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/reviews", get(admin_list_reviews))
        .route("/reviews/:id", patch(moderate_review))
}

pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<Page<Review>>> {
    let mut conn = state.pool.get().await?;
    let approved = || {
        reviews::table
            .filter(reviews::product_id.eq(id))
            .filter(reviews::is_approved.eq(true))
            .filter(reviews::deleted_at.is_null())
    };

    let total = approved().count().get_result::<i64>(&mut conn).await?;
    let rows = approved()
        .order(reviews::created_at.desc())
        .limit(page.limit())
        .offset(page.offset())
        .select(Review::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(Page::new(rows, page, total)))
}

#[derive(Debug, Deserialize)]
pub struct ReviewInput {
    pub rating: i32,
    pub comment: Option<String>,
}

impl ReviewInput {
    fn validate(&self) -> ApiResult<()> {
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(ApiError::BadRequest(format!(
                "rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }
        Ok(())
    }
}

/// New reviews are hidden until a moderator approves them.
pub async fn create_review(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<ReviewInput>,
) -> ApiResult<(StatusCode, Json<Review>)> {
    input.validate()?;
    let mut conn = state.pool.get().await?;

    let product = products::table
        .find(id)
        .filter(products::deleted_at.is_null())
        .filter(products::is_active.eq(true))
        .select(products::id)
        .first::<Uuid>(&mut conn)
        .await
        .optional()?;
    if product.is_none() {
        return Err(ApiError::NotFound("product"));
    }

    let review = diesel::insert_into(reviews::table)
        .values(&NewReview {
            id: Uuid::new_v4(),
            user_id: caller.user_id,
            product_id: id,
            rating: input.rating,
            comment: input.comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
        })
        .returning(Review::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewQuery {
    pub approved: Option<bool>,
    pub product_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ReviewQuery {
    fn filtered(&self) -> reviews::BoxedQuery<'static, Pg> {
        let mut query = reviews::table.filter(reviews::deleted_at.is_null()).into_boxed();
        if let Some(approved) = self.approved {
            query = query.filter(reviews::is_approved.eq(approved));
        }
        if let Some(product_id) = self.product_id {
            query = query.filter(reviews::product_id.eq(product_id));
        }
        query
    }
}

pub async fn admin_list_reviews(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ReviewQuery>,
) -> ApiResult<Json<Page<Review>>> {
    caller.require(Permission::ModerateReviews)?;
    let page = PageRequest {
        page: query.page,
        per_page: query.per_page,
    };

    let mut conn = state.pool.get().await?;
    let total = query.filtered().count().get_result::<i64>(&mut conn).await?;
    let rows = query
        .filtered()
        .order(reviews::created_at.asc())
        .limit(page.limit())
        .offset(page.offset())
        .select(Review::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(Page::new(rows, page, total)))
}

#[derive(Debug, Deserialize)]
pub struct Moderation {
    pub is_approved: bool,
}

pub async fn moderate_review(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<Moderation>,
) -> ApiResult<Json<Review>> {
    caller.require(Permission::ModerateReviews)?;
    let mut conn = state.pool.get().await?;
    let review = diesel::update(reviews::table.find(id).filter(reviews::deleted_at.is_null()))
        .set(reviews::is_approved.eq(input.is_approved))
        .returning(Review::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("review"))?;
    tracing::info!(
        "Review {} {} by {}",
        id,
        if review.is_approved { "approved" } else { "hidden" },
        caller.user_id
    );
    Ok(Json(review))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratings_outside_one_to_five_are_rejected() {
        for rating in [0, 6, -1] {
            let input = ReviewInput { rating, comment: None };
            assert!(matches!(input.validate(), Err(ApiError::BadRequest(_))));
        }
        for rating in MIN_RATING..=MAX_RATING {
            assert!(ReviewInput { rating, comment: None }.validate().is_ok());
        }
    }

    #[test]
    fn moderation_queue_filters_on_approval() {
        let query: ReviewQuery = serde_json::from_str(r#"{"approved": false}"#).unwrap();
        let sql = diesel::debug_query::<Pg, _>(&query.filtered()).to_string();
        assert!(sql.contains("\"reviews\".\"is_approved\" ="));
        assert!(!sql.contains("\"reviews\".\"product_id\""));
    }
}
