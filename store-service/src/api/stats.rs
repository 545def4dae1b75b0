use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use diesel::sql_types::Integer;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::Permission;

use super::AppState;
use crate::auth::Caller;
use crate::error::ApiResult;
use crate::models::{DailyOrderStats, OrderStats, StatusCount};

pub const DEFAULT_DAYS: i32 = 30;
pub const MAX_DAYS: i32 = 365;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/stats/orders", get(order_stats))
        .route("/stats/orders/daily", get(daily_order_stats))
        .route("/stats/orders/by-status", get(orders_by_status))
}

pub async fn order_stats(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<OrderStats>> {
    caller.require(Permission::ViewStats)?;
    let mut conn = state.pool.get().await?;
    let stats = diesel::sql_query(
        "SELECT total_orders, total_revenue, average_order_value, total_items_sold, pending_orders \
         FROM get_order_stats()",
    )
    .get_result::<OrderStats>(&mut conn)
    .await?;
    Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct DailyQuery {
    pub days: Option<i32>,
}

impl DailyQuery {
    fn days(&self) -> i32 {
        self.days.unwrap_or(DEFAULT_DAYS).clamp(1, MAX_DAYS)
    }
}

pub async fn daily_order_stats(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<DailyQuery>,
) -> ApiResult<Json<Vec<DailyOrderStats>>> {
    caller.require(Permission::ViewStats)?;
    let mut conn = state.pool.get().await?;
    let rows = diesel::sql_query("SELECT day, order_count, revenue FROM get_daily_order_stats($1) ORDER BY day")
        .bind::<Integer, _>(query.days())
        .load::<DailyOrderStats>(&mut conn)
        .await?;
    Ok(Json(rows))
}

pub async fn orders_by_status(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<StatusCount>>> {
    caller.require(Permission::ViewStats)?;
    let mut conn = state.pool.get().await?;
    let rows = diesel::sql_query("SELECT status, order_count FROM get_orders_by_status_count() ORDER BY status")
        .load::<StatusCount>(&mut conn)
        .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_window_is_clamped() {
        assert_eq!(DailyQuery::default().days(), DEFAULT_DAYS);
        assert_eq!(DailyQuery { days: Some(0) }.days(), 1);
        assert_eq!(DailyQuery { days: Some(1000) }.days(), MAX_DAYS);
        assert_eq!(DailyQuery { days: Some(7) }.days(), 7);
    }
}
