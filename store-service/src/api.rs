mod account;
mod catalog;
mod discounts;
mod media;
mod orders;
mod reviews;
mod stats;
mod users;

use axum::{http::Method, routing::get, Router};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::JwtVerifier;
use crate::db::DbPool;
use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub auth: Arc<JwtVerifier>,
}

/// Storefront routes at the root, back-office routes under `/admin`.
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .merge(catalog::admin_routes())
        .merge(media::admin_routes())
        .merge(discounts::admin_routes())
        .merge(orders::admin_routes())
        .merge(reviews::admin_routes())
        .merge(users::admin_routes())
        .merge(stats::admin_routes());

    Router::new()
        .route("/health", get(health_check))
        .merge(catalog::routes())
        .merge(discounts::routes())
        .merge(reviews::routes())
        .merge(account::routes())
        .merge(orders::routes())
        .nest("/admin", admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
                .allow_headers(Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub(crate) fn required(field: &str, value: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Uses the given slug, or derives one from `name`.
pub(crate) fn resolve_slug(name: &str, slug: Option<&str>) -> ApiResult<String> {
    let slug = shared::slugify(slug.unwrap_or(name));
    if slug.is_empty() {
        return Err(ApiError::BadRequest("slug must contain letters or digits".to_string()));
    }
    Ok(slug)
}

/// Whether re-parenting `id` under `new_parent` would make it its own
/// ancestor. `parents` maps each live node to its current parent.
pub(crate) fn would_create_cycle(parents: &HashMap<Uuid, Option<Uuid>>, id: Uuid, new_parent: Uuid) -> bool {
    let mut seen = HashSet::new();
    let mut current = Some(new_parent);
    while let Some(node) = current {
        if node == id {
            return true;
        }
        if !seen.insert(node) {
            // an existing loop above us that does not pass through `id`
            return false;
        }
        current = parents.get(&node).copied().flatten();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use diesel_async::pooled_connection::AsyncDieselConnectionManager;
    use diesel_async::AsyncPgConnection;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        // never connects: these tests stop before any handler touches the pool
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new("postgres://localhost/unused");
        AppState {
            pool: DbPool::builder().build_unchecked(manager),
            auth: Arc::new(JwtVerifier::new("test-secret", "authenticated")),
        }
    }

    #[tokio::test]
    async fn health_check_responds_ok() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn customer_routes_require_a_token() {
        let app = create_router(test_state());
        for uri in ["/cart", "/me", "/orders", "/admin/orders", "/admin/stats/orders"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn malformed_token_is_rejected_with_json_error() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "authentication required");
    }

    #[test]
    fn slugs_fall_back_to_name() {
        assert_eq!(resolve_slug("Adalya Love 66", None).unwrap(), "adalya-love-66");
        assert_eq!(resolve_slug("ignored", Some("Custom Slug")).unwrap(), "custom-slug");
        assert!(resolve_slug("!!!", None).is_err());
        assert!(required("name", "   ").is_err());
    }

    #[test]
    fn reparenting_under_a_descendant_is_a_cycle() {
        let (a, b, c, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        // a <- b <- c, d on its own
        let parents = HashMap::from([(a, None), (b, Some(a)), (c, Some(b)), (d, None)]);

        assert!(would_create_cycle(&parents, a, a));
        assert!(would_create_cycle(&parents, a, b));
        assert!(would_create_cycle(&parents, a, c));
        assert!(!would_create_cycle(&parents, c, a));
        assert!(!would_create_cycle(&parents, a, d));
        assert!(!would_create_cycle(&parents, b, Uuid::new_v4()));
    }
}
