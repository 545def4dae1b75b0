use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, patch, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::*;
use std::collections::HashMap;
use uuid::Uuid;

use super::{required, resolve_slug, would_create_cycle, AppState};
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/categories/:id", get(get_category))
        .route("/brands", get(list_brands))
        .route("/brands/:id", get(get_brand))
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(admin_list_categories).post(create_category))
        .route("/categories/:id", patch(update_category).delete(delete_category))
        .route("/brands", get(admin_list_brands).post(create_brand))
        .route("/brands/:id", patch(update_brand).delete(delete_brand))
        .route("/price-groups", get(list_price_groups).post(create_price_group))
        .route("/price-groups/:id", patch(update_price_group).delete(delete_price_group))
        .route("/products", get(admin_list_products).post(create_product))
        .route("/products/:id", patch(update_product).delete(delete_product))
        .route("/products/:id/media", post(attach_product_media))
        .route("/products/:id/media/:media_id", delete(detach_product_media))
}

// ============ Categories ============

async fn load_categories(conn: &mut AsyncPgConnection, include_inactive: bool) -> ApiResult<Vec<Category>> {
    let mut query = categories::table
        .filter(categories::deleted_at.is_null())
        .into_boxed::<Pg>();
    if !include_inactive {
        query = query.filter(categories::is_active.eq(true));
    }

    let categories = query
        .order(categories::name.asc())
        .select(Category::as_select())
        .load(conn)
        .await?;
    Ok(categories)
}

pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(load_categories(&mut conn, false).await?))
}

pub async fn admin_list_categories(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<Vec<Category>>> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    Ok(Json(load_categories(&mut conn, true).await?))
}

pub async fn get_category(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Category>> {
    let mut conn = state.pool.get().await?;
    let category = categories::table
        .find(id)
        .filter(categories::deleted_at.is_null())
        .filter(categories::is_active.eq(true))
        .select(Category::as_select())
        .first(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("category"))?;
    Ok(Json(category))
}

#[derive(Debug, Deserialize)]
pub struct CategoryInput {
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn create_category(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<CategoryInput>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    caller.require(Permission::ManageCatalog)?;
    let name = required("name", &input.name)?;
    let new_category = NewCategory {
        id: Uuid::new_v4(),
        parent_id: input.parent_id,
        slug: resolve_slug(&name, input.slug.as_deref())?,
        name,
        description: input.description,
        image_url: input.image_url,
        is_active: input.is_active.unwrap_or(true),
    };

    let mut conn = state.pool.get().await?;
    let category = diesel::insert_into(categories::table)
        .values(&new_category)
        .returning(Category::as_returning())
        .get_result(&mut conn)
        .await?;
    tracing::info!("Category {} created by {}", category.id, caller.user_id);
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(mut changes): Json<CategoryChanges>,
) -> ApiResult<Json<Category>> {
    caller.require(Permission::ManageCatalog)?;
    if let Some(slug) = changes.slug.take() {
        changes.slug = Some(resolve_slug(&slug, None)?);
    }

    let mut conn = state.pool.get().await?;
    if let Some(parent_id) = changes.parent_id {
        let parents: HashMap<Uuid, Option<Uuid>> = categories::table
            .filter(categories::deleted_at.is_null())
            .select((categories::id, categories::parent_id))
            .load::<(Uuid, Option<Uuid>)>(&mut conn)
            .await?
            .into_iter()
            .collect();
        if would_create_cycle(&parents, id, parent_id) {
            return Err(ApiError::BadRequest(
                "a category cannot be nested under itself or its descendants".to_string(),
            ));
        }
    }
    let category = diesel::update(categories::table.find(id).filter(categories::deleted_at.is_null()))
        .set(&changes)
        .returning(Category::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("category"))?;
    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    let deleted = diesel::update(categories::table.find(id).filter(categories::deleted_at.is_null()))
        .set(categories::deleted_at.eq(Some(Utc::now())))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("category"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Brands ============

async fn load_brands(conn: &mut AsyncPgConnection, include_inactive: bool) -> ApiResult<Vec<Brand>> {
    let mut query = brands::table.filter(brands::deleted_at.is_null()).into_boxed::<Pg>();
    if !include_inactive {
        query = query.filter(brands::is_active.eq(true));
    }

    let brands = query
        .order(brands::name.asc())
        .select(Brand::as_select())
        .load(conn)
        .await?;
    Ok(brands)
}

pub async fn list_brands(State(state): State<AppState>) -> ApiResult<Json<Vec<Brand>>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(load_brands(&mut conn, false).await?))
}

pub async fn admin_list_brands(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<Brand>>> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    Ok(Json(load_brands(&mut conn, true).await?))
}

pub async fn get_brand(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Brand>> {
    let mut conn = state.pool.get().await?;
    let brand = brands::table
        .find(id)
        .filter(brands::deleted_at.is_null())
        .filter(brands::is_active.eq(true))
        .select(Brand::as_select())
        .first(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("brand"))?;
    Ok(Json(brand))
}

#[derive(Debug, Deserialize)]
pub struct BrandInput {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn create_brand(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<BrandInput>,
) -> ApiResult<(StatusCode, Json<Brand>)> {
    caller.require(Permission::ManageCatalog)?;
    let name = required("name", &input.name)?;
    let new_brand = NewBrand {
        id: Uuid::new_v4(),
        slug: resolve_slug(&name, input.slug.as_deref())?,
        name,
        description: input.description,
        logo_url: input.logo_url,
        is_active: input.is_active.unwrap_or(true),
    };

    let mut conn = state.pool.get().await?;
    let brand = diesel::insert_into(brands::table)
        .values(&new_brand)
        .returning(Brand::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(brand)))
}

pub async fn update_brand(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(mut changes): Json<BrandChanges>,
) -> ApiResult<Json<Brand>> {
    caller.require(Permission::ManageCatalog)?;
    if let Some(slug) = changes.slug.take() {
        changes.slug = Some(resolve_slug(&slug, None)?);
    }

    let mut conn = state.pool.get().await?;
    let brand = diesel::update(brands::table.find(id).filter(brands::deleted_at.is_null()))
        .set(&changes)
        .returning(Brand::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("brand"))?;
    Ok(Json(brand))
}

pub async fn delete_brand(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    let deleted = diesel::update(brands::table.find(id).filter(brands::deleted_at.is_null()))
        .set(brands::deleted_at.eq(Some(Utc::now())))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("brand"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Price groups ============

pub async fn list_price_groups(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<PriceGroup>>> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    let groups = price_groups::table
        .filter(price_groups::deleted_at.is_null())
        .order(price_groups::name.asc())
        .select(PriceGroup::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(groups))
}

#[derive(Debug, Deserialize)]
pub struct PriceGroupInput {
    pub name: String,
    pub description: Option<String>,
    pub price: BigDecimal,
}

pub async fn create_price_group(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<PriceGroupInput>,
) -> ApiResult<(StatusCode, Json<PriceGroup>)> {
    caller.require(Permission::ManageCatalog)?;
    let new_group = NewPriceGroup {
        id: Uuid::new_v4(),
        name: required("name", &input.name)?,
        description: input.description,
        price: round_money(&input.price),
    };

    let mut conn = state.pool.get().await?;
    let group = diesel::insert_into(price_groups::table)
        .values(&new_group)
        .returning(PriceGroup::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update_price_group(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(changes): Json<PriceGroupChanges>,
) -> ApiResult<Json<PriceGroup>> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    let group = diesel::update(price_groups::table.find(id).filter(price_groups::deleted_at.is_null()))
        .set(&changes)
        .returning(PriceGroup::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("price group"))?;
    Ok(Json(group))
}

pub async fn delete_price_group(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    let deleted = diesel::update(price_groups::table.find(id).filter(price_groups::deleted_at.is_null()))
        .set(price_groups::deleted_at.eq(Some(Utc::now())))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("price group"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Products ============

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub search: Option<String>,
    pub featured: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ProductQuery {
    fn page_request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            per_page: self.per_page,
        }
    }

    fn filtered(&self, include_inactive: bool) -> products::BoxedQuery<'static, Pg> {
        let mut query = products::table
            .filter(products::deleted_at.is_null())
            .into_boxed();
        if !include_inactive {
            query = query.filter(products::is_active.eq(true));
        }
        if let Some(category_id) = self.category_id {
            query = query.filter(products::category_id.eq(category_id));
        }
        if let Some(brand_id) = self.brand_id {
            query = query.filter(products::brand_id.eq(brand_id));
        }
        if let Some(featured) = self.featured {
            query = query.filter(products::is_featured.eq(featured));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(products::name.ilike(format!("%{}%", search)));
        }
        query
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub selling_price: BigDecimal,
}

async fn with_selling_prices(conn: &mut AsyncPgConnection, products: Vec<Product>) -> ApiResult<Vec<ProductView>> {
    let group_ids: Vec<Uuid> = products.iter().filter_map(|p| p.price_group_id).collect();
    let group_prices: HashMap<Uuid, BigDecimal> = if group_ids.is_empty() {
        HashMap::new()
    } else {
        price_groups::table
            .filter(price_groups::id.eq_any(&group_ids))
            .filter(price_groups::deleted_at.is_null())
            .select((price_groups::id, price_groups::price))
            .load::<(Uuid, BigDecimal)>(conn)
            .await?
            .into_iter()
            .collect()
    };

    Ok(products
        .into_iter()
        .map(|product| {
            let group_price = product.price_group_id.and_then(|id| group_prices.get(&id));
            ProductView {
                selling_price: effective_price(&product.price, group_price),
                product,
            }
        })
        .collect())
}

async fn search_products(
    conn: &mut AsyncPgConnection,
    query: &ProductQuery,
    include_inactive: bool,
) -> ApiResult<Page<ProductView>> {
    let page = query.page_request();
    let total = query
        .filtered(include_inactive)
        .count()
        .get_result::<i64>(conn)
        .await?;
    let products = query
        .filtered(include_inactive)
        .order((products::is_featured.desc(), products::created_at.desc()))
        .limit(page.limit())
        .offset(page.offset())
        .select(Product::as_select())
        .load(conn)
        .await?;

    let views = with_selling_prices(conn, products).await?;
    Ok(Page::new(views, page, total))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> ApiResult<Json<Page<ProductView>>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(search_products(&mut conn, &query, false).await?))
}

pub async fn admin_list_products(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ProductQuery>,
) -> ApiResult<Json<Page<ProductView>>> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    Ok(Json(search_products(&mut conn, &query, true).await?))
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductMediaView {
    #[serde(flatten)]
    pub media: MediaItem,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingSummary {
    pub average: Option<BigDecimal>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: ProductView,
    pub media: Vec<ProductMediaView>,
    pub rating: RatingSummary,
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ProductDetail>> {
    let mut conn = state.pool.get().await?;
    let product = products::table
        .find(id)
        .filter(products::deleted_at.is_null())
        .filter(products::is_active.eq(true))
        .select(Product::as_select())
        .first(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("product"))?;

    let media = product_media::table
        .inner_join(media_items::table)
        .filter(product_media::product_id.eq(id))
        .filter(media_items::deleted_at.is_null())
        .order(product_media::position.asc())
        .select((MediaItem::as_select(), product_media::position))
        .load::<(MediaItem, i32)>(&mut conn)
        .await?
        .into_iter()
        .map(|(media, position)| ProductMediaView { media, position })
        .collect();

    let (average, count) = reviews::table
        .filter(reviews::product_id.eq(id))
        .filter(reviews::is_approved.eq(true))
        .filter(reviews::deleted_at.is_null())
        .select((diesel::dsl::avg(reviews::rating), diesel::dsl::count_star()))
        .get_result::<(Option<BigDecimal>, i64)>(&mut conn)
        .await?;

    let mut views = with_selling_prices(&mut conn, vec![product]).await?;
    let product = views.pop().ok_or(ApiError::NotFound("product"))?;

    Ok(Json(ProductDetail {
        product,
        media,
        rating: RatingSummary {
            average: average.map(|avg| avg.round(2)),
            count,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ProductInput {
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price_group_id: Option<Uuid>,
    pub name: String,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: BigDecimal,
    #[serde(default)]
    pub stock: i32,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_featured: bool,
}

pub async fn create_product(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<ProductInput>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    caller.require(Permission::ManageCatalog)?;
    let name = required("name", &input.name)?;
    if input.stock < 0 {
        return Err(ApiError::BadRequest("stock cannot be negative".to_string()));
    }

    let new_product = NewProduct {
        id: Uuid::new_v4(),
        category_id: input.category_id,
        brand_id: input.brand_id,
        price_group_id: input.price_group_id,
        slug: resolve_slug(&name, input.slug.as_deref())?,
        name,
        sku: input.sku.map(|sku| sku.trim().to_uppercase()).filter(|sku| !sku.is_empty()),
        description: input.description,
        price: round_money(&input.price),
        stock: input.stock,
        is_active: input.is_active.unwrap_or(true),
        is_featured: input.is_featured,
    };

    let mut conn = state.pool.get().await?;
    let product = diesel::insert_into(products::table)
        .values(&new_product)
        .returning(Product::as_returning())
        .get_result(&mut conn)
        .await?;
    tracing::info!("Product {} created by {}", product.id, caller.user_id);
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(mut changes): Json<ProductChanges>,
) -> ApiResult<Json<Product>> {
    caller.require(Permission::ManageCatalog)?;
    if matches!(changes.stock, Some(stock) if stock < 0) {
        return Err(ApiError::BadRequest("stock cannot be negative".to_string()));
    }
    if let Some(slug) = changes.slug.take() {
        changes.slug = Some(resolve_slug(&slug, None)?);
    }
    changes.price = changes.price.as_ref().map(round_money);

    let mut conn = state.pool.get().await?;
    let product = diesel::update(products::table.find(id).filter(products::deleted_at.is_null()))
        .set(&changes)
        .returning(Product::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("product"))?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    let deleted = diesel::update(products::table.find(id).filter(products::deleted_at.is_null()))
        .set(products::deleted_at.eq(Some(Utc::now())))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("product"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AttachMedia {
    pub media_id: Uuid,
    #[serde(default)]
    pub position: i32,
}

/// Links a media item to a product, or moves it if already linked.
pub async fn attach_product_media(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(input): Json<AttachMedia>,
) -> ApiResult<(StatusCode, Json<ProductMedia>)> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;

    let media_exists = media_items::table
        .find(input.media_id)
        .filter(media_items::deleted_at.is_null())
        .select(media_items::id)
        .first::<Uuid>(&mut conn)
        .await
        .optional()?;
    if media_exists.is_none() {
        return Err(ApiError::NotFound("media item"));
    }

    let link = ProductMedia {
        product_id: id,
        media_id: input.media_id,
        position: input.position,
    };
    let link = diesel::insert_into(product_media::table)
        .values(&link)
        .on_conflict((product_media::product_id, product_media::media_id))
        .do_update()
        .set(product_media::position.eq(input.position))
        .returning(ProductMedia::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn detach_product_media(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, media_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::ManageCatalog)?;
    let mut conn = state.pool.get().await?;
    let removed = diesel::delete(
        product_media::table
            .filter(product_media::product_id.eq(id))
            .filter(product_media::media_id.eq(media_id)),
    )
    .execute(&mut conn)
    .await?;
    if removed == 0 {
        return Err(ApiError::NotFound("product media"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_query_defaults_to_first_page() {
        let query: ProductQuery = serde_json::from_str(r#"{"search": "mint"}"#).unwrap();
        let page = query.page_request();
        assert_eq!((page.page(), page.per_page()), (1, DEFAULT_PER_PAGE));
    }

    #[test]
    fn product_filters_render_as_sql() {
        let query = ProductQuery {
            brand_id: Some(Uuid::nil()),
            search: Some("  ".to_string()),
            featured: Some(true),
            ..ProductQuery::default()
        };
        let sql = diesel::debug_query::<Pg, _>(&query.filtered(false)).to_string();
        assert!(sql.contains("\"products\".\"deleted_at\" IS NULL"));
        assert!(sql.contains("\"products\".\"is_active\" ="));
        assert!(sql.contains("\"products\".\"brand_id\" ="));
        assert!(sql.contains("\"products\".\"is_featured\" ="));
        assert!(!sql.contains("ILIKE"));

        let admin_sql = diesel::debug_query::<Pg, _>(&ProductQuery::default().filtered(true)).to_string();
        assert!(!admin_sql.contains("is_active"));
    }
}
