//! Order workflow: carts, checkout, status changes and item edits.
//!
//! Every mutation that touches order items recalculates the order totals in
//! the same transaction, and orders past the cart stage get an outbox event
//! written alongside the change.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::discounts::load_scope;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::outbox;
use crate::schema::*;

/// Items that count towards an order's totals.
fn live_items_of(
    order_id: Uuid,
) -> diesel::dsl::And<diesel::dsl::Eq<order_items::order_id, Uuid>, diesel::dsl::IsNull<order_items::deleted_at>> {
    order_items::order_id.eq(order_id).and(order_items::deleted_at.is_null())
}

/// The discount an order was placed with. Soft-deleting a discount stops new
/// redemptions but must not change what existing orders owe.
fn order_discount(discount_id: Uuid) -> diesel::dsl::Find<discounts::table, Uuid> {
    discounts::table.find(discount_id)
}

pub async fn order_with_items(conn: &mut AsyncPgConnection, order: Order) -> ApiResult<OrderWithItems> {
    let items = order_items::table
        .filter(live_items_of(order.id))
        .order(order_items::created_at.asc())
        .select(OrderItem::as_select())
        .load(conn)
        .await?;

    Ok(OrderWithItems {
        amount_due: &order.total_amount - &order.discount_amount,
        order,
        items,
    })
}

async fn load_live_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> ApiResult<Order> {
    orders::table
        .find(order_id)
        .filter(orders::deleted_at.is_null())
        .select(Order::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("order"))
}

/// Non-deleted items of an order with the catalog attributes discounts match on.
pub async fn load_line_items(conn: &mut AsyncPgConnection, order_id: Uuid) -> ApiResult<Vec<LineItem>> {
    let rows = order_items::table
        .inner_join(products::table)
        .filter(live_items_of(order_id))
        .select((
            order_items::product_id,
            products::brand_id,
            products::category_id,
            order_items::quantity,
            order_items::unit_price,
        ))
        .load::<(Uuid, Option<Uuid>, Option<Uuid>, i32, BigDecimal)>(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(product_id, brand_id, category_id, quantity, unit_price)| LineItem {
            product_id,
            brand_id,
            category_id,
            quantity,
            unit_price,
        })
        .collect())
}

/// Re-reads the order's live items and overwrites its denormalized totals.
pub async fn recalculate_order_totals(conn: &mut AsyncPgConnection, order_id: Uuid) -> ApiResult<Order> {
    let order = load_live_order(conn, order_id).await?;
    let items = load_line_items(conn, order_id).await?;

    let discount = match order.discount_id {
        Some(discount_id) => order_discount(discount_id)
            .select(Discount::as_select())
            .first(conn)
            .await
            .optional()?,
        None => None,
    };

    let totals = match discount {
        Some(discount) => {
            let rule = DiscountRule::try_from(&discount)?;
            let scope = load_scope(conn, &discount).await?;
            OrderTotals::compute(&items, Some(AppliedDiscount { rule: &rule, scope: &scope }))?
        }
        None => OrderTotals::compute(&items, None)?,
    };

    let order = diesel::update(orders::table.find(order_id))
        .set((
            orders::total_amount.eq(&totals.subtotal),
            orders::discount_amount.eq(&totals.discount_amount),
            orders::total_items.eq(totals.total_items),
        ))
        .returning(Order::as_returning())
        .get_result(conn)
        .await?;

    Ok(order)
}

/// Carts change freely before checkout and publish nothing.
fn items_changed_event(order: &Order) -> ApiResult<Option<OrderEvent>> {
    if order.status()?.is_cart() {
        return Ok(None);
    }
    Ok(Some(OrderEvent::OrderItemsChanged {
        order_id: order.id,
        total_amount: order.total_amount.clone(),
        total_items: order.total_items,
    }))
}

async fn record_items_changed(conn: &mut AsyncPgConnection, order: &Order) -> ApiResult<()> {
    match items_changed_event(order)? {
        Some(event) => outbox::enqueue(conn, &event).await,
        None => Ok(()),
    }
}

/// An order is stamped as placed the first time it leaves the cart.
fn placed_at_after(
    placed_at: Option<DateTime<Utc>>,
    next: OrderStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match placed_at {
        None if !next.is_cart() => Some(now),
        placed_at => placed_at,
    }
}

/// Sets any status on an order. Transitions off the documented flow are
/// allowed for staff but logged.
pub async fn update_order_status(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    new_status: OrderStatus,
    changed_by: Uuid,
) -> ApiResult<Order> {
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let order = load_live_order(conn, order_id).await?;
            let current = order.status()?;
            if current == new_status {
                return Ok(order);
            }
            if !current.follows_flow(new_status) {
                warn!(
                    "Order {} moved off the documented flow: {} -> {}",
                    order_id, current, new_status
                );
            }

            let placed_at = placed_at_after(order.placed_at, new_status, Utc::now());

            let updated = diesel::update(orders::table.find(order_id))
                .set((
                    orders::status.eq(new_status.as_str()),
                    orders::placed_at.eq(placed_at),
                ))
                .returning(Order::as_returning())
                .get_result(conn)
                .await?;

            outbox::enqueue(
                conn,
                &OrderEvent::OrderStatusChanged {
                    order_id,
                    from: current,
                    to: new_status,
                    changed_by,
                },
            )
            .await?;

            info!("Order {} status {} -> {}", order_id, current, new_status);
            Ok(updated)
        })
    })
    .await
}

pub async fn update_order_item_quantity(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    item_id: Uuid,
    quantity: i32,
) -> ApiResult<Order> {
    if quantity <= 0 {
        return Err(ApiError::BadRequest("quantity must be at least 1".to_string()));
    }

    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            load_live_order(conn, order_id).await?;

            let changed = diesel::update(
                order_items::table
                    .filter(order_items::id.eq(item_id))
                    .filter(order_items::order_id.eq(order_id))
                    .filter(order_items::deleted_at.is_null()),
            )
            .set(order_items::quantity.eq(quantity))
            .execute(conn)
            .await?;
            if changed == 0 {
                return Err(ApiError::NotFound("order item"));
            }

            let order = recalculate_order_totals(conn, order_id).await?;
            record_items_changed(conn, &order).await?;
            Ok(order)
        })
    })
    .await
}

pub async fn remove_order_item(conn: &mut AsyncPgConnection, order_id: Uuid, item_id: Uuid) -> ApiResult<Order> {
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            load_live_order(conn, order_id).await?;

            let removed = diesel::update(
                order_items::table
                    .filter(order_items::id.eq(item_id))
                    .filter(order_items::order_id.eq(order_id))
                    .filter(order_items::deleted_at.is_null()),
            )
            .set(order_items::deleted_at.eq(Some(Utc::now())))
            .execute(conn)
            .await?;
            if removed == 0 {
                return Err(ApiError::NotFound("order item"));
            }

            let order = recalculate_order_totals(conn, order_id).await?;
            record_items_changed(conn, &order).await?;
            Ok(order)
        })
    })
    .await
}

pub async fn find_cart(conn: &mut AsyncPgConnection, user_id: Uuid) -> ApiResult<Option<Order>> {
    let cart = orders::table
        .filter(orders::user_id.eq(user_id))
        .filter(orders::status.eq(OrderStatus::InCart.as_str()))
        .filter(orders::deleted_at.is_null())
        .select(Order::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(cart)
}

pub async fn get_or_create_cart(conn: &mut AsyncPgConnection, user_id: Uuid) -> ApiResult<Order> {
    if let Some(cart) = find_cart(conn, user_id).await? {
        return Ok(cart);
    }

    // a concurrent request may create the cart first; the partial unique index keeps one
    diesel::insert_into(orders::table)
        .values(&NewOrder {
            id: Uuid::new_v4(),
            user_id,
            status: OrderStatus::InCart.as_str().to_string(),
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    find_cart(conn, user_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("cart for user {} vanished after insert", user_id)))
}

/// Current selling price of a live, active product.
async fn current_price(conn: &mut AsyncPgConnection, product_id: Uuid) -> ApiResult<(Product, BigDecimal)> {
    let product = products::table
        .find(product_id)
        .filter(products::deleted_at.is_null())
        .filter(products::is_active.eq(true))
        .select(Product::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("product"))?;

    let group_price = match product.price_group_id {
        Some(group_id) => price_groups::table
            .find(group_id)
            .filter(price_groups::deleted_at.is_null())
            .select(price_groups::price)
            .first::<BigDecimal>(conn)
            .await
            .optional()?,
        None => None,
    };

    let price = effective_price(&product.price, group_price.as_ref());
    Ok((product, price))
}

/// Adds a product to the caller's cart, or bumps the quantity of the line
/// already holding it. The line's unit price follows the current price.
pub async fn add_cart_item(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> ApiResult<Order> {
    if quantity <= 0 {
        return Err(ApiError::BadRequest("quantity must be at least 1".to_string()));
    }

    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let cart = get_or_create_cart(conn, user_id).await?;
            let (_, unit_price) = current_price(conn, product_id).await?;

            let existing = order_items::table
                .filter(order_items::order_id.eq(cart.id))
                .filter(order_items::product_id.eq(product_id))
                .filter(order_items::deleted_at.is_null())
                .select(OrderItem::as_select())
                .first(conn)
                .await
                .optional()?;

            match existing {
                Some(item) => {
                    let quantity = add_quantity(item.quantity, quantity)?;
                    diesel::update(order_items::table.find(item.id))
                        .set((
                            order_items::quantity.eq(quantity),
                            order_items::unit_price.eq(&unit_price),
                        ))
                        .execute(conn)
                        .await?;
                }
                None => {
                    diesel::insert_into(order_items::table)
                        .values(&NewOrderItem {
                            id: Uuid::new_v4(),
                            order_id: cart.id,
                            product_id,
                            quantity,
                            unit_price,
                        })
                        .execute(conn)
                        .await?;
                }
            }

            recalculate_order_totals(conn, cart.id).await
        })
    })
    .await
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub address_id: Uuid,
    pub discount_code: Option<String>,
    pub notes: Option<String>,
}

/// Places the caller's cart: reserves stock, redeems the discount and moves
/// the order to `placed`, all or nothing.
pub async fn checkout(conn: &mut AsyncPgConnection, user_id: Uuid, request: Checkout) -> ApiResult<Order> {
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let cart = find_cart(conn, user_id).await?.ok_or(ApiError::NotFound("cart"))?;
            let cart = load_live_order(conn, cart.id).await?;

            let items = load_line_items(conn, cart.id).await?;
            if items.is_empty() {
                return Err(ApiError::BadRequest("cart is empty".to_string()));
            }

            let address_exists = addresses::table
                .filter(addresses::id.eq(request.address_id))
                .filter(addresses::user_id.eq(user_id))
                .filter(addresses::deleted_at.is_null())
                .select(addresses::id)
                .first::<Uuid>(conn)
                .await
                .optional()?;
            if address_exists.is_none() {
                return Err(ApiError::NotFound("address"));
            }

            let discount_id = match &request.discount_code {
                Some(code) => Some(redeem_discount(conn, code, &items).await?),
                None => None,
            };

            for item in &items {
                let reserved = diesel::update(
                    products::table
                        .filter(products::id.eq(item.product_id))
                        .filter(products::deleted_at.is_null())
                        .filter(products::stock.ge(item.quantity)),
                )
                .set(products::stock.eq(products::stock - item.quantity))
                .execute(conn)
                .await?;
                if reserved == 0 {
                    return Err(ApiError::Conflict(format!(
                        "insufficient stock for product {}",
                        item.product_id
                    )));
                }
            }

            let placed_at = Utc::now();
            diesel::update(orders::table.find(cart.id))
                .set((
                    orders::status.eq(OrderStatus::Placed.as_str()),
                    orders::address_id.eq(Some(request.address_id)),
                    orders::discount_id.eq(discount_id),
                    orders::notes.eq(request.notes),
                    orders::placed_at.eq(Some(placed_at)),
                ))
                .execute(conn)
                .await?;

            let order = recalculate_order_totals(conn, cart.id).await?;

            outbox::enqueue(
                conn,
                &OrderEvent::OrderPlaced {
                    order_id: order.id,
                    user_id,
                    total_amount: order.total_amount.clone(),
                    discount_amount: order.discount_amount.clone(),
                    total_items: order.total_items,
                    placed_at,
                },
            )
            .await?;

            info!("Order {} placed by user {}", order.id, user_id);
            Ok(order)
        })
    })
    .await
}

/// Validates `code` against the cart and counts one use of it.
async fn redeem_discount(conn: &mut AsyncPgConnection, code: &str, items: &[LineItem]) -> ApiResult<Uuid> {
    let code = normalize_code(code)?;
    let discount = discounts::table
        .filter(discounts::code.eq(&code))
        .filter(discounts::deleted_at.is_null())
        .select(Discount::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or(ApiError::NotFound("discount"))?;

    let rule = DiscountRule::try_from(&discount)?;
    let scope = load_scope(conn, &discount).await?;
    let totals = OrderTotals::compute(items, None)?;
    rule.check_redeemable(Utc::now(), &totals.subtotal)?;

    if !items.iter().any(|item| scope.covers(item)) {
        return Err(ApiError::BadRequest(
            "discount does not apply to any item in the cart".to_string(),
        ));
    }

    let claimed = diesel::update(
        discounts::table
            .filter(discounts::id.eq(discount.id))
            .filter(discounts::max_uses.is_null().or(discounts::used_count.lt(discounts::max_uses.assume_not_null()))),
    )
    .set(discounts::used_count.eq(discounts::used_count + 1))
    .execute(conn)
    .await?;
    if claimed == 0 {
        return Err(DiscountError::UsageExhausted.into());
    }

    Ok(discount.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use diesel::pg::Pg;

    fn order(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            address_id: None,
            discount_id: None,
            status: status.as_str().to_string(),
            total_amount: BigDecimal::from(90),
            discount_amount: BigDecimal::from(0),
            total_items: 3,
            notes: None,
            placed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn totals_only_read_live_items() {
        let query = order_items::table.filter(live_items_of(Uuid::nil()));
        let sql = diesel::debug_query::<Pg, _>(&query).to_string();
        assert!(sql.contains("\"order_items\".\"order_id\" ="));
        assert!(sql.contains("\"order_items\".\"deleted_at\" IS NULL"));
    }

    #[test]
    fn placed_orders_keep_a_soft_deleted_discount() {
        let sql = diesel::debug_query::<Pg, _>(&order_discount(Uuid::nil())).to_string();
        assert!(sql.contains("\"discounts\".\"id\" ="));
        assert!(!sql.contains("deleted_at"));
    }

    #[test]
    fn placed_at_is_stamped_once_when_leaving_the_cart() {
        let now = Utc::now();
        assert_eq!(placed_at_after(None, OrderStatus::InCart, now), None);
        assert_eq!(placed_at_after(None, OrderStatus::Placed, now), Some(now));
        assert_eq!(placed_at_after(None, OrderStatus::Shipped, now), Some(now));

        let earlier = now - Duration::days(2);
        assert_eq!(placed_at_after(Some(earlier), OrderStatus::Delivered, now), Some(earlier));
        assert_eq!(placed_at_after(Some(earlier), OrderStatus::InCart, now), Some(earlier));
    }

    #[test]
    fn cart_edits_publish_no_event() {
        assert!(items_changed_event(&order(OrderStatus::InCart)).unwrap().is_none());

        let placed = order(OrderStatus::Confirmed);
        match items_changed_event(&placed).unwrap() {
            Some(OrderEvent::OrderItemsChanged { order_id, total_items, .. }) => {
                assert_eq!(order_id, placed.id);
                assert_eq!(total_items, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn unknown_status_is_reported() {
        let mut broken = order(OrderStatus::Placed);
        broken.status = "lost".to_string();
        assert!(matches!(items_changed_event(&broken), Err(ApiError::BadRequest(_))));
    }
}
