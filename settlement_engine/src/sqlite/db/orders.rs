use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrder, NewOrderItem, Order, OrderId, OrderItem, OrderStatusType},
    traits::SettlementError,
    validation::ValidationErrors,
};

/// Inserts the order and its items, returning `false` in the second parameter if the order already exists. An
/// existing order is returned as stored; the new copy is ignored.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), SettlementError> {
    if let Some(existing) = fetch_order_by_order_id(&order.order_id, conn).await? {
        trace!("🗃️ Order {} already exists with id {}", existing.order_id, existing.id);
        return Ok((existing, false));
    }
    let stored = insert_order(&order, conn).await?;
    for item in &order.items {
        insert_item(&order.order_id, item, conn).await?;
    }
    debug!("🗃️ Order {} inserted with id {} and {} items", stored.order_id, stored.id, order.items.len());
    Ok((stored, true))
}

/// Inserts the order row. This is not atomic with the items; embed the call in a transaction.
async fn insert_order(order: &NewOrder, conn: &mut SqliteConnection) -> Result<Order, SettlementError> {
    let too_large = || ValidationErrors::single("total", "the cart total is too large");
    let subtotal = order.subtotal().ok_or_else(too_large)?;
    let total = order.total().ok_or_else(too_large)?;
    let stored = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                customer_id,
                subtotal,
                shipping,
                tax,
                discount,
                total,
                currency,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *;
        "#,
    )
    .bind(order.order_id.as_str())
    .bind(&order.customer_id)
    .bind(subtotal.value())
    .bind(order.shipping.value())
    .bind(order.tax.value())
    .bind(order.discount.value())
    .bind(total.value())
    .bind(&order.currency)
    .bind(OrderStatusType::New.to_string())
    .bind(order.created_at)
    .fetch_one(conn)
    .await?;
    Ok(stored)
}

async fn insert_item(
    order_id: &OrderId,
    item: &NewOrderItem,
    conn: &mut SqliteConnection,
) -> Result<OrderItem, SettlementError> {
    let line_total = item
        .line_total()
        .ok_or_else(|| ValidationErrors::single("items", format!("The line total for {} is too large", item.product_id)))?;
    let item = sqlx::query_as(
        r#"
            INSERT INTO order_items (
                order_id,
                product_id,
                variant_id,
                seller_id,
                category_id,
                quantity,
                unit_price,
                line_total
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(order_id.as_str())
    .bind(&item.product_id)
    .bind(&item.variant_id)
    .bind(item.seller_id.as_str())
    .bind(item.category_id.as_ref().map(|c| c.as_str()))
    .bind(item.quantity)
    .bind(item.unit_price.value())
    .bind(line_total.value())
    .fetch_one(conn)
    .await?;
    Ok(item)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await
}

pub async fn fetch_order_items(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<OrderItem>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await
}

pub async fn update_order_status(
    order_id: &OrderId,
    status: OrderStatusType,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    let result: Option<Order> =
        sqlx::query_as("UPDATE orders SET status = $1, updated_at = $2 WHERE order_id = $3 RETURNING *")
            .bind(status.to_string())
            .bind(at)
            .bind(order_id.as_str())
            .fetch_optional(conn)
            .await?;
    result.ok_or_else(|| SettlementError::OrderNotFound(order_id.clone()))
}
