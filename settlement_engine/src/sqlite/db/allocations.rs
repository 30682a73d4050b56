use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db_types::{
        Allocation,
        AllocationStatus,
        EscrowMovement,
        MovementKind,
        NewMovement,
        NewShipment,
        OrderId,
        SellerId,
        Shipment,
    },
    traits::{AllocationChange, NewAllocation},
};

pub async fn insert_allocation(
    escrow_id: i64,
    order_id: &OrderId,
    allocation: &NewAllocation,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Allocation, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO escrow_allocations (
                escrow_id,
                order_id,
                seller_id,
                category_id,
                contribution,
                amount,
                status,
                version,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $8)
            RETURNING *;
        "#,
    )
    .bind(escrow_id)
    .bind(order_id.as_str())
    .bind(allocation.seller_id.as_str())
    .bind(allocation.category_id.as_ref().map(|c| c.as_str()))
    .bind(allocation.contribution.value())
    .bind(allocation.amount.value())
    .bind(AllocationStatus::Pending.to_string())
    .bind(at)
    .fetch_one(conn)
    .await
}

pub async fn fetch_allocation(id: i64, conn: &mut SqliteConnection) -> Result<Option<Allocation>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM escrow_allocations WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_allocations_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Allocation>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM escrow_allocations WHERE order_id = $1 ORDER BY seller_id")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await
}

pub async fn fetch_allocations_for_escrow(
    escrow_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Allocation>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM escrow_allocations WHERE escrow_id = $1 ORDER BY seller_id")
        .bind(escrow_id)
        .fetch_all(conn)
        .await
}

pub async fn fetch_allocation_for_seller(
    order_id: &OrderId,
    seller_id: &SellerId,
    conn: &mut SqliteConnection,
) -> Result<Option<Allocation>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM escrow_allocations WHERE order_id = $1 AND seller_id = $2")
        .bind(order_id.as_str())
        .bind(seller_id.as_str())
        .fetch_optional(conn)
        .await
}

/// `Held` allocations whose hold has run out by `now` and that have no open dispute, earliest deadline first.
///
/// Timestamps are compared with `julianday` so that differing sub-second precision in the stored text does not
/// matter.
pub async fn fetch_due_for_release(
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Allocation>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM escrow_allocations a
            WHERE a.status = $1
              AND a.hold_until IS NOT NULL
              AND julianday(a.hold_until) <= julianday($2)
              AND NOT EXISTS (SELECT 1 FROM disputes d WHERE d.allocation_id = a.id AND d.status = 'Open')
            ORDER BY julianday(a.hold_until) ASC, a.id ASC
            LIMIT $3
        "#,
    )
    .bind(AllocationStatus::Held.to_string())
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await
}

/// Applies a planned change as a compare-and-swap on the allocation's version and status. Returns `None` if the
/// allocation has moved on since the change was planned.
pub async fn apply_change(
    change: &AllocationChange,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Allocation>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE escrow_allocations SET
                status = $1,
                hold_until = $2,
                shipped_at = $3,
                delivery_confirmed_at = $4,
                released_amount = released_amount + $5,
                refunded_amount = refunded_amount + $6,
                version = version + 1,
                updated_at = $7
            WHERE id = $8 AND version = $9 AND status = $10
            RETURNING *;
        "#,
    )
    .bind(change.to.to_string())
    .bind(change.hold_until)
    .bind(change.shipped_at)
    .bind(change.delivery_confirmed_at)
    .bind(change.moved(MovementKind::Release).value())
    .bind(change.moved(MovementKind::Refund).value())
    .bind(at)
    .bind(change.allocation_id)
    .bind(change.expected_version)
    .bind(change.from.to_string())
    .fetch_optional(conn)
    .await
}

pub async fn insert_movement(
    allocation_id: i64,
    movement: &NewMovement,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<EscrowMovement, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO escrow_movements (allocation_id, kind, amount, reference, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(allocation_id)
    .bind(movement.kind.to_string())
    .bind(movement.amount.value())
    .bind(&movement.reference)
    .bind(at)
    .fetch_one(conn)
    .await
}

pub async fn fetch_movements(
    allocation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<EscrowMovement>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM escrow_movements WHERE allocation_id = $1 ORDER BY id")
        .bind(allocation_id)
        .fetch_all(conn)
        .await
}

pub async fn insert_shipment(
    shipment: &NewShipment,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Shipment, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO shipments (
                allocation_id,
                tracking_number,
                carrier,
                shipped_at,
                delivered_at,
                destination_postal_code,
                origin_country,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(shipment.allocation_id)
    .bind(&shipment.tracking_number)
    .bind(&shipment.carrier)
    .bind(shipment.shipped_at)
    .bind(shipment.delivered_at)
    .bind(&shipment.destination_postal_code)
    .bind(&shipment.origin_country)
    .bind(at)
    .fetch_one(conn)
    .await
}

pub async fn fetch_shipments(allocation_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Shipment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM shipments WHERE allocation_id = $1 ORDER BY id")
        .bind(allocation_id)
        .fetch_all(conn)
        .await
}
