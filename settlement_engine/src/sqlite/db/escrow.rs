use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db_types::{Commission, EscrowStatusType, EscrowTransaction, OrderId},
    traits::{NewCommission, NewEscrow},
};

pub async fn insert_escrow(escrow: &NewEscrow, conn: &mut SqliteConnection) -> Result<EscrowTransaction, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO escrow_transactions (
                order_id,
                capture_reference,
                total_amount,
                currency,
                status,
                version,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, 0, $6, $6)
            RETURNING *;
        "#,
    )
    .bind(escrow.order_id.as_str())
    .bind(&escrow.capture_reference)
    .bind(escrow.total_amount.value())
    .bind(&escrow.currency)
    .bind(EscrowStatusType::Open.to_string())
    .bind(escrow.created_at)
    .fetch_one(conn)
    .await
}

pub async fn insert_commission(
    allocation_id: i64,
    commission: &NewCommission,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Commission, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO commissions (allocation_id, rule_id, rate, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(allocation_id)
    .bind(commission.rule_id)
    .bind(commission.rate.ppm())
    .bind(commission.amount.value())
    .bind(at)
    .fetch_one(conn)
    .await
}

pub async fn fetch_commission(allocation_id: i64, conn: &mut SqliteConnection) -> Result<Option<Commission>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM commissions WHERE allocation_id = $1").bind(allocation_id).fetch_optional(conn).await
}

pub async fn fetch_escrow_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM escrow_transactions WHERE order_id = $1")
        .bind(order_id.as_str())
        .fetch_optional(conn)
        .await
}

pub async fn fetch_escrow(escrow_id: i64, conn: &mut SqliteConnection) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM escrow_transactions WHERE id = $1").bind(escrow_id).fetch_optional(conn).await
}

/// Compare-and-swap on the escrow version. Returns `None` if the escrow is no longer at `expected_version`.
pub async fn bump_version(
    escrow_id: i64,
    expected_version: i64,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE escrow_transactions SET version = version + 1, updated_at = $1
            WHERE id = $2 AND version = $3
            RETURNING *;
        "#,
    )
    .bind(at)
    .bind(escrow_id)
    .bind(expected_version)
    .fetch_optional(conn)
    .await
}

pub async fn mark_settled(
    escrow_id: i64,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<EscrowTransaction, sqlx::Error> {
    sqlx::query_as("UPDATE escrow_transactions SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(EscrowStatusType::Settled.to_string())
        .bind(at)
        .bind(escrow_id)
        .fetch_one(conn)
        .await
}
