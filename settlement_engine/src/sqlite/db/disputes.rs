use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db_types::{Dispute, DisputeResolution, DisputeStatus, NewDispute},
    traits::SettlementError,
};

/// Opens a dispute. The partial unique index on open disputes turns a second open dispute for the same allocation
/// into [`SettlementError::DuplicateDispute`].
pub async fn insert_dispute(
    dispute: &NewDispute,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Dispute, SettlementError> {
    sqlx::query_as(
        r#"
            INSERT INTO disputes (allocation_id, reason, opened_by, status, opened_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(dispute.allocation_id)
    .bind(&dispute.reason)
    .bind(&dispute.opened_by)
    .bind(DisputeStatus::Open.to_string())
    .bind(at)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref de) if de.is_unique_violation() => {
            SettlementError::DuplicateDispute(dispute.allocation_id)
        },
        e => SettlementError::from(e),
    })
}

/// Closes an open dispute. Returns `None` if the dispute does not exist or is no longer open.
pub async fn close_dispute(
    dispute_id: i64,
    resolution: &DisputeResolution,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Dispute>, sqlx::Error> {
    let (status, release, refund) = match resolution {
        DisputeResolution::Dismiss => (DisputeStatus::Dismissed, None, None),
        DisputeResolution::Settle { release_amount, refund_amount } => {
            (DisputeStatus::Settled, Some(release_amount.value()), Some(refund_amount.value()))
        },
    };
    sqlx::query_as(
        r#"
            UPDATE disputes SET status = $1, release_amount = $2, refund_amount = $3, resolved_at = $4
            WHERE id = $5 AND status = $6
            RETURNING *;
        "#,
    )
    .bind(status.to_string())
    .bind(release)
    .bind(refund)
    .bind(at)
    .bind(dispute_id)
    .bind(DisputeStatus::Open.to_string())
    .fetch_optional(conn)
    .await
}

pub async fn fetch_dispute(id: i64, conn: &mut SqliteConnection) -> Result<Option<Dispute>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM disputes WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_open_dispute(
    allocation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Dispute>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM disputes WHERE allocation_id = $1 AND status = $2")
        .bind(allocation_id)
        .bind(DisputeStatus::Open.to_string())
        .fetch_optional(conn)
        .await
}

pub async fn fetch_disputes_for_allocation(
    allocation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Dispute>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM disputes WHERE allocation_id = $1 ORDER BY id")
        .bind(allocation_id)
        .fetch_all(conn)
        .await
}
