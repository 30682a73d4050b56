use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::{IdempotencyKey, IdempotencyRecord};

/// Records that the event identified by `key` has been processed. Returns `false` if it was already recorded, in
/// which case nothing is written.
pub async fn record_event(
    key: &IdempotencyKey,
    reference: Option<&str>,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO idempotency_records (source, event_id, reference, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source, event_id) DO NOTHING
        "#,
    )
    .bind(key.source.to_string())
    .bind(&key.event_id)
    .bind(reference)
    .bind(at)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn fetch_record(
    key: &IdempotencyKey,
    conn: &mut SqliteConnection,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM idempotency_records WHERE source = $1 AND event_id = $2")
        .bind(key.source.to_string())
        .bind(&key.event_id)
        .fetch_optional(conn)
        .await
}
