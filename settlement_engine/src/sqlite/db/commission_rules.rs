use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{CategoryId, CommissionRule, CommissionScope, NewCommissionRule, SellerId},
    traits::RuleQueryFilter,
};

pub async fn insert_rule(
    rule: &NewCommissionRule,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CommissionRule, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO commission_rules (
                seller_id,
                category_id,
                commission_type,
                rate,
                min_order_value,
                max_order_value,
                valid_from,
                valid_until,
                is_active,
                notes,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $10, $10)
            RETURNING *;
        "#,
    )
    .bind(rule.seller_id.as_ref().map(|s| s.as_str()))
    .bind(rule.category_id.as_ref().map(|c| c.as_str()))
    .bind(rule.commission_type.to_string())
    .bind(rule.commission_rate.ppm())
    .bind(rule.min_order_value.map(|v| v.value()))
    .bind(rule.max_order_value.map(|v| v.value()))
    .bind(rule.valid_from)
    .bind(rule.valid_until)
    .bind(&rule.notes)
    .bind(at)
    .fetch_one(conn)
    .await
}

/// Overwrites every mutable field of rule `id`. Returns `None` if there is no such rule.
pub async fn update_rule(
    id: i64,
    rule: &NewCommissionRule,
    is_active: bool,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<CommissionRule>, sqlx::Error> {
    sqlx::query_as(
        r#"
            UPDATE commission_rules SET
                seller_id = $1,
                category_id = $2,
                commission_type = $3,
                rate = $4,
                min_order_value = $5,
                max_order_value = $6,
                valid_from = $7,
                valid_until = $8,
                is_active = $9,
                notes = $10,
                updated_at = $11
            WHERE id = $12
            RETURNING *;
        "#,
    )
    .bind(rule.seller_id.as_ref().map(|s| s.as_str()))
    .bind(rule.category_id.as_ref().map(|c| c.as_str()))
    .bind(rule.commission_type.to_string())
    .bind(rule.commission_rate.ppm())
    .bind(rule.min_order_value.map(|v| v.value()))
    .bind(rule.max_order_value.map(|v| v.value()))
    .bind(rule.valid_from)
    .bind(rule.valid_until)
    .bind(is_active)
    .bind(&rule.notes)
    .bind(at)
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn fetch_rule(id: i64, conn: &mut SqliteConnection) -> Result<Option<CommissionRule>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM commission_rules WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// The active rules with exactly this seller/category scope. `IS` compares NULLs as equal.
pub async fn fetch_active_rules_in_scope(
    seller_id: Option<&SellerId>,
    category_id: Option<&CategoryId>,
    conn: &mut SqliteConnection,
) -> Result<Vec<CommissionRule>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM commission_rules WHERE seller_id IS $1 AND category_id IS $2 AND is_active = 1 ORDER BY id",
    )
    .bind(seller_id.map(|s| s.as_str()))
    .bind(category_id.map(|c| c.as_str()))
    .fetch_all(conn)
    .await
}

pub async fn fetch_candidate_rules(
    seller_id: &SellerId,
    category_id: Option<&CategoryId>,
    conn: &mut SqliteConnection,
) -> Result<Vec<CommissionRule>, sqlx::Error> {
    sqlx::query_as(
        r#"
            SELECT * FROM commission_rules
            WHERE is_active = 1
              AND (seller_id IS NULL OR seller_id = $1)
              AND (category_id IS NULL OR category_id IS $2)
            ORDER BY id
        "#,
    )
    .bind(seller_id.as_str())
    .bind(category_id.map(|c| c.as_str()))
    .fetch_all(conn)
    .await
}

/// Fetches rules matching the filter, oldest first.
pub async fn search_rules(
    filter: RuleQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<CommissionRule>, sqlx::Error> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM commission_rules WHERE 1 = 1");
    if let Some(seller_id) = filter.seller_id {
        builder.push(" AND seller_id = ");
        builder.push_bind(seller_id.0);
    }
    if let Some(category_id) = filter.category_id {
        builder.push(" AND category_id = ");
        builder.push_bind(category_id.0);
    }
    if let Some(scope) = filter.scope {
        builder.push(match scope {
            CommissionScope::SellerCategory => " AND seller_id IS NOT NULL AND category_id IS NOT NULL",
            CommissionScope::Seller => " AND seller_id IS NOT NULL AND category_id IS NULL",
            CommissionScope::Category => " AND seller_id IS NULL AND category_id IS NOT NULL",
            CommissionScope::Global => " AND seller_id IS NULL AND category_id IS NULL",
        });
    }
    if filter.active_only {
        builder.push(" AND is_active = 1");
    }
    builder.push(" ORDER BY id ASC");
    trace!("🗃️ Executing query: {}", builder.sql());
    builder.build_query_as::<CommissionRule>().fetch_all(conn).await
}
