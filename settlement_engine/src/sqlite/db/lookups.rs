//! Read access to shipping addresses and coupons, plus the upserts used to seed them.
use sqlx::SqliteConnection;

use crate::db_types::{Coupon, ShippingAddress};

pub async fn fetch_shipping_address(
    id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<ShippingAddress>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM shipping_addresses WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn upsert_shipping_address(
    address: &ShippingAddress,
    conn: &mut SqliteConnection,
) -> Result<ShippingAddress, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO shipping_addresses (id, customer_id, country, state, postal_code, city)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                customer_id = excluded.customer_id,
                country = excluded.country,
                state = excluded.state,
                postal_code = excluded.postal_code,
                city = excluded.city
            RETURNING *;
        "#,
    )
    .bind(&address.id)
    .bind(&address.customer_id)
    .bind(&address.country)
    .bind(&address.state)
    .bind(&address.postal_code)
    .bind(&address.city)
    .fetch_one(conn)
    .await
}

/// Coupon codes are matched case-insensitively.
pub async fn fetch_coupon(code: &str, conn: &mut SqliteConnection) -> Result<Option<Coupon>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM coupons WHERE code = $1 COLLATE NOCASE")
        .bind(code.trim())
        .fetch_optional(conn)
        .await
}

pub async fn upsert_coupon(coupon: &Coupon, conn: &mut SqliteConnection) -> Result<Coupon, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO coupons (code, discount_type, value, min_subtotal, valid_from, valid_until, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (code) DO UPDATE SET
                discount_type = excluded.discount_type,
                value = excluded.value,
                min_subtotal = excluded.min_subtotal,
                valid_from = excluded.valid_from,
                valid_until = excluded.valid_until,
                is_active = excluded.is_active
            RETURNING *;
        "#,
    )
    .bind(&coupon.code)
    .bind(coupon.discount_type.to_string())
    .bind(coupon.value)
    .bind(coupon.min_subtotal.map(|v| v.value()))
    .bind(coupon.valid_from)
    .bind(coupon.valid_until)
    .bind(coupon.is_active)
    .fetch_one(conn)
    .await
}
