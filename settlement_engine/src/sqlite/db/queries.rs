//! Reporting queries over escrow state.
use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{Allocation, AllocationStatus, Cents, SellerId},
    traits::{
        AllocationQueryFilter,
        CommissionQueryFilter,
        CommissionRecord,
        CommissionState,
        CommissionStatistics,
        EscrowStatistics,
        Page,
        SellerCommissionSummary,
        SellerEscrowSummary,
        StatusTotal,
    },
};

const COMMISSION_RECORD_COLUMNS: &str = r#"
    SELECT
        c.id,
        c.allocation_id,
        c.rule_id,
        c.rate,
        c.amount,
        c.created_at,
        a.order_id,
        a.seller_id,
        a.amount AS allocation_amount,
        a.status AS allocation_status
    FROM commissions c JOIN escrow_allocations a ON a.id = c.allocation_id
"#;

const COMMISSION_COUNT: &str = "SELECT COUNT(*) FROM commissions c JOIN escrow_allocations a ON a.id = c.allocation_id";

#[derive(Debug, FromRow)]
struct StatusRow {
    status: AllocationStatus,
    count: i64,
    amount: Cents,
    released: Cents,
    refunded: Cents,
}

#[derive(Debug, FromRow)]
struct EscrowCounts {
    total: i64,
    open: i64,
    settled: i64,
    captured: Cents,
}

pub async fn seller_summary(
    seller_id: &SellerId,
    conn: &mut SqliteConnection,
) -> Result<SellerEscrowSummary, sqlx::Error> {
    let rows: Vec<StatusRow> = sqlx::query_as(
        r#"
            SELECT
                status,
                COUNT(*) AS count,
                COALESCE(SUM(amount), 0) AS amount,
                COALESCE(SUM(released_amount), 0) AS released,
                COALESCE(SUM(refunded_amount), 0) AS refunded
            FROM escrow_allocations
            WHERE seller_id = $1
            GROUP BY status
        "#,
    )
    .bind(seller_id.as_str())
    .fetch_all(&mut *conn)
    .await?;
    let (commission,): (i64,) = sqlx::query_as(
        r#"
            SELECT COALESCE(SUM(c.amount), 0)
            FROM commissions c JOIN escrow_allocations a ON a.id = c.allocation_id
            WHERE a.seller_id = $1 AND a.status = $2
        "#,
    )
    .bind(seller_id.as_str())
    .bind(AllocationStatus::Released.to_string())
    .fetch_one(&mut *conn)
    .await?;

    let mut summary = SellerEscrowSummary { seller_id: seller_id.clone(), ..Default::default() };
    for row in rows {
        summary.allocation_count += row.count;
        summary.released += row.released;
        summary.refunded += row.refunded;
        match row.status {
            AllocationStatus::Pending => summary.pending += row.amount,
            AllocationStatus::Held => summary.held += row.amount,
            AllocationStatus::Frozen => summary.frozen += row.amount,
            AllocationStatus::Released | AllocationStatus::Refunded => {},
        }
    }
    summary.commission = Cents::from(commission);
    summary.available = (summary.released - summary.commission).max(Cents::default());
    Ok(summary)
}

pub async fn statistics(conn: &mut SqliteConnection) -> Result<EscrowStatistics, sqlx::Error> {
    let counts: EscrowCounts = sqlx::query_as(
        r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'Open' THEN 1 ELSE 0 END), 0) AS open,
                COALESCE(SUM(CASE WHEN status = 'Settled' THEN 1 ELSE 0 END), 0) AS settled,
                COALESCE(SUM(total_amount), 0) AS captured
            FROM escrow_transactions
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;
    let rows: Vec<(AllocationStatus, i64, i64)> = sqlx::query_as(
        r#"
            SELECT status, COUNT(*), COALESCE(SUM(amount), 0)
            FROM escrow_allocations
            GROUP BY status
            ORDER BY status
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    let (total_commission,): (i64,) =
        sqlx::query_as("SELECT COALESCE(SUM(amount), 0) FROM commissions").fetch_one(&mut *conn).await?;
    let (open_disputes,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM disputes WHERE status = 'Open'").fetch_one(&mut *conn).await?;
    let mut allocations = rows
        .into_iter()
        .map(|(status, count, amount)| StatusTotal { status, count, amount: Cents::from(amount) })
        .collect::<Vec<_>>();
    allocations.sort_by_key(|s| s.status);
    Ok(EscrowStatistics {
        total_escrows: counts.total,
        open_escrows: counts.open,
        settled_escrows: counts.settled,
        captured: counts.captured,
        allocations,
        total_commission: Cents::from(total_commission),
        open_disputes,
    })
}

fn push_allocation_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AllocationQueryFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(seller_id) = &filter.seller_id {
        builder.push(" AND seller_id = ");
        builder.push_bind(seller_id.0.clone());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.to_string());
    }
}

/// Fetches a page of allocations, newest first.
pub async fn search_allocations(
    filter: AllocationQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Page<Allocation>, sqlx::Error> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM escrow_allocations");
    push_allocation_filter(&mut count, &filter);
    let (total,): (i64,) = count.build_query_as().fetch_one(&mut *conn).await?;

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM escrow_allocations");
    push_allocation_filter(&mut builder, &filter);
    builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    builder.push_bind(filter.limit());
    builder.push(" OFFSET ");
    builder.push_bind(filter.offset());
    trace!("🗃️ Executing query: {}", builder.sql());
    let data = builder.build_query_as::<Allocation>().fetch_all(&mut *conn).await?;
    Ok(Page::new(data, filter.page(), filter.limit(), total))
}

fn push_window(builder: &mut QueryBuilder<'_, Sqlite>, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) {
    if let Some(since) = since {
        builder.push(" AND c.created_at >= ");
        builder.push_bind(since);
    }
    if let Some(until) = until {
        builder.push(" AND c.created_at <= ");
        builder.push_bind(until);
    }
}

fn push_commission_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &CommissionQueryFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(seller_id) = &filter.seller_id {
        builder.push(" AND a.seller_id = ");
        builder.push_bind(seller_id.0.clone());
    }
    if let Some(state) = filter.state {
        builder.push(" AND a.status IN (");
        let mut statuses = builder.separated(", ");
        for status in state.allocation_statuses() {
            statuses.push_bind(status.to_string());
        }
        statuses.push_unseparated(")");
    }
    push_window(builder, filter.since, filter.until);
}

/// Fetches a page of commissions with the allocations they were charged on, newest first.
pub async fn search_commissions(
    filter: CommissionQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Page<CommissionRecord>, sqlx::Error> {
    let mut count = QueryBuilder::<Sqlite>::new(COMMISSION_COUNT);
    push_commission_filter(&mut count, &filter);
    let (total,): (i64,) = count.build_query_as().fetch_one(&mut *conn).await?;

    let mut builder = QueryBuilder::<Sqlite>::new(COMMISSION_RECORD_COLUMNS);
    push_commission_filter(&mut builder, &filter);
    builder.push(" ORDER BY c.created_at DESC, c.id DESC LIMIT ");
    builder.push_bind(filter.limit());
    builder.push(" OFFSET ");
    builder.push_bind(filter.offset());
    trace!("🗃️ Executing query: {}", builder.sql());
    let data = builder.build_query_as::<CommissionRecord>().fetch_all(&mut *conn).await?;
    Ok(Page::new(data, filter.page(), filter.limit(), total))
}

pub async fn seller_commission_summary(
    seller_id: &SellerId,
    conn: &mut SqliteConnection,
) -> Result<SellerCommissionSummary, sqlx::Error> {
    let rows: Vec<(AllocationStatus, i64, i64)> = sqlx::query_as(
        r#"
            SELECT a.status, COUNT(*), COALESCE(SUM(c.amount), 0)
            FROM commissions c JOIN escrow_allocations a ON a.id = c.allocation_id
            WHERE a.seller_id = $1
            GROUP BY a.status
        "#,
    )
    .bind(seller_id.as_str())
    .fetch_all(conn)
    .await?;
    let mut summary = SellerCommissionSummary { seller_id: seller_id.clone(), ..Default::default() };
    for (status, count, amount) in rows {
        let amount = Cents::from(amount);
        summary.total.add(count, amount);
        summary.tally_mut(CommissionState::from(status)).add(count, amount);
    }
    Ok(summary)
}

pub async fn commission_statistics(
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> Result<CommissionStatistics, sqlx::Error> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        r#"
            SELECT a.status, COUNT(*), COALESCE(SUM(c.amount), 0), COALESCE(SUM(a.amount), 0)
            FROM commissions c JOIN escrow_allocations a ON a.id = c.allocation_id
            WHERE 1 = 1
        "#,
    );
    push_window(&mut builder, since, until);
    builder.push(" GROUP BY a.status");
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build_query_as::<(AllocationStatus, i64, i64, i64)>().fetch_all(conn).await?;
    let mut stats = CommissionStatistics::default();
    for (status, count, amount, allocated) in rows {
        let amount = Cents::from(amount);
        stats.total.add(count, amount);
        stats.allocation_amount += Cents::from(allocated);
        stats.tally_mut(CommissionState::from(status)).add(count, amount);
    }
    Ok(stats)
}
