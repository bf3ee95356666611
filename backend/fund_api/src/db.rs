//! Database layer: migrations, entity queries, and the allocation ledger.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fund_allocator::{Allocation, CharityProject, Donation, Fundable, FundableKind, Funding};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::{FundError, Result};
use crate::models::{
    to_micros, AllocationRecord, DonationCreate, DonationRow, ProjectCreate, ProjectRow,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Generic per-kind access
// ─────────────────────────────────────────────────────────

/// Maps a domain kind onto its table.
pub trait Table: Fundable + Send + Unpin + 'static {
    type Row: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin;

    const TABLE: &'static str;

    fn from_row(row: Self::Row) -> Result<Self>;
}

impl Table for CharityProject {
    type Row = ProjectRow;
    const TABLE: &'static str = "charity_project";

    fn from_row(row: ProjectRow) -> Result<Self> {
        CharityProject::try_from(row)
    }
}

impl Table for Donation {
    type Row = DonationRow;
    const TABLE: &'static str = "donation";

    fn from_row(row: DonationRow) -> Result<Self> {
        Donation::try_from(row)
    }
}

/// Fetch a single entity by id.
pub async fn fetch<F: Table>(conn: &mut SqliteConnection, id: i64) -> Result<Option<F>> {
    let sql = format!("SELECT * FROM {} WHERE id = ?1", F::TABLE);
    let row = sqlx::query_as::<_, F::Row>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(F::from_row).transpose()
}

/// Fetch a single entity by id on a pooled connection.
pub async fn get<F: Table>(pool: &SqlitePool, id: i64) -> Result<Option<F>> {
    let mut conn = pool.acquire().await?;
    fetch(&mut conn, id).await
}

/// Fetch every entity of a kind, in id order.
pub async fn fetch_all<F: Table>(pool: &SqlitePool) -> Result<Vec<F>> {
    let sql = format!("SELECT * FROM {} ORDER BY id ASC", F::TABLE);
    let rows = sqlx::query_as::<_, F::Row>(&sql).fetch_all(pool).await?;
    rows.into_iter().map(F::from_row).collect()
}

/// Open entities, oldest first; equal creation times fall back to id.
pub async fn fetch_open<F: Table>(conn: &mut SqliteConnection) -> Result<Vec<F>> {
    let sql = format!(
        "SELECT * FROM {} WHERE fully_invested = 0 ORDER BY create_date ASC, id ASC",
        F::TABLE
    );
    let rows = sqlx::query_as::<_, F::Row>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(F::from_row).collect()
}

/// Write back the funding state of an entity.
///
/// The row is only updated while it still holds `invested_before` and is
/// open. Returns `false` when another writer changed it in the meantime.
pub async fn save_funding<F: Table>(
    conn: &mut SqliteConnection,
    id: i64,
    invested_before: i64,
    funding: &Funding,
) -> Result<bool> {
    let sql = format!(
        "UPDATE {} SET invested_amount = ?1, fully_invested = ?2, close_date = ?3
         WHERE id = ?4 AND invested_amount = ?5 AND fully_invested = 0",
        F::TABLE
    );
    let rows_affected = sqlx::query(&sql)
        .bind(funding.invested_amount)
        .bind(funding.fully_invested)
        .bind(funding.close_date.map(to_micros))
        .bind(id)
        .bind(invested_before)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(rows_affected == 1)
}

// ─────────────────────────────────────────────────────────
// Entity writes
// ─────────────────────────────────────────────────────────

/// Insert a new project. Runs inside the allocation pass that funds it.
pub async fn insert_project(
    conn: &mut SqliteConnection,
    input: &ProjectCreate,
    now: DateTime<Utc>,
) -> Result<CharityProject> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        INSERT INTO charity_project (name, description, full_amount, create_date)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.full_amount)
    .bind(to_micros(now))
    .fetch_one(&mut *conn)
    .await?;
    CharityProject::try_from(row)
}

/// Insert a new donation. Runs inside the allocation pass that spreads it.
pub async fn insert_donation(
    conn: &mut SqliteConnection,
    input: &DonationCreate,
    now: DateTime<Utc>,
) -> Result<Donation> {
    let row = sqlx::query_as::<_, DonationRow>(
        r#"
        INSERT INTO donation (comment, full_amount, create_date)
        VALUES (?1, ?2, ?3)
        RETURNING *
        "#,
    )
    .bind(&input.comment)
    .bind(input.full_amount)
    .bind(to_micros(now))
    .fetch_one(&mut *conn)
    .await?;
    Donation::try_from(row)
}

/// Id of another project already using `name`.
pub async fn project_id_by_name(
    pool: &SqlitePool,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM charity_project WHERE name = ?1 AND id != ?2")
            .bind(name)
            .bind(exclude_id.unwrap_or(-1))
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(id,)| id))
}

/// Persist an administrative edit of an open project.
///
/// Guarded on the invested amount the edit was validated against.
pub async fn update_project(
    pool: &SqlitePool,
    project: &CharityProject,
    invested_before: i64,
) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE charity_project
        SET    name = ?1, description = ?2, full_amount = ?3,
               fully_invested = ?4, close_date = ?5
        WHERE  id = ?6 AND invested_amount = ?7 AND fully_invested = 0
        "#,
    )
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.funding.full_amount)
    .bind(project.funding.fully_invested)
    .bind(project.funding.close_date.map(to_micros))
    .bind(project.id)
    .bind(invested_before)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected == 1)
}

/// Delete a project that never received funds. Returns `false` when the
/// row is gone or was funded in the meantime.
pub async fn delete_project(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let rows_affected =
        sqlx::query("DELETE FROM charity_project WHERE id = ?1 AND invested_amount = 0")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    if rows_affected != 1 {
        return Ok(false);
    }
    sqlx::query("DELETE FROM allocation_runs WHERE kind = ?1 AND entity_id = ?2")
        .bind(FundableKind::CharityProject.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────
// Allocation ledger
// ─────────────────────────────────────────────────────────

/// Claim the completion marker for `(kind, id)`.
///
/// Returns `false` when the entity was already allocated.
pub async fn claim_allocation(
    conn: &mut SqliteConnection,
    kind: FundableKind,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        INSERT INTO allocation_runs (kind, entity_id, completed_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (kind, entity_id) DO NOTHING
        "#,
    )
    .bind(kind.as_str())
    .bind(id)
    .bind(to_micros(now))
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows_affected == 1)
}

/// Record every transfer of an allocation pass.
pub async fn insert_transfers(conn: &mut SqliteConnection, allocation: &Allocation) -> Result<()> {
    for transfer in &allocation.transfers {
        sqlx::query(
            r#"
            INSERT INTO allocations
                (source_kind, source_id, sink_kind, sink_id, amount, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(allocation.source_kind.as_str())
        .bind(allocation.source_id)
        .bind(allocation.sink_kind().as_str())
        .bind(transfer.sink_id)
        .bind(transfer.amount)
        .bind(to_micros(allocation.at))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Entities of kind `F` without a completion marker, oldest first.
///
/// Returns `(id, create_date)` pairs.
pub async fn unallocated<F: Table>(pool: &SqlitePool) -> Result<Vec<(i64, i64)>> {
    let sql = format!(
        r#"
        SELECT t.id, t.create_date
        FROM   {table} t
        WHERE  NOT EXISTS (
                   SELECT 1 FROM allocation_runs r
                   WHERE  r.kind = ?1 AND r.entity_id = t.id
               )
        ORDER  BY t.create_date ASC, t.id ASC
        "#,
        table = F::TABLE
    );
    let rows: Vec<(i64, i64)> = sqlx::query_as(&sql)
        .bind(F::KIND.as_str())
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[cfg(test)]
pub async fn is_allocated(pool: &SqlitePool, kind: FundableKind, id: i64) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM allocation_runs WHERE kind = ?1 AND entity_id = ?2")
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

/// Fetch the whole ledger, oldest first.
pub async fn get_all_allocations(pool: &SqlitePool) -> Result<Vec<AllocationRecord>> {
    let rows = sqlx::query_as::<_, AllocationRecord>(
        r#"
        SELECT id, source_kind, source_id, sink_kind, sink_id, amount, created_at
        FROM   allocations
        ORDER  BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Ledger entries in which the given entity took part on either side.
pub async fn get_allocations_for(
    pool: &SqlitePool,
    kind: FundableKind,
    id: i64,
) -> Result<Vec<AllocationRecord>> {
    let rows = sqlx::query_as::<_, AllocationRecord>(
        r#"
        SELECT id, source_kind, source_id, sink_kind, sink_id, amount, created_at
        FROM   allocations
        WHERE  (source_kind = ?1 AND source_id = ?2)
           OR  (sink_kind = ?1 AND sink_id = ?2)
        ORDER  BY id ASC
        "#,
    )
    .bind(kind.as_str())
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Map a SQLite error onto "someone else holds the write lock".
pub fn is_busy(err: &FundError) -> bool {
    match err {
        FundError::Database(sqlx::Error::Database(db)) => matches!(
            db.code().as_deref(),
            // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
            Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
        ),
        FundError::Database(sqlx::Error::PoolTimedOut) => true,
        _ => false,
    }
}

/// A UNIQUE constraint rejected the write (duplicate project name).
pub fn is_unique_violation(err: &FundError) -> bool {
    matches!(err, FundError::Database(sqlx::Error::Database(db)) if db.is_unique_violation())
}
