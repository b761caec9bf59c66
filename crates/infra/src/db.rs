//! Postgres connection pool and schema bootstrap.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        is_verified_seller BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    // No foreign key on seller_id: a seller may disappear while tasks for
    // its ads are still queued, and the worker must observe that.
    r#"
    CREATE TABLE IF NOT EXISTS ads (
        id BIGSERIAL PRIMARY KEY,
        seller_id BIGINT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        category INTEGER NOT NULL,
        images_qty INTEGER NOT NULL,
        is_closed BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS moderation_results (
        id BIGSERIAL PRIMARY KEY,
        item_id BIGINT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
        is_violation BOOLEAN,
        probability DOUBLE PRECISION CHECK (probability >= 0 AND probability <= 1),
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        processed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS moderation_results_item_id_idx ON moderation_results (item_id)",
];

/// Open a connection pool.
#[instrument(skip(database_url), err)]
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Create tables and indexes if they do not exist yet.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("database schema ready");
    Ok(())
}
