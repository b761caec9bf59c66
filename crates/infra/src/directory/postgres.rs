use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use admod_core::{Ad, NewAd, PrincipalId, Seller, SubjectId};

use super::{CloseOutcome, DirectoryError, SubjectDirectory};

/// Postgres-backed directory over the `users` and `ads` tables.
#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[derive(FromRow)]
struct AdRow {
    id: i64,
    seller_id: i64,
    title: String,
    description: String,
    category: i32,
    images_qty: i32,
}

impl From<AdRow> for Ad {
    fn from(row: AdRow) -> Self {
        Ad {
            id: SubjectId::new(row.id),
            seller_id: PrincipalId::new(row.seller_id),
            title: row.title,
            description: row.description,
            category: row.category,
            images_qty: row.images_qty,
        }
    }
}

#[async_trait]
impl SubjectDirectory for PostgresDirectory {
    #[instrument(skip(self), err)]
    async fn create_seller(&self, is_verified_seller: bool) -> Result<Seller, DirectoryError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO users (is_verified_seller) VALUES ($1) RETURNING id")
                .bind(is_verified_seller)
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_seller", e))?;

        Ok(Seller {
            id: PrincipalId::new(id),
            is_verified_seller,
        })
    }

    #[instrument(skip(self, ad), fields(seller_id = %ad.seller_id), err)]
    async fn create_ad(&self, ad: NewAd) -> Result<Ad, DirectoryError> {
        let seller_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(ad.seller_id.get())
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_ad", e))?;
        if !seller_exists {
            return Err(DirectoryError::Invalid(format!(
                "seller {} does not exist",
                ad.seller_id
            )));
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ads (seller_id, title, description, category, images_qty)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(ad.seller_id.get())
        .bind(&ad.title)
        .bind(&ad.description)
        .bind(ad.category)
        .bind(ad.images_qty)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_ad", e))?;

        Ok(ad.into_ad(SubjectId::new(id)))
    }

    #[instrument(skip(self), fields(subject_id = %id), err)]
    async fn get_ad(&self, id: SubjectId) -> Result<Option<Ad>, DirectoryError> {
        let row = sqlx::query_as::<_, AdRow>(
            r#"
            SELECT id, seller_id, title, description, category, images_qty
            FROM ads
            WHERE id = $1 AND is_closed = FALSE
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_ad", e))?;

        Ok(row.map(Ad::from))
    }

    #[instrument(skip(self), fields(principal_id = %id), err)]
    async fn get_seller(&self, id: PrincipalId) -> Result<Option<Seller>, DirectoryError> {
        let verified: Option<bool> =
            sqlx::query_scalar("SELECT is_verified_seller FROM users WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_seller", e))?;

        Ok(verified.map(|is_verified_seller| Seller {
            id,
            is_verified_seller,
        }))
    }

    #[instrument(skip(self), fields(subject_id = %id), err)]
    async fn close_ad(&self, id: SubjectId) -> Result<CloseOutcome, DirectoryError> {
        // Returns the flag as it was before this statement.
        let was_closed: Option<bool> = sqlx::query_scalar(
            r#"
            WITH target AS (
                SELECT id, is_closed FROM ads WHERE id = $1 FOR UPDATE
            ), closing AS (
                UPDATE ads SET is_closed = TRUE
                FROM target
                WHERE ads.id = target.id AND NOT target.is_closed
            )
            SELECT is_closed FROM target
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("close_ad", e))?;

        Ok(match was_closed {
            None => CloseOutcome::Missing,
            Some(true) => CloseOutcome::AlreadyClosed,
            Some(false) => CloseOutcome::Closed,
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            DirectoryError::Query(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            DirectoryError::Connection(format!("{operation}: {err}"))
        }
        other => DirectoryError::Query(format!("{operation}: {other}")),
    }
}
