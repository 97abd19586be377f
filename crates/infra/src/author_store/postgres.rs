//! Postgres-backed author store.
//!
//! ## Counter atomicity
//!
//! `increment_total_posts` is a single `UPDATE ... SET total_posts = total_posts + $2
//! ... RETURNING total_posts`. Postgres serializes concurrent updates of the
//! same row, so two deltas racing for one author both land.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use authors_core::{Author, AuthorFilter, AuthorId, AuthorPatch, NewAuthor};

use super::{AuthorStore, StoreError};

const AUTHOR_COLUMNS: &str =
    "id, name, last_name, image, email, password, total_posts, created_at, updated_at";

pub struct PostgresAuthorStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the tables this service owns (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                seq         BIGSERIAL,
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                last_name   TEXT NOT NULL,
                image       TEXT,
                email       TEXT,
                password    TEXT,
                total_posts BIGINT NOT NULL DEFAULT 0,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_messages (
                message_key  TEXT PRIMARY KEY,
                processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_author(row: &PgRow) -> Result<Author, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(e.to_string());
    Ok(Author {
        id: AuthorId::from(row.try_get::<String, _>("id").map_err(corrupt)?),
        name: row.try_get("name").map_err(corrupt)?,
        last_name: row.try_get("last_name").map_err(corrupt)?,
        image: row.try_get("image").map_err(corrupt)?,
        email: row.try_get("email").map_err(corrupt)?,
        password: row.try_get("password").map_err(corrupt)?,
        total_posts: row.try_get("total_posts").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
        posts: None,
    })
}

#[async_trait]
impl AuthorStore for PostgresAuthorStore {
    async fn insert(&self, new: NewAuthor) -> Result<Author, StoreError> {
        let id = AuthorId::new();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO authors (id, name, last_name, image, email, password)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {AUTHOR_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .bind(&new.name)
        .bind(&new.last_name)
        .bind(&new.image)
        .bind(&new.email)
        .bind(&new.password)
        .fetch_one(&*self.pool)
        .await?;

        row_to_author(&row)
    }

    async fn get(&self, id: &AuthorId) -> Result<Option<Author>, StoreError> {
        let row = sqlx::query(&format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await?;

        row.as_ref().map(row_to_author).transpose()
    }

    async fn list(&self, filter: &AuthorFilter) -> Result<Vec<Author>, StoreError> {
        let ids: Option<Vec<String>> = filter
            .ids
            .as_ref()
            .map(|ids| ids.iter().map(|id| id.as_str().to_string()).collect());

        let rows = sqlx::query(&format!(
            r#"
            SELECT {AUTHOR_COLUMNS}
            FROM authors
            WHERE $1::text[] IS NULL OR id = ANY($1)
            ORDER BY seq
            "#
        ))
        .bind(ids)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(row_to_author).collect()
    }

    async fn update(&self, id: &AuthorId, patch: AuthorPatch) -> Result<Option<Author>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE authors SET
                name = COALESCE($2, name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                image = COALESCE($5, image),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {AUTHOR_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .bind(&patch.name)
        .bind(&patch.last_name)
        .bind(&patch.email)
        .bind(&patch.image)
        .fetch_optional(&*self.pool)
        .await?;

        row.as_ref().map(row_to_author).transpose()
    }

    async fn delete(&self, id: &AuthorId) -> Result<Option<Author>, StoreError> {
        let row = sqlx::query(&format!("DELETE FROM authors WHERE id = $1 RETURNING {AUTHOR_COLUMNS}"))
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await?;

        row.as_ref().map(row_to_author).transpose()
    }

    async fn increment_total_posts(&self, id: &AuthorId, delta: i64) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE authors
            SET total_posts = total_posts + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING total_posts
            "#,
        )
        .bind(id.as_str())
        .bind(delta)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|r| r.try_get::<i64, _>("total_posts"))
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}
