//! Database repository for webhook sources.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::sources::{Source, SourceCreateDBRequest, SourceId, SourceUpdateDBRequest};

/// Repository for source operations.
pub struct Sources<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Sources<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create a new source. A duplicate slug surfaces as a unique violation.
    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    pub async fn create(&mut self, request: &SourceCreateDBRequest) -> Result<Source> {
        let source = sqlx::query_as::<_, Source>(
            r#"
            INSERT INTO sources (name, slug, mode, script_body)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.slug)
        .bind(request.mode.as_str())
        .bind(&request.script_body)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(source)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_slug(&mut self, slug: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(source)
    }

    #[instrument(skip(self), fields(source_id = %id), err)]
    pub async fn get_by_id(&mut self, id: SourceId) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(source)
    }

    /// List all sources, newest first.
    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY created_at DESC")
            .fetch_all(&mut *self.db)
            .await?;

        Ok(sources)
    }

    /// Three-valued update: `None` preserves the current value,
    /// `clear_script` forces `script_body` to null.
    #[instrument(skip(self, request), err)]
    pub async fn update(&mut self, slug: &str, request: &SourceUpdateDBRequest) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>(
            r#"
            UPDATE sources SET
                name        = COALESCE($2, name),
                mode        = COALESCE($3, mode),
                script_body = CASE
                    WHEN $4::boolean THEN NULL
                    ELSE COALESCE($5, script_body)
                END,
                updated_at  = now()
            WHERE slug = $1
            RETURNING *
            "#,
        )
        .bind(slug)
        .bind(&request.name)
        .bind(request.mode.map(|m| m.as_str()))
        .bind(request.clear_script)
        .bind(&request.script_body)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(source)
    }

    /// Delete a source, cascading to its actions, deliveries, and attempts.
    /// Returns false when the slug does not exist.
    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, slug: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE slug = $1")
            .bind(slug)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
