//! Database repository for dispatch actions.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::actions::{Action, ActionCreateDBRequest, ActionId, ActionUpdateDBRequest};
use crate::db::models::sources::SourceId;

/// Repository for action operations.
pub struct Actions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Actions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create a new action. The type/field invariants are enforced by CHECK
    /// constraints, so a webhook action without a target URL surfaces as a
    /// check violation.
    #[instrument(skip(self, request), fields(source_id = %request.source_id), err)]
    pub async fn create(&mut self, request: &ActionCreateDBRequest) -> Result<Action> {
        let action = sqlx::query_as::<_, Action>(
            r#"
            INSERT INTO actions (source_id, type, target_url, signing_secret, script_body)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(request.source_id)
        .bind(request.kind.as_str())
        .bind(&request.target_url)
        .bind(&request.signing_secret)
        .bind(&request.script_body)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(action)
    }

    /// List all actions for a source, newest first.
    #[instrument(skip(self), fields(source_id = %source_id), err)]
    pub async fn list(&mut self, source_id: SourceId) -> Result<Vec<Action>> {
        let actions = sqlx::query_as::<_, Action>(
            "SELECT * FROM actions WHERE source_id = $1 ORDER BY created_at DESC",
        )
        .bind(source_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(actions)
    }

    /// List the actions eligible for dispatch.
    #[instrument(skip(self), fields(source_id = %source_id), err)]
    pub async fn list_active(&mut self, source_id: SourceId) -> Result<Vec<Action>> {
        let actions = sqlx::query_as::<_, Action>(
            "SELECT * FROM actions WHERE source_id = $1 AND is_active = true ORDER BY created_at ASC",
        )
        .bind(source_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(actions)
    }

    #[instrument(skip(self), fields(action_id = %id), err)]
    pub async fn get_by_id(&mut self, id: ActionId) -> Result<Option<Action>> {
        let action = sqlx::query_as::<_, Action>("SELECT * FROM actions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(action)
    }

    /// Three-valued update: `None` fields are preserved.
    #[instrument(skip(self, request), fields(action_id = %id), err)]
    pub async fn update(&mut self, id: ActionId, request: &ActionUpdateDBRequest) -> Result<Option<Action>> {
        let action = sqlx::query_as::<_, Action>(
            r#"
            UPDATE actions SET
                target_url     = COALESCE($2, target_url),
                signing_secret = COALESCE($3, signing_secret),
                is_active      = COALESCE($4, is_active),
                script_body    = COALESCE($5, script_body),
                updated_at     = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.target_url)
        .bind(&request.signing_secret)
        .bind(request.is_active)
        .bind(&request.script_body)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(action)
    }

    /// Delete an action. Returns false when it does not exist.
    #[instrument(skip(self), fields(action_id = %id), err)]
    pub async fn delete(&mut self, id: ActionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM actions WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::db::handlers::Sources;
    use crate::db::models::actions::ActionType;
    use crate::db::models::sources::{SourceCreateDBRequest, SourceMode};
    use sqlx::PgPool;

    async fn seed_source(pool: &PgPool) -> SourceId {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sources::new(&mut conn);
        repo.create(&SourceCreateDBRequest {
            name: "Billing".to_string(),
            slug: "billing".to_string(),
            mode: SourceMode::Active,
            script_body: None,
        })
        .await
        .unwrap()
        .id
    }

    fn webhook_request(source_id: SourceId, url: &str) -> ActionCreateDBRequest {
        ActionCreateDBRequest {
            source_id,
            kind: ActionType::Webhook,
            target_url: Some(url.to_string()),
            signing_secret: None,
            script_body: None,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn webhook_action_requires_target_url(pool: PgPool) {
        let source_id = seed_source(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Actions::new(&mut conn);

        let err = repo
            .create(&ActionCreateDBRequest {
                source_id,
                kind: ActionType::Webhook,
                target_url: None,
                signing_secret: None,
                script_body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn javascript_action_requires_script(pool: PgPool) {
        let source_id = seed_source(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Actions::new(&mut conn);

        let err = repo
            .create(&ActionCreateDBRequest {
                source_id,
                kind: ActionType::Javascript,
                target_url: None,
                signing_secret: None,
                script_body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn inactive_actions_are_excluded_from_dispatch_set(pool: PgPool) {
        let source_id = seed_source(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Actions::new(&mut conn);

        let first = repo.create(&webhook_request(source_id, "https://a.example/hook")).await.unwrap();
        let second = repo.create(&webhook_request(source_id, "https://b.example/hook")).await.unwrap();

        repo.update(
            second.id,
            &ActionUpdateDBRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let active = repo.list_active(source_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);

        let all = repo.list(source_id).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn update_preserves_unset_fields(pool: PgPool) {
        let source_id = seed_source(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Actions::new(&mut conn);

        let mut request = webhook_request(source_id, "https://a.example/hook");
        request.signing_secret = Some("s3cret".to_string());
        let action = repo.create(&request).await.unwrap();

        let updated = repo
            .update(
                action.id,
                &ActionUpdateDBRequest {
                    target_url: Some("https://b.example/hook".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.target_url.as_deref(), Some("https://b.example/hook"));
        assert_eq!(updated.signing_secret.as_deref(), Some("s3cret"));
        assert!(updated.is_active);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn deleting_a_source_cascades_to_actions(pool: PgPool) {
        let source_id = seed_source(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let action = {
            let mut repo = Actions::new(&mut conn);
            repo.create(&webhook_request(source_id, "https://a.example/hook")).await.unwrap()
        };

        {
            let mut repo = Sources::new(&mut conn);
            assert!(repo.delete("billing").await.unwrap());
        }

        let mut repo = Actions::new(&mut conn);
        assert!(repo.get_by_id(action.id).await.unwrap().is_none());
    }
}
