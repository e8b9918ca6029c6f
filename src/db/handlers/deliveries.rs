//! Database repository for deliveries and delivery attempts.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::actions::ActionId;
use crate::db::models::deliveries::{
    AttemptId, AttemptUpdateDBRequest, Delivery, DeliveryAttempt, DeliveryId, DeliveryStatus,
};
use crate::db::models::sources::SourceId;

/// Repository for delivery and attempt operations.
pub struct Deliveries<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Deliveries<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Persist an incoming webhook, or return the existing row untouched when
    /// `(source_id, idempotency_key)` was already seen.
    ///
    /// The boolean is true when a new row was inserted.
    #[instrument(skip(self, headers, payload), fields(source_id = %source_id), err)]
    pub async fn create_or_get(
        &mut self,
        source_id: SourceId,
        idempotency_key: &str,
        headers: &serde_json::Value,
        payload: &[u8],
    ) -> Result<(Delivery, bool)> {
        let inserted = sqlx::query_as::<_, Delivery>(
            r#"
            INSERT INTO deliveries (source_id, idempotency_key, headers, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_id, idempotency_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(source_id)
        .bind(idempotency_key)
        .bind(headers)
        .bind(payload)
        .fetch_optional(&mut *self.db)
        .await?;

        if let Some(delivery) = inserted {
            return Ok((delivery, true));
        }

        let existing = sqlx::query_as::<_, Delivery>(
            "SELECT * FROM deliveries WHERE source_id = $1 AND idempotency_key = $2",
        )
        .bind(source_id)
        .bind(idempotency_key)
        .fetch_one(&mut *self.db)
        .await?;

        Ok((existing, false))
    }

    #[instrument(skip(self), fields(delivery_id = %id), err)]
    pub async fn get_by_id(&mut self, id: DeliveryId) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(delivery)
    }

    /// List deliveries, newest first, optionally restricted to a source slug.
    #[instrument(skip(self), err)]
    pub async fn list(&mut self, source_slug: Option<&str>, limit: i64) -> Result<Vec<Delivery>> {
        let deliveries = match source_slug {
            Some(slug) => {
                sqlx::query_as::<_, Delivery>(
                    r#"
                    SELECT d.* FROM deliveries d
                    JOIN sources s ON d.source_id = s.id
                    WHERE s.slug = $1
                    ORDER BY d.received_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(slug)
                .bind(limit)
                .fetch_all(&mut *self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, Delivery>(
                    "SELECT * FROM deliveries ORDER BY received_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&mut *self.db)
                .await?
            }
        };

        Ok(deliveries)
    }

    /// Oldest-first pending deliveries, for the catch-up poller.
    #[instrument(skip(self), err)]
    pub async fn list_pending(&mut self, limit: i64) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(
            "SELECT * FROM deliveries WHERE status = 'pending' ORDER BY received_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(deliveries)
    }

    #[instrument(skip(self), fields(delivery_id = %id, status = status.as_str()), err)]
    pub async fn update_status(&mut self, id: DeliveryId, status: DeliveryStatus) -> Result<()> {
        sqlx::query("UPDATE deliveries SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    /// Conditionally claim a pending delivery for processing. Exactly one of
    /// any number of concurrent claimers wins; the rest get false.
    #[instrument(skip(self), fields(delivery_id = %id), err)]
    pub async fn try_mark_processing(&mut self, id: DeliveryId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deliveries SET status = 'processing' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist the transform script's output. These bytes become
    /// authoritative for every later dispatch and retry of this delivery.
    #[instrument(skip(self, payload, headers), fields(delivery_id = %id), err)]
    pub async fn set_transformed(
        &mut self,
        id: DeliveryId,
        payload: &[u8],
        headers: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query("UPDATE deliveries SET transformed_payload = $2, transformed_headers = $3 WHERE id = $1")
            .bind(id)
            .bind(payload)
            .bind(headers)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    // ===== Attempt methods =====

    /// Create an attempt row. `(delivery_id, action_id, attempt_number)` is
    /// unique, so a concurrent duplicate retry surfaces as a unique violation.
    #[instrument(skip(self), fields(delivery_id = %delivery_id, action_id = %action_id), err)]
    pub async fn create_attempt(
        &mut self,
        delivery_id: DeliveryId,
        action_id: ActionId,
        attempt_number: i32,
    ) -> Result<DeliveryAttempt> {
        let attempt = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            INSERT INTO delivery_attempts (delivery_id, action_id, attempt_number)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(delivery_id)
        .bind(action_id)
        .bind(attempt_number)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(attempt)
    }

    /// Write back the outcome of an attempt.
    #[instrument(skip(self, request), fields(attempt_id = %id), err)]
    pub async fn update_attempt(&mut self, id: AttemptId, request: &AttemptUpdateDBRequest) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delivery_attempts SET
                status          = $2,
                response_status = $3,
                response_body   = $4,
                error_message   = $5,
                next_retry_at   = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(request.status.as_str())
        .bind(request.response_status)
        .bind(&request.response_body)
        .bind(&request.error_message)
        .bind(request.next_retry_at)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    /// Failed attempts whose retry time has elapsed, soonest first.
    #[instrument(skip(self), err)]
    pub async fn list_retryable(&mut self, limit: i64) -> Result<Vec<DeliveryAttempt>> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            SELECT * FROM delivery_attempts
            WHERE status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= now()
            ORDER BY next_retry_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(attempts)
    }

    /// All attempts of a delivery, oldest first.
    #[instrument(skip(self), fields(delivery_id = %delivery_id), err)]
    pub async fn list_attempts(&mut self, delivery_id: DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            "SELECT * FROM delivery_attempts WHERE delivery_id = $1 ORDER BY created_at ASC",
        )
        .bind(delivery_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(attempts)
    }

    /// Highest attempt number recorded for `(delivery, action)`, zero when
    /// none exist.
    #[instrument(skip(self), fields(delivery_id = %delivery_id, action_id = %action_id), err)]
    pub async fn max_attempt_number(&mut self, delivery_id: DeliveryId, action_id: ActionId) -> Result<i32> {
        let max = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(attempt_number), 0) FROM delivery_attempts WHERE delivery_id = $1 AND action_id = $2",
        )
        .bind(delivery_id)
        .bind(action_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(max)
    }

    /// The most recent attempt per action of a delivery, for rollup.
    #[instrument(skip(self), fields(delivery_id = %delivery_id), err)]
    pub async fn latest_attempts_per_action(&mut self, delivery_id: DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            SELECT DISTINCT ON (action_id) * FROM delivery_attempts
            WHERE delivery_id = $1
            ORDER BY action_id, attempt_number DESC
            "#,
        )
        .bind(delivery_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(attempts)
    }
}
