//! Webhook ingest: `POST /webhooks/{slug}`.
//!
//! Ingest persists first and enqueues second. A queue failure is logged and
//! swallowed; the pending poller re-injects the delivery. The endpoint never
//! blocks on fan-out.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use tracing::instrument;
use uuid::Uuid;

use crate::AppState;
use crate::api::models::deliveries::IngestResponse;
use crate::db::handlers::{Deliveries, Sources};
use crate::db::models::deliveries::DeliveryStatus;
use crate::db::models::sources::SourceMode;
use crate::errors::{Error, Result};
use crate::queue::DELIVERIES_TOPIC;

/// Request headers captured into the stored delivery.
const CAPTURED_HEADERS: &[&str] = &["Content-Type", "X-Request-ID", "X-Webhook-ID"];

/// Header producers use to dedupe redeliveries.
const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";

#[instrument(skip_all, fields(source_slug = %source_slug))]
pub async fn ingest(
    State(state): State<AppState>,
    Path(source_slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;

    let source = Sources::new(&mut conn)
        .get_by_slug(&source_slug)
        .await?
        .ok_or_else(|| Error::not_found("Source", &source_slug))?;

    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        return Err(Error::bad_request("invalid JSON payload"));
    }

    let mut captured = serde_json::Map::new();
    for key in CAPTURED_HEADERS {
        if let Some(value) = headers.get(*key).and_then(|v| v.to_str().ok()) {
            captured.insert((*key).to_string(), serde_json::Value::String(value.to_string()));
        }
    }
    let headers_json = serde_json::Value::Object(captured);

    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut deliveries = Deliveries::new(&mut conn);
    let (delivery, created) = deliveries
        .create_or_get(source.id, &idempotency_key, &headers_json, &body)
        .await?;

    // Record mode: store only, no fan-out.
    if source.source_mode() == SourceMode::Record {
        if created {
            deliveries.update_status(delivery.id, DeliveryStatus::Recorded).await?;
        }
        let status = if created { DeliveryStatus::Recorded } else { delivery.delivery_status() };
        return Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                delivery_id: delivery.id,
                status,
            }),
        ));
    }

    // Active mode: hand the id to the fan-out workers. Best effort only —
    // the delivery is already durable with status=pending, and the pending
    // poller picks up anything the stream misses.
    if delivery.delivery_status() == DeliveryStatus::Pending {
        if let Err(e) = state.queue.publish(DELIVERIES_TOPIC, delivery.id).await {
            tracing::warn!(error = %e, delivery_id = %delivery.id, "Failed to publish delivery to queue");
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            delivery_id: delivery.id,
            status: delivery.delivery_status(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Sources;
    use crate::db::models::sources::SourceCreateDBRequest;
    use crate::test_utils::test_server;
    use sqlx::PgPool;

    async fn seed_source(pool: &PgPool, slug: &str, mode: SourceMode) {
        let mut conn = pool.acquire().await.unwrap();
        Sources::new(&mut conn)
            .create(&SourceCreateDBRequest {
                name: slug.to_string(),
                slug: slug.to_string(),
                mode,
                script_body: None,
            })
            .await
            .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn unknown_slug_is_404(pool: PgPool) {
        let server = test_server(pool);
        let response = server.post("/webhooks/ghost").json(&serde_json::json!({"x": 1})).await;
        response.assert_status_not_found();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn invalid_json_is_400(pool: PgPool) {
        seed_source(&pool, "billing", SourceMode::Active).await;
        let server = test_server(pool);

        let response = server
            .post("/webhooks/billing")
            .add_header("Content-Type", "application/json")
            .text("{not json")
            .await;
        response.assert_status_bad_request();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn accepted_webhook_is_persisted_pending(pool: PgPool) {
        seed_source(&pool, "billing", SourceMode::Active).await;
        let server = test_server(pool.clone());

        let response = server
            .post("/webhooks/billing")
            .add_header("X-Idempotency-Key", "k1")
            .add_header("X-Request-ID", "r1")
            .json(&serde_json::json!({"event": "paid", "amt": 10}))
            .await;

        response.assert_status(StatusCode::ACCEPTED);
        let body: IngestResponse = response.json();
        assert_eq!(body.status, DeliveryStatus::Pending);

        let mut conn = pool.acquire().await.unwrap();
        let delivery = Deliveries::new(&mut conn)
            .get_by_id(body.delivery_id)
            .await
            .unwrap()
            .expect("delivery persisted");
        assert_eq!(delivery.idempotency_key, "k1");
        let stored: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(stored, serde_json::json!({"event": "paid", "amt": 10}));
        assert_eq!(delivery.headers["X-Request-ID"], "r1");
        assert_eq!(delivery.headers["Content-Type"], "application/json");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn replay_returns_the_same_delivery(pool: PgPool) {
        seed_source(&pool, "billing", SourceMode::Active).await;
        let server = test_server(pool.clone());

        let first: IngestResponse = server
            .post("/webhooks/billing")
            .add_header("X-Idempotency-Key", "k1")
            .json(&serde_json::json!({"event": "paid"}))
            .await
            .json();

        let second: IngestResponse = server
            .post("/webhooks/billing")
            .add_header("X-Idempotency-Key", "k1")
            .json(&serde_json::json!({"event": "paid"}))
            .await
            .json();

        assert_eq!(first.delivery_id, second.delivery_id);

        let mut conn = pool.acquire().await.unwrap();
        let all = Deliveries::new(&mut conn).list(None, 200).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn missing_idempotency_key_gets_a_fresh_one(pool: PgPool) {
        seed_source(&pool, "billing", SourceMode::Active).await;
        let server = test_server(pool.clone());

        let first: IngestResponse = server.post("/webhooks/billing").json(&serde_json::json!({"n": 1})).await.json();
        let second: IngestResponse = server.post("/webhooks/billing").json(&serde_json::json!({"n": 1})).await.json();

        assert_ne!(first.delivery_id, second.delivery_id);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn record_mode_stores_without_fanout(pool: PgPool) {
        seed_source(&pool, "audit", SourceMode::Record).await;
        let server = test_server(pool.clone());

        let response = server.post("/webhooks/audit").json(&serde_json::json!({"x": 1})).await;
        response.assert_status(StatusCode::ACCEPTED);
        let body: IngestResponse = response.json();
        assert_eq!(body.status, DeliveryStatus::Recorded);

        let mut conn = pool.acquire().await.unwrap();
        let mut deliveries = Deliveries::new(&mut conn);
        let delivery = deliveries.get_by_id(body.delivery_id).await.unwrap().unwrap();
        assert_eq!(delivery.delivery_status(), DeliveryStatus::Recorded);
        assert!(deliveries.list_attempts(delivery.id).await.unwrap().is_empty());
    }
}
