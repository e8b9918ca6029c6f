//! Admin handlers for delivery inspection.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use tracing::instrument;

use crate::AppState;
use crate::api::models::deliveries::{AttemptResponse, DeliveryListParams, DeliveryResponse};
use crate::db::handlers::Deliveries;
use crate::db::models::deliveries::DeliveryId;
use crate::errors::{Error, Result};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[instrument(skip_all)]
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(params): Query<DeliveryListParams>,
) -> Result<Json<Vec<DeliveryResponse>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let deliveries = Deliveries::new(&mut conn).list(params.source.as_deref(), limit).await?;

    Ok(Json(deliveries.into_iter().map(Into::into).collect()))
}

#[instrument(skip_all, fields(delivery_id = %id))]
pub async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<DeliveryId>,
) -> Result<Json<DeliveryResponse>> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let delivery = Deliveries::new(&mut conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Delivery", id))?;

    Ok(Json(delivery.into()))
}

#[instrument(skip_all, fields(delivery_id = %id))]
pub async fn list_attempts(
    State(state): State<AppState>,
    Path(id): Path<DeliveryId>,
) -> Result<Json<Vec<AttemptResponse>>> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let mut repo = Deliveries::new(&mut conn);

    repo.get_by_id(id).await?.ok_or_else(|| Error::not_found("Delivery", id))?;
    let attempts = repo.list_attempts(id).await?;

    Ok(Json(attempts.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::deliveries::IngestResponse;
    use crate::test_utils::test_server;
    use serde_json::json;
    use sqlx::PgPool;
    use uuid::Uuid;

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn list_filters_by_source_and_clamps_limit(pool: PgPool) {
        let server = test_server(pool);

        for slug in ["billing", "audit"] {
            server
                .post("/api/sources")
                .json(&json!({"name": slug, "slug": slug, "mode": "active"}))
                .await
                .assert_status(axum::http::StatusCode::CREATED);
        }

        for n in 0..3 {
            server
                .post("/webhooks/billing")
                .add_header("X-Idempotency-Key", format!("b{n}"))
                .json(&json!({"n": n}))
                .await
                .assert_status(axum::http::StatusCode::ACCEPTED);
        }
        server
            .post("/webhooks/audit")
            .json(&json!({"n": 99}))
            .await
            .assert_status(axum::http::StatusCode::ACCEPTED);

        let all: Vec<DeliveryResponse> = server.get("/api/deliveries").await.json();
        assert_eq!(all.len(), 4);

        let billing: Vec<DeliveryResponse> = server.get("/api/deliveries?source=billing").await.json();
        assert_eq!(billing.len(), 3);

        let limited: Vec<DeliveryResponse> = server.get("/api/deliveries?limit=2").await.json();
        assert_eq!(limited.len(), 2);

        // Limits beyond the cap fall back to the cap instead of erroring.
        let capped: Vec<DeliveryResponse> = server.get("/api/deliveries?limit=9999").await.json();
        assert_eq!(capped.len(), 4);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn get_and_attempts_404_on_unknown_delivery(pool: PgPool) {
        let server = test_server(pool);
        let ghost = Uuid::new_v4();

        server.get(&format!("/api/deliveries/{ghost}")).await.assert_status_not_found();
        server
            .get(&format!("/api/deliveries/{ghost}/attempts"))
            .await
            .assert_status_not_found();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[test_log::test]
    async fn delivery_detail_includes_payload_and_empty_attempts(pool: PgPool) {
        let server = test_server(pool);

        server
            .post("/api/sources")
            .json(&json!({"name": "Billing", "mode": "active"}))
            .await
            .assert_status(axum::http::StatusCode::CREATED);

        let accepted: IngestResponse = server
            .post("/webhooks/billing")
            .json(&json!({"event": "paid"}))
            .await
            .json();

        let delivery: DeliveryResponse = server
            .get(&format!("/api/deliveries/{}", accepted.delivery_id))
            .await
            .json();
        assert_eq!(delivery.payload, json!({"event": "paid"}));

        let attempts: Vec<AttemptResponse> = server
            .get(&format!("/api/deliveries/{}/attempts", accepted.delivery_id))
            .await
            .json();
        assert!(attempts.is_empty());
    }
}
