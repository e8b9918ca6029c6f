//! API request/response models for deliveries and attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::actions::ActionId;
use crate::db::models::deliveries::{
    AttemptId, AttemptStatus, Delivery, DeliveryAttempt, DeliveryId, DeliveryStatus,
};
use crate::db::models::sources::SourceId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub id: DeliveryId,
    pub source_id: SourceId,
    pub idempotency_key: String,
    pub headers: serde_json::Value,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformed_payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformed_headers: Option<serde_json::Value>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(delivery: Delivery) -> Self {
        let status = delivery.delivery_status();
        Self {
            id: delivery.id,
            source_id: delivery.source_id,
            idempotency_key: delivery.idempotency_key,
            headers: delivery.headers,
            payload: parse_payload(&delivery.payload),
            status,
            received_at: delivery.received_at,
            transformed_payload: delivery.transformed_payload.as_deref().map(parse_payload),
            transformed_headers: delivery.transformed_headers,
        }
    }
}

/// Payloads are stored as the raw bytes the producer sent; ingest only ever
/// accepts valid JSON, so this parse does not fail in practice.
fn parse_payload(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResponse {
    pub id: AttemptId,
    pub delivery_id: DeliveryId,
    pub action_id: ActionId,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DeliveryAttempt> for AttemptResponse {
    fn from(attempt: DeliveryAttempt) -> Self {
        let status = attempt.attempt_status();
        Self {
            id: attempt.id,
            delivery_id: attempt.delivery_id,
            action_id: attempt.action_id,
            attempt_number: attempt.attempt_number,
            status,
            response_status: attempt.response_status,
            response_body: attempt.response_body,
            error_message: attempt.error_message,
            next_retry_at: attempt.next_retry_at,
            created_at: attempt.created_at,
        }
    }
}

/// Query parameters for the delivery listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryListParams {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Body of the 202 response from webhook ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub delivery_id: DeliveryId,
    pub status: DeliveryStatus,
}
