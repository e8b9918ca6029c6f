//! Database models for deliveries and delivery attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::actions::ActionId;
use super::sources::SourceId;

/// Delivery ID type alias for type safety.
pub type DeliveryId = Uuid;

/// Attempt ID type alias for type safety.
pub type AttemptId = Uuid;

/// Lifecycle status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Persisted, waiting for a worker to claim it.
    Pending,
    /// Claimed by a worker; fan-out in flight or retries outstanding.
    Processing,
    /// Every kept action succeeded, or there was nothing to dispatch.
    Completed,
    /// An action exhausted its retries, or the transform script failed.
    Failed,
    /// Persisted without fan-out because the source is in record mode.
    Recorded,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Recorded => "recorded",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "recorded" => Ok(Self::Recorded),
            _ => Err(format!("Unknown delivery status: {s}")),
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown attempt status: {s}")),
        }
    }
}

/// Database model for one received webhook.
///
/// `payload` holds the raw body bytes exactly as received; `headers` is the
/// captured header whitelist as a JSON map. The `transformed_*` columns are
/// set once a transform script has run and become authoritative for every
/// later dispatch of this delivery.
#[derive(Debug, Clone, FromRow)]
pub struct Delivery {
    pub id: DeliveryId,
    pub source_id: SourceId,
    pub idempotency_key: String,
    pub headers: serde_json::Value,
    pub payload: Vec<u8>,
    pub status: String,
    pub received_at: DateTime<Utc>,
    pub transformed_payload: Option<Vec<u8>>,
    pub transformed_headers: Option<serde_json::Value>,
}

impl Delivery {
    /// Get the parsed delivery status.
    pub fn delivery_status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or(DeliveryStatus::Pending)
    }

    /// Payload bytes to dispatch: transformed if present, original otherwise.
    pub fn effective_payload(&self) -> &[u8] {
        self.transformed_payload.as_deref().unwrap_or(&self.payload)
    }

    /// Headers to forward: transformed if present, original otherwise.
    pub fn effective_headers(&self) -> &serde_json::Value {
        self.transformed_headers.as_ref().unwrap_or(&self.headers)
    }
}

/// Database model for one dispatch attempt of one action.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryAttempt {
    pub id: AttemptId,
    pub delivery_id: DeliveryId,
    pub action_id: ActionId,
    pub attempt_number: i32,
    pub status: String,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    /// Get the parsed attempt status.
    pub fn attempt_status(&self) -> AttemptStatus {
        self.status.parse().unwrap_or(AttemptStatus::Pending)
    }
}

/// Fields written back to an attempt after it ran.
#[derive(Debug, Clone, Default)]
pub struct AttemptUpdateDBRequest {
    pub status: AttemptStatus,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl Default for AttemptStatus {
    fn default() -> Self {
        Self::Pending
    }
}
