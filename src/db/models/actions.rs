//! Database models for dispatch actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::sources::SourceId;

/// Action ID type alias for type safety.
pub type ActionId = Uuid;

/// What kind of dispatch target an action is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// POST the payload to `target_url`.
    Webhook,
    /// Run the action's `process` script over the payload.
    Javascript,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Javascript => "javascript",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "javascript" => Ok(Self::Javascript),
            _ => Err(format!("Unknown action type: {s}")),
        }
    }
}

/// Database model for a dispatch action bound to a source.
#[derive(Debug, Clone, FromRow)]
pub struct Action {
    pub id: ActionId,
    pub source_id: SourceId,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub target_url: Option<String>,
    pub script_body: Option<String>,
    pub signing_secret: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    /// Get the parsed action type.
    pub fn action_type(&self) -> ActionType {
        self.kind.parse().unwrap_or(ActionType::Webhook)
    }
}

/// Request to create a new action.
#[derive(Debug, Clone)]
pub struct ActionCreateDBRequest {
    pub source_id: SourceId,
    pub kind: ActionType,
    pub target_url: Option<String>,
    pub signing_secret: Option<String>,
    pub script_body: Option<String>,
}

/// Request to update an action. `None` fields are preserved.
#[derive(Debug, Clone, Default)]
pub struct ActionUpdateDBRequest {
    pub target_url: Option<String>,
    pub signing_secret: Option<String>,
    pub is_active: Option<bool>,
    pub script_body: Option<String>,
}
