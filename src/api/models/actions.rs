//! API request/response models for actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::actions::{Action, ActionId, ActionType};
use crate::db::models::sources::SourceId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub id: ActionId,
    pub source_id: SourceId,
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Action> for ActionResponse {
    fn from(action: Action) -> Self {
        let kind = action.action_type();
        Self {
            id: action.id,
            source_id: action.source_id,
            kind,
            target_url: action.target_url,
            script_body: action.script_body,
            signing_secret: action.signing_secret,
            is_active: action.is_active,
            created_at: action.created_at,
            updated_at: action.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionCreate {
    #[serde(rename = "type", default)]
    pub kind: Option<ActionType>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub script_body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionUpdate {
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub script_body: Option<String>,
}
