//! API request/response models for sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::sources::{Source, SourceId, SourceMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResponse {
    pub id: SourceId,
    pub name: String,
    pub slug: String,
    pub mode: SourceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Source> for SourceResponse {
    fn from(source: Source) -> Self {
        let mode = source.source_mode();
        Self {
            id: source.id,
            name: source.name,
            slug: source.slug,
            mode,
            script_body: source.script_body,
            created_at: source.created_at,
            updated_at: source.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceCreate {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub mode: Option<SourceMode>,
    #[serde(default)]
    pub script_body: Option<String>,
}

/// Partial update. An explicit empty-string `script_body` clears the script.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<SourceMode>,
    #[serde(default)]
    pub script_body: Option<String>,
}
