//! Database models for webhook sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Source ID type alias for type safety.
pub type SourceId = Uuid;

/// How a source handles incoming webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Persist deliveries without dispatching them.
    Record,
    /// Persist and fan out to the source's actions.
    Active,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Active => "active",
        }
    }
}

impl std::str::FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" => Ok(Self::Record),
            "active" => Ok(Self::Active),
            _ => Err(format!("Unknown source mode: {s}")),
        }
    }
}

/// Database model for a webhook source.
#[derive(Debug, Clone, FromRow)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub slug: String,
    pub mode: String,
    pub script_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Get the parsed source mode.
    pub fn source_mode(&self) -> SourceMode {
        self.mode.parse().unwrap_or(SourceMode::Record)
    }

    /// Whether this source carries a non-empty transform script.
    pub fn transform_script(&self) -> Option<&str> {
        self.script_body.as_deref().filter(|s| !s.is_empty())
    }
}

/// Request to create a new source.
#[derive(Debug, Clone)]
pub struct SourceCreateDBRequest {
    pub name: String,
    pub slug: String,
    pub mode: SourceMode,
    pub script_body: Option<String>,
}

/// Request to update a source. `None` fields are preserved; `clear_script`
/// forces `script_body` to null regardless of the `script_body` field.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdateDBRequest {
    pub name: Option<String>,
    pub mode: Option<SourceMode>,
    pub script_body: Option<String>,
    pub clear_script: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips() {
        assert_eq!("record".parse::<SourceMode>().unwrap(), SourceMode::Record);
        assert_eq!("active".parse::<SourceMode>().unwrap(), SourceMode::Active);
        assert_eq!(SourceMode::Active.as_str(), "active");
        assert!("paused".parse::<SourceMode>().is_err());
    }

    #[test]
    fn empty_script_is_not_a_transform() {
        let source = Source {
            id: Uuid::new_v4(),
            name: "Billing".to_string(),
            slug: "billing".to_string(),
            mode: "active".to_string(),
            script_body: Some(String::new()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(source.transform_script().is_none());
    }
}
