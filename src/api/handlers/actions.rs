//! Admin handlers for action management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::instrument;
use url::Url;

use crate::AppState;
use crate::api::models::actions::{ActionCreate, ActionResponse, ActionUpdate};
use crate::db::handlers::{Actions, Sources};
use crate::db::models::actions::{Action, ActionCreateDBRequest, ActionId, ActionType, ActionUpdateDBRequest};
use crate::db::models::sources::Source;
use crate::errors::{Error, Result};
use crate::script;

async fn resolve_source(state: &AppState, slug: &str) -> Result<Source> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    Sources::new(&mut conn)
        .get_by_slug(slug)
        .await?
        .ok_or_else(|| Error::not_found("Source", slug))
}

/// Fetch an action and check it belongs to the addressed source.
async fn resolve_action(state: &AppState, source: &Source, id: ActionId) -> Result<Action> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let action = Actions::new(&mut conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Action", id))?;

    if action.source_id != source.id {
        return Err(Error::not_found("Action", id));
    }

    Ok(action)
}

fn validate_target_url(target_url: &str) -> Result<()> {
    Url::parse(target_url).map_err(|_| Error::bad_request("target_url must be a valid URL"))?;
    Ok(())
}

#[instrument(skip_all, fields(slug = %slug))]
pub async fn create_action(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<ActionCreate>,
) -> Result<(StatusCode, Json<ActionResponse>)> {
    let source = resolve_source(&state, &slug).await?;

    let kind = request.kind.unwrap_or(ActionType::Webhook);
    match kind {
        ActionType::Webhook => {
            let target_url = request
                .target_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| Error::bad_request("target_url is required for webhook actions"))?;
            validate_target_url(target_url)?;
        }
        ActionType::Javascript => {
            let script_body = request
                .script_body
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::bad_request("script_body is required for javascript actions"))?;
            script::validate_action(script_body).map_err(Error::invalid_script)?;
        }
    }

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let action = Actions::new(&mut conn)
        .create(&ActionCreateDBRequest {
            source_id: source.id,
            kind,
            target_url: request.target_url,
            signing_secret: request.signing_secret,
            script_body: request.script_body,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(action.into())))
}

#[instrument(skip_all, fields(slug = %slug))]
pub async fn list_actions(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<ActionResponse>>> {
    let source = resolve_source(&state, &slug).await?;

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let actions = Actions::new(&mut conn).list(source.id).await?;
    Ok(Json(actions.into_iter().map(Into::into).collect()))
}

#[instrument(skip_all, fields(slug = %slug, action_id = %id))]
pub async fn get_action(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, ActionId)>,
) -> Result<Json<ActionResponse>> {
    let source = resolve_source(&state, &slug).await?;
    let action = resolve_action(&state, &source, id).await?;
    Ok(Json(action.into()))
}

#[instrument(skip_all, fields(slug = %slug, action_id = %id))]
pub async fn update_action(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, ActionId)>,
    Json(request): Json<ActionUpdate>,
) -> Result<Json<ActionResponse>> {
    let source = resolve_source(&state, &slug).await?;
    resolve_action(&state, &source, id).await?;

    if let Some(target_url) = request.target_url.as_deref() {
        validate_target_url(target_url)?;
    }
    if let Some(script_body) = request.script_body.as_deref().filter(|s| !s.is_empty()) {
        script::validate_action(script_body).map_err(Error::invalid_script)?;
    }

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let action = Actions::new(&mut conn)
        .update(
            id,
            &ActionUpdateDBRequest {
                target_url: request.target_url,
                signing_secret: request.signing_secret,
                is_active: request.is_active,
                script_body: request.script_body.filter(|s| !s.is_empty()),
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("Action", id))?;

    Ok(Json(action.into()))
}

#[instrument(skip_all, fields(slug = %slug, action_id = %id))]
pub async fn delete_action(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, ActionId)>,
) -> Result<StatusCode> {
    let source = resolve_source(&state, &slug).await?;
    resolve_action(&state, &source, id).await?;

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let deleted = Actions::new(&mut conn).delete(id).await?;
    if !deleted {
        return Err(Error::not_found("Action", id));
    }

    Ok(StatusCode::NO_CONTENT)
}
