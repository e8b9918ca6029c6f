//! Admin handlers for source management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::instrument;

use crate::AppState;
use crate::api::models::sources::{SourceCreate, SourceResponse, SourceUpdate};
use crate::db::handlers::Sources;
use crate::db::models::sources::{SourceCreateDBRequest, SourceMode, SourceUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::script;

/// Derive a URL-safe slug from a display name: lowercase, spaces to dashes,
/// anything outside `[a-z0-9-]` removed, dash runs collapsed.
pub fn generate_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;

    for c in name.to_lowercase().chars() {
        let c = if c == ' ' { '-' } else { c };
        match c {
            'a'..='z' | '0'..='9' => {
                slug.push(c);
                last_dash = false;
            }
            '-' if !last_dash => {
                slug.push('-');
                last_dash = true;
            }
            _ => {}
        }
    }

    slug.trim_matches('-').to_string()
}

#[instrument(skip_all)]
pub async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<SourceResponse>>> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let sources = Sources::new(&mut conn).list().await?;
    Ok(Json(sources.into_iter().map(Into::into).collect()))
}

#[instrument(skip_all)]
pub async fn create_source(
    State(state): State<AppState>,
    Json(request): Json<SourceCreate>,
) -> Result<(StatusCode, Json<SourceResponse>)> {
    if request.name.is_empty() {
        return Err(Error::bad_request("name is required"));
    }

    let slug = match request.slug {
        Some(slug) if !slug.is_empty() => slug,
        _ => generate_slug(&request.name),
    };
    if slug.is_empty() {
        return Err(Error::bad_request("could not generate slug from name"));
    }

    // New sources default to record mode.
    let mode = request.mode.unwrap_or(SourceMode::Record);

    if let Some(script_body) = request.script_body.as_deref().filter(|s| !s.is_empty()) {
        script::validate_transform(script_body).map_err(Error::invalid_script)?;
    }

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let source = Sources::new(&mut conn)
        .create(&SourceCreateDBRequest {
            name: request.name,
            slug,
            mode,
            script_body: request.script_body,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(source.into())))
}

#[instrument(skip_all, fields(slug = %slug))]
pub async fn get_source(State(state): State<AppState>, Path(slug): Path<String>) -> Result<Json<SourceResponse>> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let source = Sources::new(&mut conn)
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| Error::not_found("Source", &slug))?;

    Ok(Json(source.into()))
}

#[instrument(skip_all, fields(slug = %slug))]
pub async fn update_source(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<SourceUpdate>,
) -> Result<Json<SourceResponse>> {
    if let Some(script_body) = request.script_body.as_deref().filter(|s| !s.is_empty()) {
        script::validate_transform(script_body).map_err(Error::invalid_script)?;
    }

    // An explicit empty string means "clear the script".
    let clear_script = request.script_body.as_deref() == Some("");

    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let source = Sources::new(&mut conn)
        .update(
            &slug,
            &SourceUpdateDBRequest {
                name: request.name,
                mode: request.mode,
                script_body: request.script_body.filter(|s| !s.is_empty()),
                clear_script,
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("Source", &slug))?;

    Ok(Json(source.into()))
}

#[instrument(skip_all, fields(slug = %slug))]
pub async fn delete_source(State(state): State<AppState>, Path(slug): Path<String>) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(Error::from)?;
    let deleted = Sources::new(&mut conn).delete(&slug).await?;
    if !deleted {
        return Err(Error::not_found("Source", &slug));
    }

    Ok(StatusCode::NO_CONTENT)
}
