//! Handlers for link lifecycle events from the link management service.

use axum::{Json, extract::State, http::StatusCode};
use validator::Validate;

use crate::api::dto::link_events::{
    LinkCreatedRequest, LinkDeletedRequest, LinkDeletedResponse, LinkEventResponse,
    LinkUpdatedRequest,
};
use crate::error::AppError;
use crate::state::AppState;

/// Mirrors a new link and schedules evaluation of its destinations.
///
/// # Endpoint
///
/// `POST /api/events/link-created`
///
/// # Response
///
/// `202 Accepted` with the number of evaluation jobs queued.
///
/// # Errors
///
/// - 400 Bad Request on validation failures
/// - 409 Conflict if the id is already mirrored under another short code
pub async fn link_created_handler(
    State(state): State<AppState>,
    Json(payload): Json<LinkCreatedRequest>,
) -> Result<(StatusCode, Json<LinkEventResponse>), AppError> {
    payload.validate()?;

    let (link, rules) = payload.into_parts();
    let link_id = link.id;
    let enqueued = state.link_events.link_created(link, rules).await?;

    Ok((StatusCode::ACCEPTED, Json(LinkEventResponse { link_id, enqueued })))
}

/// `POST /api/events/link-updated`
///
/// Re-evaluates every destination of the link and drops its cached copy.
/// Short codes are immutable: changing one yields 409 Conflict.
pub async fn link_updated_handler(
    State(state): State<AppState>,
    Json(payload): Json<LinkUpdatedRequest>,
) -> Result<(StatusCode, Json<LinkEventResponse>), AppError> {
    payload.validate()?;

    let (link, rules, changed_fields) = payload.into_parts();
    let link_id = link.id;
    let enqueued = state
        .link_events
        .link_updated(link, rules, &changed_fields)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(LinkEventResponse { link_id, enqueued })))
}

/// `POST /api/events/link-deleted`
pub async fn link_deleted_handler(
    State(state): State<AppState>,
    Json(payload): Json<LinkDeletedRequest>,
) -> Result<Json<LinkDeletedResponse>, AppError> {
    payload.validate()?;

    let deleted = state.link_events.link_deleted(payload.link_id).await?;

    Ok(Json(LinkDeletedResponse {
        link_id: payload.link_id,
        deleted,
    }))
}
