//! API route configuration.
//!
//! All API endpoints require Bearer token authentication via
//! [`crate::api::middleware::auth`].

use crate::api::handlers::{
    aggregate_handler, analytics_stream_handler, evaluation_handler, flush_handler,
    link_created_handler, link_deleted_handler, link_updated_handler,
};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};

/// All API routes, protected by Bearer token authentication.
///
/// # Endpoints
///
/// - `POST /events/link-created`                       - Mirror a new link, queue evaluations
/// - `POST /events/link-updated`                       - Apply an update, re-evaluate destinations
/// - `POST /events/link-deleted`                       - Remove a mirrored link
/// - `GET  /evaluations?url=`                          - Latest verdict of a destination
/// - `GET  /links/{link_id}/analytics`                 - Live click counters (SSE)
/// - `GET  /links/{link_id}/aggregates/{bucket_start}` - Persisted click bucket
/// - `POST /links/{link_id}/flush`                     - Close the open click bucket now
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/events/link-created", post(link_created_handler))
        .route("/events/link-updated", post(link_updated_handler))
        .route("/events/link-deleted", post(link_deleted_handler))
        .route("/evaluations", get(evaluation_handler))
        .route("/links/{link_id}/analytics", get(analytics_stream_handler))
        .route(
            "/links/{link_id}/aggregates/{bucket_start_ms}",
            get(aggregate_handler),
        )
        .route("/links/{link_id}/flush", post(flush_handler))
}
