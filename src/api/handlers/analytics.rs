//! Handlers for live and persisted click analytics.

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt, stream};
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::analytics::{AnalyticsSubscription, AnalyticsUpdate, BucketState, BucketView};
use crate::api::dto::analytics::FlushResponse;
use crate::domain::click_dispatch::ClickError;
use crate::error::AppError;
use crate::state::AppState;

fn to_event(update: &AnalyticsUpdate) -> Event {
    Event::default()
        .event(update.event_name())
        .json_data(update)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}


/// Streams a link's click counters as Server-Sent Events.
///
/// # Endpoint
///
/// `GET /api/links/{link_id}/analytics`
///
/// # Events
///
/// - `snapshot` - sent once: recent flushed buckets and the open bucket
/// - `delta` - new absolute value of one `(region, device)` counter
/// - `flushed` - a bucket was closed and persisted
/// - `lagged` - the client fell behind and missed updates; reconnect for a
///   fresh snapshot
pub async fn analytics_stream_handler(
    State(state): State<AppState>,
    Path(link_id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let AnalyticsSubscription { snapshot, updates } =
        state.aggregators.subscribe(link_id).await.map_err(|e| match e {
            ClickError::UnknownLink { link_id } => {
                AppError::not_found("Link not found", json!({ "link_id": link_id }))
            }
            other => AppError::internal("Analytics unavailable", json!({ "reason": other.to_string() })),
        })?;

    let first = stream::once(async move { Ok(to_event(&snapshot)) });
    let rest = stream::unfold(updates, move |mut updates| async move {
        match updates.recv().await {
            Ok(update) => Some((Ok(to_event(&update)), updates)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(link_id, skipped, "Analytics subscriber lagged");
                Some((
                    Ok(Event::default().event("lagged").data(skipped.to_string())),
                    updates,
                ))
            }
            Err(RecvError::Closed) => None,
        }
    });

    Ok(Sse::new(first.chain(rest)).keep_alive(KeepAlive::default()))
}

/// Returns a persisted click bucket.
///
/// # Endpoint
///
/// `GET /api/links/{link_id}/aggregates/{bucket_start_ms}`
pub async fn aggregate_handler(
    State(state): State<AppState>,
    Path((link_id, bucket_start_ms)): Path<(i64, i64)>,
) -> Result<Json<BucketView>, AppError> {
    state
        .aggregates
        .get(link_id, bucket_start_ms)
        .await?
        .map(|aggregate| Json(BucketView::from_aggregate(&aggregate, BucketState::Flushed)))
        .ok_or_else(|| {
            AppError::not_found(
                "Aggregate not found",
                json!({ "link_id": link_id, "bucket_start_ms": bucket_start_ms }),
            )
        })
}

/// Closes and persists the link's open bucket now.
///
/// # Endpoint
///
/// `POST /api/links/{link_id}/flush`
pub async fn flush_handler(
    State(state): State<AppState>,
    Path(link_id): Path<i64>,
) -> Result<Json<FlushResponse>, AppError> {
    let flushed = state.aggregators.flush(link_id).await.map_err(|e| {
        AppError::internal("Flush failed", json!({ "reason": e.to_string() }))
    })?;

    Ok(Json(FlushResponse {
        link_id,
        flushed: flushed.map(|aggregate| BucketView::from_aggregate(&aggregate, BucketState::Flushed)),
    }))
}
