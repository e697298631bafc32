//! Handler for evaluation record lookups.

use axum::{
    Json,
    extract::{Query, State},
};
use serde_json::json;
use validator::Validate;

use crate::api::dto::evaluation::EvaluationQuery;
use crate::domain::entities::EvaluationRecord;
use crate::error::AppError;
use crate::state::AppState;

/// Returns the latest evaluation record of a destination URL.
///
/// # Endpoint
///
/// `GET /api/evaluations?url=https://example.com/page`
///
/// # Errors
///
/// - 400 Bad Request if `url` is not a valid URL
/// - 404 Not Found if the destination was never evaluated
pub async fn evaluation_handler(
    State(state): State<AppState>,
    Query(query): Query<EvaluationQuery>,
) -> Result<Json<EvaluationRecord>, AppError> {
    query.validate()?;

    state
        .evaluations
        .get(&query.url)
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::not_found(
                "No evaluation for destination",
                json!({ "url": query.url }),
            )
        })
}
