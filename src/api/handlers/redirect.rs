//! Handler for short URL redirect.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::application::services::Resolution;
use crate::domain::entities::DeviceClass;
use crate::error::AppError;
use crate::state::AppState;
use crate::utils::region::region_from_headers;

/// Header exposing the verdict the routing decision was based on.
pub const EVALUATION_HINT_HEADER: &str = "x-evaluation-hint";

/// Redirects a short code to the destination chosen for the requester's region.
///
/// # Endpoint
///
/// `GET /{code}`
///
/// # Request Flow
///
/// 1. Read the requester region from the configured header (`XX` if absent)
/// 2. Classify the device from `User-Agent`
/// 3. Resolve via [`crate::application::services::RedirectResolver`]
/// 4. Redirect with the configured status (302 or 307)
///
/// One click event is handed to the aggregators per successful redirect;
/// the response never waits for it.
///
/// # Errors
///
/// Returns 404 Not Found if the short code is unknown or disabled.
pub async fn redirect_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let region = region_from_headers(&headers, &state.settings.region_header);
    let device_class = DeviceClass::from_user_agent(
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok()),
    );

    let resolution = state.resolver.resolve(&code, &region, device_class).await?;
    debug!(
        code,
        region,
        destination = %resolution.destination,
        hint = %resolution.evaluation_hint,
        "Redirecting"
    );

    Ok(redirect_response(state.settings.redirect_status, &resolution))
}

fn redirect_response(status: u16, resolution: &Resolution) -> Response {
    let status = match status {
        307 => StatusCode::TEMPORARY_REDIRECT,
        _ => StatusCode::FOUND,
    };

    let Ok(location) = HeaderValue::from_str(&resolution.destination) else {
        return AppError::internal(
            "Destination is not a valid Location header",
            serde_json::json!({ "link_id": resolution.link_id }),
        )
        .into_response();
    };

    (
        status,
        [
            (header::LOCATION, location),
            (
                header::HeaderName::from_static(EVALUATION_HINT_HEADER),
                HeaderValue::from_static(resolution.evaluation_hint.as_str()),
            ),
        ],
    )
        .into_response()
}
