//! Requester region extraction from HTTP request headers.

use axum::http::HeaderMap;

/// Region used when the request carries no usable region header.
///
/// Matches no geo rule, so such requests always get the default destination.
pub const UNKNOWN_REGION: &str = "XX";

const MAX_REGION_LEN: usize = 16;

/// Reads the requester region from `header_name`.
///
/// The value is trimmed and upper-cased. Missing, empty, non-UTF-8 or
/// malformed values (anything but ASCII letters, digits and `-`) yield
/// [`UNKNOWN_REGION`].
///
/// # Examples
///
/// ```ignore
/// let mut headers = HeaderMap::new();
/// headers.insert("cf-ipcountry", "de".parse().unwrap());
///
/// assert_eq!(region_from_headers(&headers, "cf-ipcountry"), "DE");
/// ```
pub fn region_from_headers(headers: &HeaderMap, header_name: &str) -> String {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| {
            !value.is_empty()
                && value.len() <= MAX_REGION_LEN
                && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| UNKNOWN_REGION.to_string())
}
