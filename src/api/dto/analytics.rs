//! DTOs for click analytics endpoints.

use serde::Serialize;

use crate::analytics::BucketView;

/// Response of `POST /api/links/{link_id}/flush`.
#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub link_id: i64,
    /// The bucket that was closed, or `null` when none was open.
    pub flushed: Option<BucketView>,
}
