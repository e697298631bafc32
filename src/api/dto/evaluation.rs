//! DTOs for evaluation record lookups.

use serde::Deserialize;
use validator::Validate;

/// Query for `GET /api/evaluations`.
#[derive(Debug, Deserialize, Validate)]
pub struct EvaluationQuery {
    #[validate(url(message = "Invalid URL format"))]
    pub url: String,
}
