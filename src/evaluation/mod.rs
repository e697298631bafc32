//! Background evaluation of link destinations.
//!
//! Link events and the stale sweep feed [`queue::EvaluationQueue`]; the
//! [`queue::QueueWorker`] hands each job to [`workflow::EvaluationEngine`],
//! which walks a checkpointed state machine and writes the verdict the
//! redirect resolver reads.
//!
//! ```text
//! link event ─┐
//!             ├─► EvaluationQueue ─► QueueWorker ─► EvaluationEngine
//! sweeper ────┘                                       │
//!                      Fetching → Rendering → Scoring → Persisting → Done
//!                          └──► Failing (dead record) → Failed
//! ```
//!
//! Failures here never reach the redirect path; the worst visible effect is
//! a stale verdict.

pub mod fetcher;
pub mod queue;
pub mod renderer;
pub mod scorer;
pub mod sweeper;
pub mod workflow;

use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

use crate::error::AppError;

pub use fetcher::{FetchError, HttpFetcher, PageFetcher};
pub use queue::{EvaluationQueue, JobHandler, JobOutcome, QueueSettings, QueueWorker};
pub use renderer::{HtmlRenderer, PageRenderer, RenderError};
pub use scorer::{ContentScorer, HttpInferenceClient, InferenceClient, InferenceError, Score};
pub use sweeper::{StaleSweeper, SweepSettings};
pub use workflow::{EngineSettings, EvaluationEngine};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Errors that end a workflow run early.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// A repository call failed; the job is worth retrying.
    #[error("evaluation store error: {0}")]
    Store(#[from] AppError),
    /// The delivery budget is spent; the destination is recorded as dead.
    #[error("evaluation of {destination_url} abandoned after {deliveries} deliveries: {reason}")]
    Fatal {
        destination_url: String,
        deliveries: u32,
        reason: String,
    },
}

/// Delay before retry number `attempt` (1-based): `base`, `2*base`, `4*base`, ...
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    ExponentialBackoff::from_millis(2)
        .factor(base_ms)
        .max_delay(MAX_BACKOFF * 2)
        .map(|d| d / 2)
        .nth(attempt.saturating_sub(1) as usize)
        .unwrap_or(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(Duration::from_secs(10), 20), MAX_BACKOFF);
    }
}
