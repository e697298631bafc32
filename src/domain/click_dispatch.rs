//! Hand-off of click events from the redirect path to the aggregators.

use crate::domain::entities::ClickEvent;

/// Click ingestion failures. None of them ever fail a redirect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClickError {
    /// The aggregator inbox is full; the click is dropped so redirects never wait.
    #[error("click aggregator for link {link_id} is overloaded")]
    ActorOverload { link_id: i64 },
    /// The aggregator stopped and could not be replaced.
    #[error("click aggregator for link {link_id} is unavailable")]
    ActorGone { link_id: i64 },
    /// No such link; no aggregator is started for it.
    #[error("link {link_id} does not exist")]
    UnknownLink { link_id: i64 },
    #[error("link lookup failed: {0}")]
    Lookup(String),
}

/// Non-blocking sink for click events.
///
/// Implementations must return immediately: the redirect response is never
/// delayed by analytics.
///
/// # Implementations
///
/// - [`crate::analytics::AggregatorRegistry`] - routes events to per-link actors
#[cfg_attr(test, mockall::automock)]
pub trait ClickDispatcher: Send + Sync {
    /// Hands one event to the aggregator owning `event.link_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::ActorOverload`] when the event had to be dropped.
    fn dispatch(&self, event: ClickEvent) -> Result<(), ClickError>;
}
