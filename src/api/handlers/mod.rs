//! HTTP request handlers for API endpoints.
//!
//! Each handler module corresponds to a logical grouping of endpoints.

pub mod analytics;
pub mod evaluations;
pub mod health;
pub mod link_events;
pub mod redirect;

pub use analytics::{aggregate_handler, analytics_stream_handler, flush_handler};
pub use evaluations::evaluation_handler;
pub use health::health_handler;
pub use link_events::{link_created_handler, link_deleted_handler, link_updated_handler};
pub use redirect::redirect_handler;
