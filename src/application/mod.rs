//! Application layer services implementing business logic.
//!
//! Services consume repository traits and the click/job seams from the
//! domain layer and provide a clean API for HTTP handlers.
//!
//! # Available Services
//!
//! - [`services::resolver::RedirectResolver`] - Geo-aware redirect decisions
//! - [`services::link_events::LinkEventService`] - Link lifecycle events and evaluation scheduling
//! - [`services::auth_service::AuthService`] - API token authentication

pub mod services;
