//! Business logic services for the application layer.

pub mod auth_service;
pub mod link_events;
pub mod resolver;

pub use auth_service::AuthService;
pub use link_events::LinkEventService;
pub use resolver::{RedirectResolver, Resolution, ResolutionSource, ResolverSettings};
