//! Request helpers shared by HTTP handlers.
//!
//! - [`region`] - Requester region extraction from a configurable header

pub mod region;
