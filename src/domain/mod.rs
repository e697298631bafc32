//! Domain layer containing business entities and logic.
//!
//! This module implements the core domain logic following Clean Architecture principles.
//! It defines entities, repository interfaces, and the seams to the background
//! subsystems, independent of infrastructure concerns.
//!
//! # Architecture
//!
//! - [`entities`] - Core business data structures
//! - [`repositories`] - Data access trait definitions
//! - [`click_dispatch`] - Non-blocking click hand-off to the aggregators
//! - [`job_queue`] - Producer side of the evaluation queue
//!
//! # Click Processing Flow
//!
//! 1. HTTP handler resolves the short code
//! 2. [`entities::ClickEvent`] is handed to a [`click_dispatch::ClickDispatcher`]
//! 3. The per-link aggregator counts it into the open bucket
//! 4. Closed buckets are persisted via [`repositories::ClickAggregateRepository`]

pub mod click_dispatch;
pub mod entities;
pub mod job_queue;
pub mod repositories;
