//! Real-time click aggregation.
//!
//! Every link with recent traffic gets one [`actor`] task that owns its
//! counters. Clicks arrive through the [`AggregatorRegistry`], are counted
//! into time-aligned buckets and persisted when a bucket closes. Subscribers
//! receive a snapshot followed by [`AnalyticsUpdate`] deltas.
//!
//! # Bucket lifecycle
//!
//! ```text
//! Open ──window ends / flush──▶ Closing ──queued clicks drained──▶ Flushed
//! ```
//!
//! Clicks for a flushed window are dropped and counted in
//! `clicks_late_dropped_total`.

mod actor;
mod registry;
pub mod update;

pub use actor::{AggregatorSettings, AnalyticsSubscription};
pub use registry::AggregatorRegistry;
pub use update::{AnalyticsUpdate, BucketState, BucketView, CounterView};
