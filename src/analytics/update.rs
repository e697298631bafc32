//! Messages pushed to analytics subscribers.

use serde::Serialize;

use crate::domain::entities::{ClickAggregate, DeviceClass};

/// Lifecycle of a click bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketState {
    /// Accepting increments for the current window.
    Open,
    /// Window ended; draining clicks already in the inbox.
    Closing,
    /// Persisted and immutable.
    Flushed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterView {
    pub region_code: String,
    pub device_class: DeviceClass,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketView {
    pub bucket_start_ms: i64,
    pub state: BucketState,
    pub total: u64,
    pub counts: Vec<CounterView>,
}

impl BucketView {
    pub fn from_aggregate(aggregate: &ClickAggregate, state: BucketState) -> Self {
        Self {
            bucket_start_ms: aggregate.bucket_start_ms,
            state,
            total: aggregate.total(),
            counts: aggregate
                .counts
                .iter()
                .map(|(key, count)| CounterView {
                    region_code: key.region_code.clone(),
                    device_class: key.device_class,
                    count: *count,
                })
                .collect(),
        }
    }
}

/// One message on a link's analytics channel.
///
/// Subscribers first get a [`AnalyticsUpdate::Snapshot`], then deltas.
/// A delta carries the new absolute value of one counter, so applying it
/// twice is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalyticsUpdate {
    Snapshot {
        link_id: i64,
        buckets: Vec<BucketView>,
    },
    Delta {
        link_id: i64,
        bucket_start_ms: i64,
        counter: CounterView,
    },
    Flushed {
        link_id: i64,
        bucket: BucketView,
    },
}

impl AnalyticsUpdate {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::Delta { .. } => "delta",
            Self::Flushed { .. } => "flushed",
        }
    }
}
