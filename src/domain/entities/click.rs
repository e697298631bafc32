//! Click events and their per-bucket aggregates.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Coarse device family derived from the `User-Agent` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceClass {
    /// Classifies a user agent string.
    ///
    /// Order matters: tablets advertise "Mobile" in some browsers and bots
    /// frequently impersonate desktop browsers.
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent.map(str::to_ascii_lowercase) else {
            return Self::Unknown;
        };
        if ua.trim().is_empty() {
            return Self::Unknown;
        }

        const BOT_MARKERS: [&str; 6] = ["bot", "crawler", "spider", "slurp", "curl/", "wget/"];
        if BOT_MARKERS.iter().any(|m| ua.contains(m)) {
            return Self::Bot;
        }
        if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
            return Self::Tablet;
        }
        if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
            return Self::Mobile;
        }
        if ua.contains("windows") || ua.contains("macintosh") || ua.contains("x11") || ua.contains("linux") {
            return Self::Desktop;
        }

        Self::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Bot => "bot",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            "tablet" => Ok(Self::Tablet),
            "bot" => Ok(Self::Bot),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown device class '{other}'")),
        }
    }
}

/// A single resolved redirect, routed to the aggregator that owns `link_id`.
///
/// Raw events are never persisted; only their aggregates are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickEvent {
    pub link_id: i64,
    pub region_code: String,
    pub device_class: DeviceClass,
    pub timestamp_ms: i64,
}

impl ClickEvent {
    pub fn new(link_id: i64, region_code: &str, device_class: DeviceClass, timestamp_ms: i64) -> Self {
        Self {
            link_id,
            region_code: region_code.to_string(),
            device_class,
            timestamp_ms,
        }
    }

    /// Creates an event stamped with the current wall clock.
    pub fn now(link_id: i64, region_code: &str, device_class: DeviceClass) -> Self {
        Self::new(
            link_id,
            region_code,
            device_class,
            chrono::Utc::now().timestamp_millis(),
        )
    }
}

/// Counter dimension inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CountKey {
    pub region_code: String,
    pub device_class: DeviceClass,
}

impl CountKey {
    pub fn new(region_code: &str, device_class: DeviceClass) -> Self {
        Self {
            region_code: region_code.to_string(),
            device_class,
        }
    }
}

/// Click counts of one link within one time bucket.
///
/// Keyed by `(link_id, bucket_start_ms)`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickAggregate {
    pub link_id: i64,
    pub bucket_start_ms: i64,
    #[serde_as(as = "Vec<(_, _)>")]
    pub counts: BTreeMap<CountKey, u64>,
}

impl ClickAggregate {
    pub fn new(link_id: i64, bucket_start_ms: i64) -> Self {
        Self {
            link_id,
            bucket_start_ms,
            counts: BTreeMap::new(),
        }
    }

    /// Adds one click and returns the new count for its dimension.
    pub fn increment(&mut self, region_code: &str, device_class: DeviceClass) -> u64 {
        let count = self
            .counts
            .entry(CountKey::new(region_code, device_class))
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Adds every counter of `other` into `self`.
    pub fn merge(&mut self, other: &ClickAggregate) {
        for (key, count) in &other.counts {
            *self.counts.entry(key.clone()).or_insert(0) += count;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Counts summed over device classes.
    pub fn counts_by_region(&self) -> BTreeMap<String, u64> {
        let mut by_region = BTreeMap::new();
        for (key, count) in &self.counts {
            *by_region.entry(key.region_code.clone()).or_insert(0) += count;
        }
        by_region
    }
}
