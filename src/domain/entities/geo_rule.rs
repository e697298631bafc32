//! Geographic routing rule attached to a link.

use serde::{Deserialize, Serialize};

/// Routes requesters from `region_code` to `destination`.
///
/// Rules are ordered by `priority` ascending; the lowest number wins. Several
/// rules may target the same region with different priorities to form a
/// fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoRule {
    pub link_id: i64,
    pub region_code: String,
    pub destination: String,
    pub priority: i32,
}

impl GeoRule {
    pub fn new(link_id: i64, region_code: &str, destination: &str, priority: i32) -> Self {
        Self {
            link_id,
            region_code: region_code.to_ascii_uppercase(),
            destination: destination.to_string(),
            priority,
        }
    }

    /// Exact region match, with no hierarchical fallback.
    ///
    /// Both sides are upper-case: rules are normalized here in [`GeoRule::new`]
    /// and requester regions by `utils::region::region_from_headers`.
    pub fn matches_region(&self, region: &str) -> bool {
        self.region_code == region
    }
}

/// Sorts rules by priority ascending, keeping insertion order for ties.
pub fn sort_by_priority(rules: &mut [GeoRule]) {
    rules.sort_by_key(|r| r.priority);
}
