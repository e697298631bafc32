//! DTOs for link lifecycle events.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::Validate;

use crate::domain::entities::{GeoRule, Link, LinkStatus};

static SHORT_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

static REGION_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{1,16}$").unwrap());

/// Link record as pushed by the link management service.
#[derive(Debug, Deserialize, Validate)]
pub struct LinkPayload {
    #[validate(range(min = 1))]
    pub id: i64,

    #[validate(length(min = 1, max = 64))]
    #[validate(regex(path = "*SHORT_CODE_REGEX"))]
    pub short_code: String,

    pub owner_id: i64,

    /// Defaults to the time the event is received.
    pub created_at: Option<DateTime<Utc>>,

    #[validate(url(message = "Invalid URL format"))]
    pub default_destination: String,

    #[serde(default = "default_status")]
    pub status: LinkStatus,
}

fn default_status() -> LinkStatus {
    LinkStatus::Active
}

impl LinkPayload {
    pub fn into_link(self) -> Link {
        Link::new(
            self.id,
            self.short_code,
            self.owner_id,
            self.created_at.unwrap_or_else(Utc::now),
            self.default_destination,
            self.status,
        )
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct GeoRulePayload {
    #[validate(regex(path = "*REGION_CODE_REGEX"))]
    pub region_code: String,

    #[validate(url(message = "Invalid URL format"))]
    pub destination: String,

    pub priority: i32,
}

impl GeoRulePayload {
    pub fn into_rule(self, link_id: i64) -> GeoRule {
        GeoRule::new(link_id, &self.region_code, &self.destination, self.priority)
    }
}

fn into_rules(payloads: Vec<GeoRulePayload>, link_id: i64) -> Vec<GeoRule> {
    payloads.into_iter().map(|r| r.into_rule(link_id)).collect()
}

/// `POST /api/events/link-created`
#[derive(Debug, Deserialize, Validate)]
pub struct LinkCreatedRequest {
    #[validate(nested)]
    pub link: LinkPayload,

    #[serde(default)]
    #[validate(nested)]
    pub geo_rules: Vec<GeoRulePayload>,
}

impl LinkCreatedRequest {
    pub fn into_parts(self) -> (Link, Vec<GeoRule>) {
        let link = self.link.into_link();
        let rules = into_rules(self.geo_rules, link.id);
        (link, rules)
    }
}

/// `POST /api/events/link-updated`
///
/// Omitting `geo_rules` keeps the stored rules; an empty list removes them.
#[derive(Debug, Deserialize, Validate)]
pub struct LinkUpdatedRequest {
    #[validate(nested)]
    pub link: LinkPayload,

    #[validate(nested)]
    pub geo_rules: Option<Vec<GeoRulePayload>>,

    #[serde(default)]
    pub changed_fields: Vec<String>,
}

impl LinkUpdatedRequest {
    pub fn into_parts(self) -> (Link, Option<Vec<GeoRule>>, Vec<String>) {
        let link = self.link.into_link();
        let rules = self.geo_rules.map(|rules| into_rules(rules, link.id));
        (link, rules, self.changed_fields)
    }
}

/// `POST /api/events/link-deleted`
#[derive(Debug, Deserialize, Validate)]
pub struct LinkDeletedRequest {
    #[validate(range(min = 1))]
    pub link_id: i64,
}

#[derive(Debug, Serialize)]
pub struct LinkEventResponse {
    pub link_id: i64,
    /// Evaluation jobs queued by this event.
    pub enqueued: usize,
}

#[derive(Debug, Serialize)]
pub struct LinkDeletedResponse {
    pub link_id: i64,
    pub deleted: bool,
}
