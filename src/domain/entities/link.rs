//! Link entity representing a short code and its fallback destination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a link as maintained by the link management collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Disabled,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown link status '{other}'")),
        }
    }
}

/// A short link.
///
/// The link is reference data owned by the management collaborator; this
/// service only reads it, apart from mirroring the records pushed through
/// link events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
    pub default_destination: String,
    pub status: LinkStatus,
}

impl Link {
    /// Creates a new Link instance.
    pub fn new(
        id: i64,
        short_code: String,
        owner_id: i64,
        created_at: DateTime<Utc>,
        default_destination: String,
        status: LinkStatus,
    ) -> Self {
        Self {
            id,
            short_code,
            owner_id,
            created_at,
            default_destination,
            status,
        }
    }

    /// Returns true if the link may be resolved.
    pub fn is_active(&self) -> bool {
        self.status == LinkStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_creation() {
        let now = Utc::now();
        let link = Link::new(
            1,
            "abc123".to_string(),
            7,
            now,
            "https://example.com".to_string(),
            LinkStatus::Active,
        );

        assert_eq!(link.id, 1);
        assert_eq!(link.short_code, "abc123");
        assert_eq!(link.owner_id, 7);
        assert_eq!(link.created_at, now);
        assert!(link.is_active());
    }

    #[test]
    fn test_disabled_link_is_not_active() {
        let link = Link::new(
            2,
            "off".to_string(),
            1,
            Utc::now(),
            "https://example.com".to_string(),
            LinkStatus::Disabled,
        );
        assert!(!link.is_active());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [LinkStatus::Active, LinkStatus::Disabled] {
            assert_eq!(status.as_str().parse::<LinkStatus>().unwrap(), status);
        }
        assert!("archived".parse::<LinkStatus>().is_err());
    }
}
