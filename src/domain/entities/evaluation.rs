//! Destination evaluation entities: verdicts, records and jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Categorical health judgment of a destination URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Healthy,
    Degraded,
    Dead,
    /// No evaluation has completed yet. Routed as if healthy.
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the resolver may pick a geo rule pointing at this destination.
    pub fn is_routable(&self) -> bool {
        match self {
            Self::Healthy | Self::Degraded | Self::Unknown => true,
            Self::Dead => false,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "degraded" => Ok(Self::Degraded),
            "dead" => Ok(Self::Dead),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown verdict '{other}'")),
        }
    }
}

/// Latest evaluation outcome for a destination URL.
///
/// Keyed by `destination_url`. Records are upserted on each workflow run and
/// removed by the stale sweep once no link references the destination.
/// `link_id` is the link whose job produced the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub destination_url: String,
    pub link_id: i64,
    pub verdict: Verdict,
    /// Content quality on a 0..=100 scale.
    pub quality_score: u8,
    pub last_checked_at: DateTime<Utc>,
    /// Consecutive failed fetch attempts; reset by any successful fetch.
    pub failure_streak: u32,
}

impl EvaluationRecord {
    /// Record written when the fetch stage gives up on a destination.
    pub fn dead(destination_url: &str, link_id: i64, failure_streak: u32) -> Self {
        Self {
            destination_url: destination_url.to_string(),
            link_id,
            verdict: Verdict::Dead,
            quality_score: 0,
            last_checked_at: Utc::now(),
            failure_streak,
        }
    }
}

/// Unit of work for the evaluation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub destination_url: String,
    pub link_id: i64,
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempt, starting at 0.
    pub attempt: u32,
}

impl EvaluationJob {
    pub fn new(destination_url: impl Into<String>, link_id: i64) -> Self {
        Self {
            destination_url: destination_url.into(),
            link_id,
            enqueued_at: Utc::now(),
            attempt: 0,
        }
    }

    /// Stable identity of the job, shared by every redelivery.
    ///
    /// Checkpoints and queue deduplication are keyed by it so a re-run after a
    /// crash resumes the same workflow instead of starting a parallel one.
    pub fn key(&self) -> String {
        format!("{}|{}", self.link_id, self.destination_url)
    }

    /// Copy of the job for the next delivery attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}
