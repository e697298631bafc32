//! Core domain entities representing the business data model.
//!
//! Entities are plain data structures shared by the resolver, the evaluation
//! workflow and the click aggregators.
//!
//! # Entity Types
//!
//! - [`Link`] - A short code with its default destination
//! - [`GeoRule`] - A region-specific destination with a priority
//! - [`EvaluationRecord`] - Latest verdict for a destination URL
//! - [`EvaluationJob`] - Work item for the evaluation workflow
//! - [`ClickEvent`] / [`ClickAggregate`] - Raw clicks and their bucketed counts
//! - [`Checkpoint`] / [`WorkflowState`] - Durable progress of an evaluation run

pub mod click;
pub mod evaluation;
pub mod geo_rule;
pub mod link;
pub mod workflow;

pub use click::{ClickAggregate, ClickEvent, CountKey, DeviceClass};
pub use evaluation::{EvaluationJob, EvaluationRecord, Verdict};
pub use geo_rule::GeoRule;
pub use link::{Link, LinkStatus};
pub use workflow::{Checkpoint, FetchedPage, RenderedPage, WorkflowState};
