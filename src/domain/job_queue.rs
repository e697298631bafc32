//! Producer side of the evaluation queue.

use crate::domain::entities::EvaluationJob;

/// Fire-and-forget submission of evaluation jobs.
///
/// # Implementations
///
/// - [`crate::evaluation::queue::EvaluationQueue`] - in-process bounded queue
#[cfg_attr(test, mockall::automock)]
pub trait JobQueue: Send + Sync {
    /// Submits a job and returns immediately.
    ///
    /// Returns `false` when the job was skipped because an identical job is
    /// already pending.
    fn enqueue(&self, job: EvaluationJob) -> bool;
}
