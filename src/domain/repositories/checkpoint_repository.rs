//! Repository trait for workflow checkpoints.

use crate::domain::entities::Checkpoint;
use crate::error::AppError;
use async_trait::async_trait;

/// Durable storage of in-progress evaluation runs.
///
/// A checkpoint exists from the first transition of a job until it reaches a
/// terminal state; the rows left behind after a crash are resumed at startup.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgCheckpointRepository`] - PostgreSQL implementation
/// - [`crate::infrastructure::memory::MemoryCheckpointRepository`] - In-process implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Inserts or replaces the checkpoint stored under `checkpoint.key`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, AppError>;

    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn delete(&self, key: &str) -> Result<(), AppError>;

    /// Lists every stored checkpoint, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn list_pending(&self) -> Result<Vec<Checkpoint>, AppError>;
}
