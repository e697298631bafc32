//! In-process evaluation records and workflow checkpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::entities::{Checkpoint, EvaluationRecord};
use crate::domain::repositories::{CheckpointRepository, EvaluationRepository};
use crate::error::AppError;

/// Evaluation records keyed by destination URL.
#[derive(Default)]
pub struct MemoryEvaluationRepository {
    records: DashMap<String, EvaluationRecord>,
}

impl MemoryEvaluationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl EvaluationRepository for MemoryEvaluationRepository {
    async fn get(&self, destination_url: &str) -> Result<Option<EvaluationRecord>, AppError> {
        Ok(self.records.get(destination_url).map(|e| e.value().clone()))
    }

    async fn upsert(&self, record: EvaluationRecord) -> Result<EvaluationRecord, AppError> {
        match self.records.entry(record.destination_url.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().last_checked_at <= record.last_checked_at {
                    occupied.insert(record);
                }
                Ok(occupied.get().clone())
            }
            Entry::Vacant(vacant) => Ok(vacant.insert(record).value().clone()),
        }
    }

    async fn delete(&self, destination_url: &str) -> Result<bool, AppError> {
        Ok(self.records.remove(destination_url).is_some())
    }

    async fn list_stale(
        &self,
        checked_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EvaluationRecord>, AppError> {
        let mut stale: Vec<EvaluationRecord> = self
            .records
            .iter()
            .filter(|e| e.value().last_checked_at < checked_before)
            .map(|e| e.value().clone())
            .collect();
        stale.sort_by_key(|r| r.last_checked_at);
        stale.truncate(limit);
        Ok(stale)
    }
}

/// Workflow checkpoints keyed by job key.
#[derive(Default)]
pub struct MemoryCheckpointRepository {
    checkpoints: DashMap<String, Checkpoint>,
}

impl MemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointRepository for MemoryCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        self.checkpoints
            .insert(checkpoint.key.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, AppError> {
        Ok(self.checkpoints.get(key).map(|e| e.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.checkpoints.remove(key);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<Checkpoint>, AppError> {
        let mut pending: Vec<Checkpoint> =
            self.checkpoints.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|c| c.updated_at);
        Ok(pending)
    }
}
